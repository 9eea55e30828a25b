use std::collections::HashMap;

use crate::klib::Kmer;

/// Occurrence counts for fixed-length kmers.
pub struct KmerCounter {
    kmer_length: usize,
    counts: HashMap<Kmer, u64>,
}

impl KmerCounter {
    pub fn new(kmer_length: usize) -> Self {
        assert!(kmer_length >= 1, "kmer length must be >= 1 but got {kmer_length}");
        KmerCounter {
            kmer_length,
            counts: HashMap::new(),
        }
    }

    pub fn add(&mut self, kmer: Kmer, count: u64) {
        assert_eq!(
            kmer.len(),
            self.kmer_length,
            "expected a kmer of length {} but got {}",
            self.kmer_length,
            kmer.len()
        );
        *self.counts.entry(kmer).or_insert(0) += count;
    }

    pub fn count(&self, kmer: &Kmer) -> u64 {
        self.counts.get(kmer).copied().unwrap_or(0)
    }

    /// All kmers seen at least `min_count` times, in no particular order.
    pub fn kmers_with_count_at_least(&self, min_count: u64) -> Vec<Kmer> {
        self.counts
            .iter()
            .filter(|(_, &count)| count >= min_count)
            .map(|(kmer, _)| kmer.clone())
            .collect()
    }
}
