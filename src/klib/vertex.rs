use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use itertools::Itertools;

use crate::klib::GraphVertex;

// Vertex identity is a process-wide counter so that graphs living on
// different threads never mint the same id.
static NEXT_VERTEX_ID: AtomicU64 = AtomicU64::new(0);

fn next_vertex_id() -> u64 {
    NEXT_VERTEX_ID.fetch_add(1, Ordering::Relaxed)
}

/// One kmer occurrence in the threading graph.
///
/// Vertices compare by id, not by sequence: a non-unique kmer legitimately
/// occupies several graph positions that all carry the same bases.
#[derive(Debug, Clone)]
pub struct KmerVertex {
    sequence: Vec<u8>,
    id: u64,
    additional_info: String,
    reads: Vec<String>,
}

impl KmerVertex {
    pub fn new(sequence: Vec<u8>) -> Self {
        assert!(!sequence.is_empty(), "a kmer vertex needs at least one base");
        KmerVertex {
            sequence,
            id: next_vertex_id(),
            additional_info: String::new(),
            reads: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kmer_size(&self) -> usize {
        self.sequence.len()
    }

    /// The last base of the kmer, i.e. the base this vertex contributes when
    /// walked through on a path.
    pub fn suffix(&self) -> u8 {
        self.sequence[self.sequence.len() - 1]
    }

    /// Record the name of a read that passed through this vertex; surfaces in
    /// the DOT dump. Only called when debug transformations are enabled.
    pub fn add_read(&mut self, name: &str) {
        self.reads.push(name.to_string());
    }
}

impl GraphVertex for KmerVertex {
    fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    fn additional_sequence(&self, is_source: bool) -> &[u8] {
        if is_source {
            &self.sequence
        } else {
            &self.sequence[self.sequence.len() - 1..]
        }
    }

    fn additional_info(&self) -> String {
        if self.reads.is_empty() || self.reads.iter().any(|r| r == "ref") {
            self.additional_info.clone()
        } else {
            format!("{}__{}", self.additional_info, self.reads.iter().join(","))
        }
    }

    fn set_additional_info(&mut self, info: String) {
        self.additional_info = info;
    }
}

impl PartialEq for KmerVertex {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for KmerVertex {}

impl Hash for KmerVertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.id);
    }
}

impl fmt::Display for KmerVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}_{}", self.id, String::from_utf8_lossy(&self.sequence))
    }
}

/// A vertex of the collapsed sequence graph: an arbitrary run of bases.
#[derive(Debug, Clone)]
pub struct SeqVertex {
    sequence: Vec<u8>,
    id: u64,
    additional_info: String,
}

impl SeqVertex {
    pub fn new(sequence: Vec<u8>) -> Self {
        SeqVertex {
            sequence,
            id: next_vertex_id(),
            additional_info: String::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl GraphVertex for SeqVertex {
    fn sequence(&self) -> &[u8] {
        &self.sequence
    }

    fn additional_sequence(&self, _is_source: bool) -> &[u8] {
        &self.sequence
    }

    fn additional_info(&self) -> String {
        self.additional_info.clone()
    }

    fn set_additional_info(&mut self, info: String) {
        self.additional_info = info;
    }
}

impl PartialEq for SeqVertex {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SeqVertex {}

impl Hash for SeqVertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.id);
    }
}

impl fmt::Display for SeqVertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}_{}", self.id, String::from_utf8_lossy(&self.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bases_distinct_ids() {
        let a = KmerVertex::new(b"ACG".to_vec());
        let b = KmerVertex::new(b"ACG".to_vec());
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.sequence(), b.sequence());
    }

    #[test]
    fn suffix_and_additional_sequence() {
        let v = KmerVertex::new(b"ACGT".to_vec());
        assert_eq!(v.suffix(), b'T');
        assert_eq!(v.additional_sequence(true), b"ACGT");
        assert_eq!(v.additional_sequence(false), b"T");
    }

    #[test]
    fn read_names_decorate_info() {
        let mut v = KmerVertex::new(b"ACG".to_vec());
        v.set_additional_info("+".to_string());
        assert_eq!(v.additional_info(), "+");
        v.add_read("read1");
        v.add_read("read2");
        assert_eq!(v.additional_info(), "+__read1,read2");
        v.add_read("ref");
        assert_eq!(v.additional_info(), "+");
    }
}
