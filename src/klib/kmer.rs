use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A window of bases inside a shared buffer.
///
/// Every kmer of a sequence aliases the same backing allocation, so creating
/// one is just an offset and a precomputed hash. Equality and hashing only
/// ever look at the window, never at the surrounding buffer.
#[derive(Clone)]
pub struct Kmer {
    buffer: Arc<[u8]>,
    start: usize,
    length: usize,
    hash: u64,
}

impl Kmer {
    /// Create a kmer spanning `start .. start + length` of `buffer`.
    pub fn new(buffer: Arc<[u8]>, start: usize, length: usize) -> Self {
        assert!(
            start + length <= buffer.len(),
            "kmer window {}..{} out of range for buffer of length {}",
            start,
            start + length,
            buffer.len()
        );
        let hash = window_hash(&buffer, start, length);
        Kmer {
            buffer,
            start,
            length,
            hash,
        }
    }

    /// Create a kmer owning all of `bases`.
    pub fn from_bases(bases: Vec<u8>) -> Self {
        let length = bases.len();
        Kmer::new(Arc::from(bases), 0, length)
    }

    /// Derive a sub-kmer sharing this kmer's buffer.
    /// `new_start` is relative to this kmer, so 0 keeps the same first base.
    pub fn sub(&self, new_start: usize, new_length: usize) -> Self {
        Kmer::new(self.buffer.clone(), self.start + new_start, new_length)
    }

    /// The windowed bases. Never copies; the buffer is shared.
    pub fn bases(&self) -> &[u8] {
        &self.buffer[self.start..self.start + self.length]
    }

    pub fn base(&self, i: usize) -> u8 {
        self.buffer[self.start + i]
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Hamming-compare against `other`, recording mismatch positions and the
    /// other kmer's bases at those positions into the output slices.
    ///
    /// Returns the distance, or `None` once it exceeds `max_distance` (the
    /// output slices must hold at least `max_distance + 1` entries).
    pub fn differing_positions(
        &self,
        other: &Kmer,
        max_distance: usize,
        differing_indices: &mut [usize],
        differing_bases: &mut [u8],
    ) -> Option<usize> {
        assert_eq!(
            self.length, other.length,
            "cannot compare kmers of different lengths"
        );
        let mine = self.bases();
        let theirs = other.bases();
        let mut dist = 0;
        for i in 0..self.length {
            if mine[i] != theirs[i] {
                differing_indices[dist] = i;
                differing_bases[dist] = theirs[i];
                dist += 1;
                if dist > max_distance {
                    return None;
                }
            }
        }
        Some(dist)
    }
}

/// `h0 = 1, h = 31 * h + base` over the window only.
fn window_hash(buffer: &[u8], start: usize, length: usize) -> u64 {
    let mut hash: u64 = 1;
    for &b in &buffer[start..start + length] {
        hash = hash.wrapping_mul(31).wrapping_add(u64::from(b));
    }
    hash
}

impl PartialEq for Kmer {
    fn eq(&self, other: &Self) -> bool {
        // hash first, it almost always settles it
        self.hash == other.hash && self.length == other.length && self.bases() == other.bases()
    }
}

impl Eq for Kmer {}

impl Hash for Kmer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.bases()))
    }
}

impl fmt::Debug for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Kmer{{{}}}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_and_owned_kmers_are_equal() {
        let windowed = Kmer::new(Arc::from(b"TTACGTT".to_vec()), 2, 4);
        let owned = Kmer::from_bases(b"ACGT".to_vec());
        assert_eq!(windowed, owned);
        assert_eq!(windowed.bases(), b"ACGT");

        use std::collections::hash_map::DefaultHasher;
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        windowed.hash(&mut h1);
        owned.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn different_windows_differ() {
        let buffer: Arc<[u8]> = Arc::from(b"ACGTACGA".to_vec());
        assert_eq!(Kmer::new(buffer.clone(), 0, 3), Kmer::new(buffer.clone(), 4, 3));
        assert_ne!(Kmer::new(buffer.clone(), 1, 3), Kmer::new(buffer.clone(), 5, 3));
        assert_ne!(Kmer::new(buffer.clone(), 0, 3), Kmer::new(buffer, 0, 4));
    }

    #[test]
    fn sub_kmer_shares_the_buffer() {
        let kmer = Kmer::from_bases(b"ACGTAC".to_vec());
        let sub = kmer.sub(1, 4);
        assert_eq!(sub.bases(), b"CGTA");
        assert_eq!(sub.sub(0, 2).bases(), b"CG");
    }

    #[test]
    fn differing_positions_within_budget() {
        let a = Kmer::from_bases(b"ACATT".to_vec());
        let b = Kmer::from_bases(b"ACGGT".to_vec());
        let mut indices = [0usize; 3];
        let mut bases = [0u8; 3];
        assert_eq!(a.differing_positions(&b, 2, &mut indices, &mut bases), Some(2));
        assert_eq!(&indices[..2], &[2, 3]);
        assert_eq!(&bases[..2], b"GG");
    }

    #[test]
    fn differing_positions_exceeding_budget() {
        let a = Kmer::from_bases(b"ACATT".to_vec());
        let b = Kmer::from_bases(b"ACGGT".to_vec());
        let mut indices = [0usize; 2];
        let mut bases = [0u8; 2];
        assert_eq!(a.differing_positions(&b, 1, &mut indices, &mut bases), None);
    }

    #[test]
    fn differing_positions_respects_windows() {
        let a = Kmer::new(Arc::from(b"NNACGTNN".to_vec()), 2, 4);
        let b = Kmer::new(Arc::from(b"TTTTAGTT".to_vec()), 3, 4);
        let mut indices = [0usize; 5];
        let mut bases = [0u8; 5];
        // ACGT vs TAGT
        assert_eq!(a.differing_positions(&b, 4, &mut indices, &mut bases), Some(2));
        assert_eq!(&indices[..2], &[0, 1]);
        assert_eq!(&bases[..2], b"TA");
    }
}
