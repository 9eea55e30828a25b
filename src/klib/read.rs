use std::sync::Arc;

/// A read offered to the assembler: bases, per-base qualities, and the
/// sample it came from.
///
/// Bases live in a shared buffer so the sub-sequences carved out by
/// low-quality splitting alias it instead of copying.
#[derive(Debug, Clone)]
pub struct AssemblyRead {
    name: String,
    sample: String,
    bases: Arc<[u8]>,
    quals: Vec<u8>,
}

impl AssemblyRead {
    pub fn new(name: &str, sample: &str, bases: Vec<u8>, quals: Vec<u8>) -> Self {
        assert_eq!(
            bases.len(),
            quals.len(),
            "read {name} has {} bases but {} qualities",
            bases.len(),
            quals.len()
        );
        AssemblyRead {
            name: name.to_string(),
            sample: sample.to_string(),
            bases: Arc::from(bases),
            quals,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample(&self) -> &str {
        &self.sample
    }

    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    pub fn quals(&self) -> &[u8] {
        &self.quals
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub(crate) fn shared_bases(&self) -> Arc<[u8]> {
        self.bases.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_its_fields() {
        let read = AssemblyRead::new("r1", "sampleA", b"ACGT".to_vec(), vec![30; 4]);
        assert_eq!(read.name(), "r1");
        assert_eq!(read.sample(), "sampleA");
        assert_eq!(read.bases(), b"ACGT");
        assert_eq!(read.len(), 4);
    }

    #[test]
    #[should_panic(expected = "bases")]
    fn mismatched_lengths_panic() {
        AssemblyRead::new("r1", "s", b"ACGT".to_vec(), vec![30; 3]);
    }
}
