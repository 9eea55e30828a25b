mod align;
pub use crate::klib::align::{
    align, longest_suffix_match, OverhangStrategy, PairwiseAlignment, SwParameters, STANDARD_NGS,
};

mod cigar;
pub use crate::klib::cigar::{Cigar, CigarElement, CigarOp};

mod counter;
pub use crate::klib::counter::KmerCounter;

mod edge;
pub use crate::klib::edge::{SampleEdge, SeqEdge};

mod graph;
pub use crate::klib::graph::{
    AssemblyGraph, EdgeIndex, GraphEdge, GraphVertex, NodeIndex, SeqGraph,
};

mod kmer;
pub use crate::klib::kmer::Kmer;

mod read;
pub use crate::klib::read::AssemblyRead;

mod threading;
pub use crate::klib::threading::{KmerGraph, ThreadingGraph};

mod vertex;
pub use crate::klib::vertex::{KmerVertex, SeqVertex};
