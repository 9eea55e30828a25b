#[macro_use]
extern crate log;

mod klib;
pub use self::{
    klib::align, klib::longest_suffix_match, klib::AssemblyGraph, klib::AssemblyRead, klib::Cigar,
    klib::CigarElement, klib::CigarOp, klib::EdgeIndex, klib::GraphEdge, klib::GraphVertex,
    klib::Kmer, klib::KmerCounter, klib::KmerGraph, klib::KmerVertex, klib::NodeIndex,
    klib::OverhangStrategy, klib::PairwiseAlignment, klib::SampleEdge, klib::SeqEdge,
    klib::SeqGraph, klib::SeqVertex, klib::SwParameters, klib::ThreadingGraph, klib::STANDARD_NGS,
};
