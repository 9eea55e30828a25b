use std::cmp;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::klib::graph::{EdgeIndex, NodeIndex};
use crate::klib::{
    align, longest_suffix_match, AssemblyGraph, AssemblyRead, Cigar, CigarOp, GraphEdge,
    GraphVertex, Kmer, KmerCounter, KmerVertex, OverhangStrategy, SampleEdge, SeqGraph,
    STANDARD_NGS,
};

/// The threading graph: kmer vertices joined by per-sample counted edges.
pub type KmerGraph = AssemblyGraph<KmerVertex, SampleEdge>;

// alignments with more operators than this cannot be merged back
const MAX_CIGAR_COMPLEXITY: usize = 3;

/// A sequence queued for threading: a window of a shared buffer plus the
/// weight it contributes to edge multiplicities.
#[derive(Debug, Clone)]
struct PendingSequence {
    name: String,
    sequence: Arc<[u8]>,
    start: usize,
    stop: usize,
    count: u64,
    is_ref: bool,
}

/// Everything needed to decide and perform one dangling-branch merge.
struct DanglingChainMerge {
    dangling_path: Vec<NodeIndex>,
    reference_path: Vec<NodeIndex>,
    dangling_bases: Vec<u8>,
    reference_bases: Vec<u8>,
    cigar: Cigar,
}

/// The non-unique kmers found for a kmer size.
struct NonUniqueResult {
    non_uniques: HashSet<Kmer>,
    #[allow(dead_code)]
    kmer_size: usize,
}

enum TraversalDirection {
    Downwards,
    Upwards,
}

/// A de Bruijn graph assembled by threading sequences through shared kmers.
///
/// Sequences are enqueued per sample, then a single build pass picks the
/// non-unique kmer set and threads everything in insertion order. After the
/// build, dangling tails and heads can be realigned onto the reference path
/// and low-support chains pruned, before collapsing into a [`SeqGraph`].
pub struct ThreadingGraph {
    pub graph: KmerGraph,
    debug_graph_transformations: bool,
    min_base_quality_to_use_in_assembly: u8,
    num_pruning_samples: usize,
    pending: IndexMap<String, Vec<PendingSequence>>,
    unique_kmers: IndexMap<Kmer, NodeIndex>,
    non_unique_kmers: HashSet<Kmer>,
    ref_source: Option<Kmer>,
    already_built: bool,
    threading_start_only_at_existing_vertex: bool,
    increase_counts_through_branches: bool,
    max_mismatches_in_dangling_head: Option<usize>,
}

impl ThreadingGraph {
    pub fn new(
        kmer_size: usize,
        debug_graph_transformations: bool,
        min_base_quality_to_use_in_assembly: u8,
        num_pruning_samples: usize,
    ) -> Self {
        assert!(
            num_pruning_samples >= 1,
            "num_pruning_samples must be >= 1 but got {num_pruning_samples}"
        );
        ThreadingGraph {
            graph: KmerGraph::new(kmer_size),
            debug_graph_transformations,
            min_base_quality_to_use_in_assembly,
            num_pruning_samples,
            pending: IndexMap::new(),
            unique_kmers: IndexMap::new(),
            non_unique_kmers: HashSet::new(),
            ref_source: None,
            already_built: false,
            threading_start_only_at_existing_vertex: false,
            increase_counts_through_branches: false,
            max_mismatches_in_dangling_head: None,
        }
    }

    pub fn with_kmer_size(kmer_size: usize) -> Self {
        ThreadingGraph::new(kmer_size, false, 6, 1)
    }

    pub fn kmer_size(&self) -> usize {
        self.graph.kmer_size()
    }

    pub fn is_built(&self) -> bool {
        self.already_built
    }

    pub fn unique_kmers(&self) -> &IndexMap<Kmer, NodeIndex> {
        &self.unique_kmers
    }

    pub fn non_unique_kmers(&self) -> &HashSet<Kmer> {
        &self.non_unique_kmers
    }

    pub fn ref_source_kmer(&self) -> Option<&Kmer> {
        self.ref_source.as_ref()
    }

    /// The vertex representing `kmer`, when that kmer is unique in the graph.
    pub fn find_kmer(&self, kmer: &Kmer) -> Option<NodeIndex> {
        self.unique_kmers.get(kmer).copied()
    }

    pub fn threading_start_only_at_existing_vertex(&self) -> bool {
        self.threading_start_only_at_existing_vertex
    }

    /// When set, sequences may only anchor at kmers already present in the
    /// graph instead of any unique kmer.
    pub fn set_threading_start_only_at_existing_vertex(&mut self, value: bool) {
        self.threading_start_only_at_existing_vertex = value;
    }

    /// When set, backward count propagation follows matching edges through
    /// branching vertices too.
    pub fn set_increase_counts_through_branches(&mut self, value: bool) {
        self.increase_counts_through_branches = value;
    }

    /// Override the mismatch budget of dangling-head recovery.
    pub fn set_max_mismatches_in_dangling_head(&mut self, value: Option<usize>) {
        self.max_mismatches_in_dangling_head = value;
    }

    /// More than 20% of the kmers being non-unique marks the region as low
    /// complexity.
    pub fn is_low_complexity(&self) -> bool {
        self.non_unique_kmers.len() * 4 > self.unique_kmers.len()
    }

    /// Return to the empty pre-build state.
    pub fn reset(&mut self) {
        self.graph = KmerGraph::new(self.kmer_size());
        self.pending.clear();
        self.unique_kmers.clear();
        self.non_unique_kmers.clear();
        self.ref_source = None;
        self.already_built = false;
    }

    /// Enqueue the window `start..stop` of `sequence` for threading under
    /// `sample`, weighted by `count`.
    pub fn add_sequence(
        &mut self,
        name: &str,
        sample: &str,
        sequence: Vec<u8>,
        start: usize,
        stop: usize,
        count: u64,
        is_ref: bool,
    ) {
        self.add_pending(name.to_string(), sample.to_string(), Arc::from(sequence), start, stop, count, is_ref);
    }

    fn add_pending(
        &mut self,
        name: String,
        sample: String,
        sequence: Arc<[u8]>,
        start: usize,
        stop: usize,
        count: u64,
        is_ref: bool,
    ) {
        assert!(!self.already_built, "graph already built");
        assert!(
            start <= stop && stop <= sequence.len(),
            "invalid window {start}..{stop} for a sequence of length {}",
            sequence.len()
        );
        assert!(count >= 1, "invalid count {count}");
        self.pending.entry(sample).or_default().push(PendingSequence {
            name,
            sequence,
            start,
            stop,
            count,
            is_ref,
        });
    }

    /// Split `read` at unusable bases and enqueue every remaining run that is
    /// at least one kmer long.
    pub fn add_read(&mut self, read: &AssemblyRead) {
        let sequence = read.shared_bases();
        let quals = read.quals().to_vec();
        let kmer_size = self.kmer_size();

        let mut last_good: Option<usize> = None;
        for end in 0..=sequence.len() {
            if end == sequence.len() || !self.base_is_usable_for_assembly(sequence[end], quals[end]) {
                if let Some(start) = last_good {
                    if end - start >= kmer_size {
                        let name = format!("{}_{}_{}", read.name(), start, end);
                        self.add_pending(
                            name,
                            read.sample().to_string(),
                            sequence.clone(),
                            start,
                            end,
                            1,
                            false,
                        );
                    }
                }
                last_good = None;
            } else if last_good.is_none() {
                last_good = Some(end);
            }
        }
    }

    /// Ns and low-quality calls never make it into the graph.
    fn base_is_usable_for_assembly(&self, base: u8, qual: u8) -> bool {
        base != b'N' && qual >= self.min_base_quality_to_use_in_assembly
    }

    /// Thread every pending sequence into the graph. Idempotent; the first
    /// call irreversibly freezes the set of sequences.
    pub fn build_graph_if_necessary(&mut self) {
        if self.already_built {
            return;
        }

        let result =
            self.determine_kmer_size_and_non_uniques(self.kmer_size(), self.kmer_size());
        self.non_unique_kmers = result.non_uniques;
        debug!(
            "using kmer size {} with {} non-unique kmers",
            self.kmer_size(),
            self.non_unique_kmers.len()
        );

        let pending = std::mem::take(&mut self.pending);
        for (sample, sequences) in &pending {
            trace!("threading {} sequences for sample {}", sequences.len(), sample);
            for sequence in sequences {
                self.thread_sequence(sequence);
            }

            // rotate the per-sample counters at the sample boundary
            let edges: Vec<EdgeIndex> = self.graph.edges().collect();
            for e in edges {
                self.graph.edge_mut(e).flush_single_sample_multiplicity();
            }
        }

        self.already_built = true;
        let unique_vertices: Vec<NodeIndex> = self.unique_kmers.values().copied().collect();
        for v in unique_vertices {
            let vertex = self.graph.vertex_mut(v);
            let info = vertex.additional_info();
            vertex.set_additional_info(format!("{info}+"));
        }
    }

    /// Smallest kmer size in `[min_kmer_size, max_kmer_size]` with no
    /// non-unique kmers across the pending sequences, or `max_kmer_size`
    /// together with its non-unique set when every size has some.
    fn determine_kmer_size_and_non_uniques(
        &self,
        min_kmer_size: usize,
        max_kmer_size: usize,
    ) -> NonUniqueResult {
        let mut with_non_uniques: Vec<&PendingSequence> = self.pending.values().flatten().collect();
        let mut non_uniques = HashSet::new();

        let mut kmer_size = min_kmer_size;
        while kmer_size <= max_kmer_size {
            non_uniques.clear();
            // sequences that stopped producing non-uniques never produce
            // them again at larger sizes
            with_non_uniques.retain(|sequence| {
                let from_sequence = Self::non_unique_kmers_from(sequence, kmer_size);
                if from_sequence.is_empty() {
                    false
                } else {
                    non_uniques.extend(from_sequence);
                    true
                }
            });
            if non_uniques.is_empty() {
                break;
            }
            kmer_size += 1;
        }

        NonUniqueResult {
            non_uniques,
            kmer_size: kmer_size.min(max_kmer_size),
        }
    }

    /// Kmers occurring at least twice in the sliding kmer stream of one
    /// sequence.
    fn non_unique_kmers_from(sequence: &PendingSequence, kmer_size: usize) -> Vec<Kmer> {
        let mut counter = KmerCounter::new(kmer_size);
        let stop_position = sequence.stop as i64 - kmer_size as i64;
        let mut i: i64 = 0;
        while i <= stop_position {
            counter.add(Kmer::new(sequence.sequence.clone(), i as usize, kmer_size), 1);
            i += 1;
        }
        counter.kmers_with_count_at_least(2)
    }

    fn thread_sequence(&mut self, sequence: &PendingSequence) {
        let kmer_size = self.kmer_size();
        let Some(start_pos) = self.find_start(sequence) else {
            return;
        };

        let starting_vertex = self.get_or_create_kmer_vertex(&sequence.sequence, start_pos);

        // bump edges backwards from the anchor while they spell the same bases
        let anchor_kmer = self.graph.vertex(starting_vertex).sequence().to_vec();
        self.increase_counts_in_matched_kmers(
            sequence.count,
            starting_vertex,
            &anchor_kmer,
            kmer_size as i64 - 2,
        );

        if self.debug_graph_transformations {
            self.graph.vertex_mut(starting_vertex).add_read(&sequence.name);
        }

        if sequence.is_ref {
            if let Some(previous) = &self.ref_source {
                panic!(
                    "found two reference sources: previous {previous:?}, new at offset {}",
                    sequence.start
                );
            }
            self.ref_source = Some(Kmer::new(sequence.sequence.clone(), sequence.start, kmer_size));
        }

        let mut vertex = starting_vertex;
        let last = sequence.stop as i64 - kmer_size as i64;
        let mut i = start_pos as i64 + 1;
        while i <= last {
            vertex = self.extend_chain_by_one(
                vertex,
                &sequence.sequence,
                i as usize,
                sequence.count,
                sequence.is_ref,
            );
            if self.debug_graph_transformations {
                self.graph.vertex_mut(vertex).add_read(&sequence.name);
            }
            i += 1;
        }
    }

    /// First position of `sequence` whose kmer may anchor the threading, or
    /// None when the sequence cannot contribute at all.
    fn find_start(&self, sequence: &PendingSequence) -> Option<usize> {
        if sequence.is_ref {
            return Some(sequence.start);
        }

        let kmer_size = self.kmer_size();
        let stop = sequence.stop as i64 - kmer_size as i64;
        let mut i = sequence.start as i64;
        while i < stop {
            let kmer = Kmer::new(sequence.sequence.clone(), i as usize, kmer_size);
            if self.is_threading_start(&kmer) {
                return Some(i as usize);
            }
            i += 1;
        }
        None
    }

    fn is_threading_start(&self, kmer: &Kmer) -> bool {
        if self.threading_start_only_at_existing_vertex {
            self.unique_kmers.contains_key(kmer)
        } else {
            !self.non_unique_kmers.contains(kmer)
        }
    }

    fn get_or_create_kmer_vertex(&mut self, sequence: &Arc<[u8]>, start: usize) -> NodeIndex {
        let kmer = Kmer::new(sequence.clone(), start, self.kmer_size());
        match self.unique_kmer_vertex(&kmer, true) {
            Some(v) => v,
            None => self.create_vertex(kmer),
        }
    }

    /// The unique vertex for `kmer`, unless it is the reference source and
    /// `allow_ref_source` is off.
    fn unique_kmer_vertex(&self, kmer: &Kmer, allow_ref_source: bool) -> Option<NodeIndex> {
        if !allow_ref_source && self.ref_source.as_ref() == Some(kmer) {
            return None;
        }
        self.unique_kmers.get(kmer).copied()
    }

    /// Add a vertex for `kmer`, indexing it as unique when eligible.
    fn create_vertex(&mut self, kmer: Kmer) -> NodeIndex {
        let vertex = KmerVertex::new(kmer.bases().to_vec());
        let index = self.graph.add_vertex(vertex);
        if !self.non_unique_kmers.contains(&kmer) && !self.unique_kmers.contains_key(&kmer) {
            self.unique_kmers.insert(kmer, index);
        }
        index
    }

    fn increase_counts_in_matched_kmers(
        &mut self,
        count: u64,
        vertex: NodeIndex,
        original_kmer: &[u8],
        offset: i64,
    ) {
        if offset < 0 {
            return;
        }

        let incoming: Vec<EdgeIndex> = self.graph.incoming_edges(vertex).collect();
        for edge in incoming {
            let prev = self.graph.edge_source(edge);
            let suffix = self.graph.vertex(prev).suffix();
            let sequence_base = original_kmer[offset as usize];
            if suffix == sequence_base
                && (self.increase_counts_through_branches || self.graph.in_degree(vertex) == 1)
            {
                self.graph.edge_mut(edge).inc_multiplicity(count);
                self.increase_counts_in_matched_kmers(count, prev, original_kmer, offset - 1);
            }
        }
    }

    /// Advance the chain by one kmer: reuse a matching outgoing edge, merge
    /// into the unique vertex for the kmer, or grow a fresh vertex.
    fn extend_chain_by_one(
        &mut self,
        prev_vertex: NodeIndex,
        sequence: &Arc<[u8]>,
        kmer_start: usize,
        count: u64,
        is_ref: bool,
    ) -> NodeIndex {
        let next_pos = kmer_start + self.kmer_size() - 1;
        let outgoing: Vec<EdgeIndex> = self.graph.outgoing_edges(prev_vertex).collect();
        for edge in outgoing {
            let target = self.graph.edge_target(edge);
            if self.graph.vertex(target).suffix() == sequence[next_pos] {
                self.graph.edge_mut(edge).inc_multiplicity(count);
                return target;
            }
        }

        let kmer = Kmer::new(sequence.clone(), kmer_start, self.kmer_size());
        let unique_merge_vertex = self.unique_kmer_vertex(&kmer, false);
        if is_ref && unique_merge_vertex.is_some() {
            panic!("the reference path tried to merge into the existing unique vertex for {kmer:?}");
        }

        let next_vertex = match unique_merge_vertex {
            Some(v) => v,
            None => self.create_vertex(kmer),
        };
        self.graph.add_edge(
            prev_vertex,
            next_vertex,
            SampleEdge::new(is_ref, count, self.num_pruning_samples),
        );
        next_vertex
    }

    /// Remove a vertex, dropping its unique-kmer index entry with it.
    pub fn remove_vertex(&mut self, v: NodeIndex) {
        let kmer = Kmer::from_bases(self.graph.vertex(v).sequence().to_vec());
        if self.unique_kmers.get(&kmer) == Some(&v) {
            self.unique_kmers.shift_remove(&kmer);
        }
        self.graph.remove_vertex(v);
    }

    pub fn prune_low_weight_chains(&mut self, prune_factor: u64) {
        self.graph.prune_low_weight_chains(prune_factor);
        self.sweep_stale_unique_kmers();
    }

    pub fn clean_non_ref_paths(&mut self) {
        self.graph.clean_non_ref_paths();
        self.sweep_stale_unique_kmers();
    }

    pub fn remove_paths_not_connected_to_ref(&mut self) {
        self.graph.remove_paths_not_connected_to_ref();
        self.sweep_stale_unique_kmers();
    }

    fn sweep_stale_unique_kmers(&mut self) {
        let graph = &self.graph;
        self.unique_kmers.retain(|_, index| graph.contains_vertex(*index));
    }

    /// Build if necessary, then collapse into a sequence graph.
    pub fn convert_to_sequence_graph(&mut self) -> SeqGraph {
        self.build_graph_if_necessary();
        self.graph.convert_to_sequence_graph()
    }

    /// Try to realign every non-reference sink back onto the reference path.
    /// Returns how many were merged.
    pub fn recover_dangling_tails(
        &mut self,
        prune_factor: u64,
        min_dangling_branch_length: usize,
    ) -> usize {
        assert!(
            self.already_built,
            "recover_dangling_tails requires the graph to be built"
        );

        let candidates: Vec<NodeIndex> = self
            .graph
            .vertices()
            .filter(|&v| self.graph.out_degree(v) == 0 && !self.graph.is_ref_sink(v))
            .collect();

        let attempted = candidates.len();
        let mut recovered = 0;
        for v in candidates {
            recovered += self.recover_dangling_tail(v, prune_factor, min_dangling_branch_length);
        }

        debug!("recovered {} of {} dangling tails", recovered, attempted);
        recovered
    }

    /// Try to realign every non-reference source back onto the reference
    /// path. Returns how many were merged.
    pub fn recover_dangling_heads(
        &mut self,
        prune_factor: u64,
        min_dangling_branch_length: usize,
    ) -> usize {
        assert!(
            self.already_built,
            "recover_dangling_heads requires the graph to be built"
        );

        // recovery may add vertices, so gather the heads up front
        let candidates: Vec<NodeIndex> = self
            .graph
            .vertices()
            .filter(|&v| self.graph.in_degree(v) == 0 && !self.graph.is_ref_source(v))
            .collect();

        let attempted = candidates.len();
        let mut recovered = 0;
        for v in candidates {
            recovered += self.recover_dangling_head(v, prune_factor, min_dangling_branch_length);
        }

        debug!("recovered {} of {} dangling heads", recovered, attempted);
        recovered
    }

    fn recover_dangling_tail(
        &mut self,
        vertex: NodeIndex,
        prune_factor: u64,
        min_dangling_branch_length: usize,
    ) -> usize {
        if self.graph.out_degree(vertex) != 0 {
            debug_assert!(false, "dangling tail candidate has outgoing edges");
            warn!("skipping a dangling tail candidate that grew outgoing edges");
            return 0;
        }

        let Some(merge) = self.generate_cigar_against_downwards_reference_path(
            vertex,
            prune_factor,
            min_dangling_branch_length,
        ) else {
            return 0;
        };

        if !Self::cigar_is_okay_to_merge(&merge.cigar, false, true) {
            return 0;
        }

        self.merge_dangling_tail(&merge)
    }

    fn recover_dangling_head(
        &mut self,
        vertex: NodeIndex,
        prune_factor: u64,
        min_dangling_branch_length: usize,
    ) -> usize {
        if self.graph.in_degree(vertex) != 0 {
            debug_assert!(false, "dangling head candidate has incoming edges");
            warn!("skipping a dangling head candidate that grew incoming edges");
            return 0;
        }

        let Some(mut merge) = self.generate_cigar_against_upwards_reference_path(
            vertex,
            prune_factor,
            min_dangling_branch_length,
        ) else {
            return 0;
        };

        if !Self::cigar_is_okay_to_merge(&merge.cigar, true, false) {
            return 0;
        }

        self.merge_dangling_head(&mut merge)
    }

    /// A mergeable alignment is short and anchored by a match on the side
    /// facing the rest of the graph.
    fn cigar_is_okay_to_merge(
        cigar: &Cigar,
        require_first_element_m: bool,
        require_last_element_m: bool,
    ) -> bool {
        let elements = cigar.elements();
        if elements.is_empty() || elements.len() > MAX_CIGAR_COMPLEXITY {
            return false;
        }
        if require_first_element_m && elements[0].op != CigarOp::M {
            return false;
        }
        if require_last_element_m && elements[elements.len() - 1].op != CigarOp::M {
            return false;
        }
        true
    }

    fn merge_dangling_tail(&mut self, merge: &DanglingChainMerge) -> usize {
        let elements = merge.cigar.elements();
        let last = elements[elements.len() - 1];
        assert!(last.op == CigarOp::M, "the last CIGAR element must be an M");

        let last_ref_index = merge.cigar.reference_length() as i64 - 1;
        let matching_suffix = cmp::min(
            longest_suffix_match(&merge.reference_bases, &merge.dangling_bases, last_ref_index),
            last.len,
        ) as i64;
        if matching_suffix == 0 {
            return 0;
        }

        let alt_index_to_merge =
            cmp::max(merge.cigar.read_length() as i64 - matching_suffix - 1, 0) as usize;

        // when a left-aligned leading deletion brushes the common ancestor
        // and everything after it matches, move the merge point past the
        // deletion so it does not lose a base
        let first_is_deletion = elements[0].op == CigarOp::D;
        let must_handle_leading_deletion =
            first_is_deletion && elements[0].len as i64 + matching_suffix == last_ref_index + 1;
        let ref_index_to_merge = (last_ref_index - matching_suffix
            + 1
            + if must_handle_leading_deletion { 1 } else { 0 }) as usize;

        // merging at the common ancestor itself would cycle straight back
        if ref_index_to_merge == 0 {
            return 0;
        }

        self.graph.add_edge(
            merge.dangling_path[alt_index_to_merge],
            merge.reference_path[ref_index_to_merge],
            SampleEdge::new(false, 1, self.num_pruning_samples),
        );
        1
    }

    fn merge_dangling_head(&mut self, merge: &mut DanglingChainMerge) -> usize {
        let first = merge.cigar.elements()[0];
        assert!(first.op == CigarOp::M, "the first CIGAR element must be an M");

        let indexes_to_merge =
            self.best_prefix_match(&merge.reference_bases, &merge.dangling_bases, first.len);
        if indexes_to_merge <= 0 {
            return 0;
        }
        let indexes_to_merge = indexes_to_merge as usize;

        // the reference path cannot be pushed back any further
        if indexes_to_merge >= merge.reference_path.len() - 1 {
            return 0;
        }

        // the dangling path can be, by synthesizing vertices against the
        // reference
        if indexes_to_merge >= merge.dangling_path.len()
            && !self.extend_dangling_path_against_reference(
                merge,
                indexes_to_merge - merge.dangling_path.len() + 2,
            )
        {
            return 0;
        }

        self.graph.add_edge(
            merge.reference_path[indexes_to_merge + 1],
            merge.dangling_path[indexes_to_merge],
            SampleEdge::new(false, 1, self.num_pruning_samples),
        );
        1
    }

    /// Walk up from a non-reference sink and align the branch against the
    /// reference path below the lowest common ancestor.
    fn generate_cigar_against_downwards_reference_path(
        &self,
        vertex: NodeIndex,
        prune_factor: u64,
        min_dangling_branch_length: usize,
    ) -> Option<DanglingChainMerge> {
        // heads may legitimately be length 0, tails cannot
        let min_tail_path_length = cmp::max(1, min_dangling_branch_length);

        let alt_path = self.find_path_upwards_to_lowest_common_ancestor(vertex, prune_factor)?;
        if self.graph.is_ref_source(alt_path[0]) || alt_path.len() < min_tail_path_length + 1 {
            return None;
        }

        // walk the reference downwards, never back into the branch itself
        let blacklist = [self
            .graph
            .incoming_edge_of(alt_path[1])
            .expect("a dangling branch vertex must keep its single incoming edge")];
        let reference_path =
            self.reference_path_from(alt_path[0], TraversalDirection::Downwards, &blacklist);

        let reference_bases = self.bases_for_path(&reference_path, false);
        let dangling_bases = self.bases_for_path(&alt_path, false);
        let alignment = align(
            &reference_bases,
            &dangling_bases,
            &STANDARD_NGS,
            OverhangStrategy::LeadingIndel,
        );
        Some(DanglingChainMerge {
            dangling_path: alt_path,
            reference_path,
            dangling_bases,
            reference_bases,
            cigar: alignment.cigar.without_trailing_deletions(),
        })
    }

    /// Walk down from a non-reference source and align the branch against
    /// the reference path above the point where it first touches it.
    fn generate_cigar_against_upwards_reference_path(
        &self,
        vertex: NodeIndex,
        prune_factor: u64,
        min_dangling_branch_length: usize,
    ) -> Option<DanglingChainMerge> {
        let alt_path =
            self.find_path_downwards_to_highest_common_descendant_of_reference(vertex, prune_factor)?;
        if self.graph.is_ref_sink(alt_path[0]) || alt_path.len() < min_dangling_branch_length + 1 {
            return None;
        }

        let reference_path =
            self.reference_path_from(alt_path[0], TraversalDirection::Upwards, &[]);

        let reference_bases = self.bases_for_path(&reference_path, true);
        let dangling_bases = self.bases_for_path(&alt_path, true);
        let alignment = align(
            &reference_bases,
            &dangling_bases,
            &STANDARD_NGS,
            OverhangStrategy::LeadingIndel,
        );
        Some(DanglingChainMerge {
            dangling_path: alt_path,
            reference_path,
            dangling_bases,
            reference_bases,
            cigar: alignment.cigar.without_trailing_deletions(),
        })
    }

    /// Climb single-in single-out vertices up to the first branching vertex,
    /// dropping everything below an under-supported edge along the way.
    /// None when the walk never reaches a branching vertex.
    fn find_path_upwards_to_lowest_common_ancestor(
        &self,
        vertex: NodeIndex,
        prune_factor: u64,
    ) -> Option<Vec<NodeIndex>> {
        let mut path = std::collections::VecDeque::new();

        let mut v = vertex;
        while self.graph.in_degree(v) == 1 && self.graph.out_degree(v) < 2 {
            let edge = self.graph.incoming_edge_of(v).unwrap();
            if self.graph.edge(edge).pruning_multiplicity() < prune_factor {
                path.clear();
            } else {
                path.push_front(v);
            }
            v = self.graph.edge_source(edge);
        }
        path.push_front(v);

        if self.graph.out_degree(v) > 1 {
            Some(path.into())
        } else {
            None
        }
    }

    /// Descend single-out vertices until the branch touches the reference.
    /// The result is reversed, so the touching vertex comes first and the
    /// dangling source last. None when the walk never reaches the reference.
    fn find_path_downwards_to_highest_common_descendant_of_reference(
        &self,
        vertex: NodeIndex,
        prune_factor: u64,
    ) -> Option<Vec<NodeIndex>> {
        let mut path = std::collections::VecDeque::new();

        let mut v = vertex;
        while !self.graph.is_reference_node(v) && self.graph.out_degree(v) == 1 {
            let edge = self.graph.outgoing_edge_of(v).unwrap();
            if self.graph.edge(edge).pruning_multiplicity() < prune_factor {
                path.clear();
            } else {
                path.push_front(v);
            }
            v = self.graph.edge_target(edge);
        }
        path.push_front(v);

        if self.graph.is_reference_node(v) {
            Some(path.into())
        } else {
            None
        }
    }

    /// The reference path from `start` in the given direction, including
    /// `start` itself.
    fn reference_path_from(
        &self,
        start: NodeIndex,
        direction: TraversalDirection,
        blacklisted_edges: &[EdgeIndex],
    ) -> Vec<NodeIndex> {
        let mut path = Vec::new();
        let mut v = Some(start);
        while let Some(u) = v {
            path.push(u);
            v = match direction {
                TraversalDirection::Downwards => {
                    self.graph.next_reference_vertex(u, true, blacklisted_edges)
                }
                TraversalDirection::Upwards => self.graph.prev_reference_vertex(u),
            };
        }
        path
    }

    /// The bases spelled by a path: one suffix byte per vertex, with source
    /// vertices optionally expanded to their whole (reversed) kmer.
    fn bases_for_path(&self, path: &[NodeIndex], expand_source: bool) -> Vec<u8> {
        let mut bases = Vec::with_capacity(path.len());
        for &v in path {
            if expand_source && self.graph.is_source(v) {
                let mut sequence = self.graph.vertex(v).sequence().to_vec();
                sequence.reverse();
                bases.extend_from_slice(&sequence);
            } else {
                bases.push(self.graph.vertex(v).suffix());
            }
        }
        bases
    }

    /// Index of the last mismatch within the prefix `0..max_index`, provided
    /// the mismatch count stays inside the budget; -1 otherwise.
    fn best_prefix_match(&self, path1: &[u8], path2: &[u8], max_index: usize) -> i64 {
        let max_mismatches = self.max_mismatches(max_index);
        let mut mismatches = 0;
        let mut last_mismatch_index: i64 = -1;
        for index in 0..max_index {
            if path1[index] != path2[index] {
                mismatches += 1;
                if mismatches > max_mismatches {
                    return -1;
                }
                last_mismatch_index = index as i64;
            }
        }
        last_mismatch_index
    }

    /// One mismatch per kmer of branch length, at least one, unless a test
    /// override is installed.
    fn max_mismatches(&self, length_of_dangling_branch: usize) -> usize {
        self.max_mismatches_in_dangling_head
            .unwrap_or_else(|| cmp::max(1, length_of_dangling_branch / self.kmer_size()))
    }

    /// Lengthen a dangling head chain by synthesizing vertices from the
    /// reference bases above it, so a merge point beyond its end becomes
    /// reachable.
    fn extend_dangling_path_against_reference(
        &mut self,
        merge: &mut DanglingChainMerge,
        num_nodes_to_extend: usize,
    ) -> bool {
        let index_of_last_dangling_node = merge.dangling_path.len() - 1;
        let index_of_ref_node_to_use = index_of_last_dangling_node + num_nodes_to_extend;
        if index_of_ref_node_to_use >= merge.reference_path.len() {
            return false;
        }

        let dangling_source = merge.dangling_path.remove(index_of_last_dangling_node);
        let ref_source_sequence = self
            .graph
            .vertex(merge.reference_path[index_of_ref_node_to_use])
            .sequence()
            .to_vec();
        let mut sequence_to_extend = ref_source_sequence[..num_nodes_to_extend].to_vec();
        sequence_to_extend.extend_from_slice(self.graph.vertex(dangling_source).sequence());

        // the source vertex gets rebuilt as part of the synthetic chain
        let source_edge = self
            .graph
            .outgoing_edge_of(dangling_source)
            .expect("a dangling head must keep its single outgoing edge");
        let source_multiplicity = self.graph.edge(source_edge).multiplicity();
        let mut prev_vertex = self.graph.edge_target(source_edge);
        self.graph.remove_edge(source_edge);

        let kmer_size = self.kmer_size();
        for i in (1..=num_nodes_to_extend).rev() {
            let new_vertex = self
                .graph
                .add_vertex(KmerVertex::new(sequence_to_extend[i..i + kmer_size].to_vec()));
            self.graph.add_edge(
                new_vertex,
                prev_vertex,
                SampleEdge::new(false, source_multiplicity, self.num_pruning_samples),
            );
            merge.dangling_path.push(new_vertex);
            prev_vertex = new_vertex;
        }

        true
    }
}
