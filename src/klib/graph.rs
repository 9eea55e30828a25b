use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use petgraph::algo::is_cyclic_directed;
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::{Dfs, EdgeRef, IntoEdgeReferences, Reversed};
use petgraph::Direction;

pub use petgraph::stable_graph::{EdgeIndex, NodeIndex};

use crate::klib::{SeqEdge, SeqVertex};

/// Behavior a vertex must expose to live in an [`AssemblyGraph`].
pub trait GraphVertex: fmt::Display {
    /// The bases this vertex carries.
    fn sequence(&self) -> &[u8];

    /// The bases this vertex contributes when walked through on a path:
    /// everything for a source, otherwise whatever is not already implied by
    /// the predecessor.
    fn additional_sequence(&self, is_source: bool) -> &[u8];

    fn additional_info(&self) -> String;

    fn set_additional_info(&mut self, info: String);
}

/// Behavior an edge must expose to live in an [`AssemblyGraph`].
pub trait GraphEdge {
    fn is_ref(&self) -> bool;

    fn set_is_ref(&mut self, is_ref: bool);

    fn multiplicity(&self) -> u64;

    fn inc_multiplicity(&mut self, by: u64);

    /// The multiplicity pruning should consult, which may be stricter than
    /// the total.
    fn pruning_multiplicity(&self) -> u64;

    /// Fold another edge for the same vertex pair into this one.
    fn add(&mut self, other: &Self);

    fn dot_label(&self) -> String {
        self.multiplicity().to_string()
    }
}

/// A directed multigraph over kmer-derived vertices. Parallel edges between
/// the same ordered vertex pair are folded together on insertion, so the
/// (src, tgt) pair stays unique.
pub struct AssemblyGraph<V: GraphVertex, E: GraphEdge> {
    kmer_size: usize,
    graph: StableDiGraph<V, E>,
}

/// The compacted output graph of the assembler.
pub type SeqGraph = AssemblyGraph<SeqVertex, SeqEdge>;

impl<V: GraphVertex, E: GraphEdge> AssemblyGraph<V, E> {
    pub fn new(kmer_size: usize) -> Self {
        assert!(kmer_size >= 1, "kmer_size must be >= 1 but got {kmer_size}");
        AssemblyGraph {
            kmer_size,
            graph: StableDiGraph::new(),
        }
    }

    pub fn kmer_size(&self) -> usize {
        self.kmer_size
    }

    pub fn vertex_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn vertices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn edges(&self) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edge_indices()
    }

    pub fn contains_vertex(&self, v: NodeIndex) -> bool {
        self.graph.contains_node(v)
    }

    pub fn vertex(&self, v: NodeIndex) -> &V {
        self.graph.node_weight(v).expect("vertex not in graph")
    }

    pub fn vertex_mut(&mut self, v: NodeIndex) -> &mut V {
        self.graph.node_weight_mut(v).expect("vertex not in graph")
    }

    pub fn edge(&self, e: EdgeIndex) -> &E {
        self.graph.edge_weight(e).expect("edge not in graph")
    }

    pub fn edge_mut(&mut self, e: EdgeIndex) -> &mut E {
        self.graph.edge_weight_mut(e).expect("edge not in graph")
    }

    pub fn add_vertex(&mut self, vertex: V) -> NodeIndex {
        self.graph.add_node(vertex)
    }

    /// Insert an edge, folding it into an existing (source, target) edge if
    /// one is already present.
    pub fn add_edge(&mut self, source: NodeIndex, target: NodeIndex, edge: E) -> EdgeIndex {
        match self.graph.find_edge(source, target) {
            Some(existing) => {
                self.graph[existing].add(&edge);
                existing
            }
            None => self.graph.add_edge(source, target, edge),
        }
    }

    pub fn get_edge(&self, source: NodeIndex, target: NodeIndex) -> Option<EdgeIndex> {
        self.graph.find_edge(source, target)
    }

    pub fn remove_edge(&mut self, e: EdgeIndex) {
        self.graph.remove_edge(e);
    }

    pub fn remove_edge_between(&mut self, source: NodeIndex, target: NodeIndex) {
        if let Some(e) = self.graph.find_edge(source, target) {
            self.graph.remove_edge(e);
        }
    }

    pub fn remove_vertex(&mut self, v: NodeIndex) {
        self.graph.remove_node(v);
    }

    pub fn edge_source(&self, e: EdgeIndex) -> NodeIndex {
        self.graph.edge_endpoints(e).expect("edge not in graph").0
    }

    pub fn edge_target(&self, e: EdgeIndex) -> NodeIndex {
        self.graph.edge_endpoints(e).expect("edge not in graph").1
    }

    pub fn in_degree(&self, v: NodeIndex) -> usize {
        self.graph.edges_directed(v, Direction::Incoming).count()
    }

    pub fn out_degree(&self, v: NodeIndex) -> usize {
        self.graph.edges_directed(v, Direction::Outgoing).count()
    }

    pub fn incoming_edges(&self, v: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edges_directed(v, Direction::Incoming).map(|e| e.id())
    }

    pub fn outgoing_edges(&self, v: NodeIndex) -> impl Iterator<Item = EdgeIndex> + '_ {
        self.graph.edges_directed(v, Direction::Outgoing).map(|e| e.id())
    }

    pub fn incoming_vertices(&self, v: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(v, Direction::Incoming)
    }

    pub fn outgoing_vertices(&self, v: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(v, Direction::Outgoing)
    }

    /// The single incoming edge of `v`, or None if it has none.
    /// Panics when `v` has several incoming edges.
    pub fn incoming_edge_of(&self, v: NodeIndex) -> Option<EdgeIndex> {
        let mut edges = self.incoming_edges(v);
        let first = edges.next();
        assert!(
            edges.next().is_none(),
            "cannot get a single incoming edge for a vertex with multiple incoming edges"
        );
        first
    }

    /// The single outgoing edge of `v`, or None if it has none.
    /// Panics when `v` has several outgoing edges.
    pub fn outgoing_edge_of(&self, v: NodeIndex) -> Option<EdgeIndex> {
        let mut edges = self.outgoing_edges(v);
        let first = edges.next();
        assert!(
            edges.next().is_none(),
            "cannot get a single outgoing edge for a vertex with multiple outgoing edges"
        );
        first
    }

    pub fn is_source(&self, v: NodeIndex) -> bool {
        self.in_degree(v) == 0
    }

    pub fn is_sink(&self, v: NodeIndex) -> bool {
        self.out_degree(v) == 0
    }

    /// Does `v` sit on the reference path?
    pub fn is_reference_node(&self, v: NodeIndex) -> bool {
        self.graph
            .edges_directed(v, Direction::Incoming)
            .chain(self.graph.edges_directed(v, Direction::Outgoing))
            .any(|e| e.weight().is_ref())
            || self.vertex_count() == 1
    }

    pub fn is_ref_source(&self, v: NodeIndex) -> bool {
        if self
            .graph
            .edges_directed(v, Direction::Incoming)
            .any(|e| e.weight().is_ref())
        {
            return false;
        }
        if self
            .graph
            .edges_directed(v, Direction::Outgoing)
            .any(|e| e.weight().is_ref())
        {
            return true;
        }
        self.vertex_count() == 1
    }

    pub fn is_ref_sink(&self, v: NodeIndex) -> bool {
        if self
            .graph
            .edges_directed(v, Direction::Outgoing)
            .any(|e| e.weight().is_ref())
        {
            return false;
        }
        if self
            .graph
            .edges_directed(v, Direction::Incoming)
            .any(|e| e.weight().is_ref())
        {
            return true;
        }
        self.vertex_count() == 1
    }

    pub fn sources(&self) -> Vec<NodeIndex> {
        self.vertices().filter(|&v| self.is_source(v)).collect()
    }

    pub fn sinks(&self) -> Vec<NodeIndex> {
        self.vertices().filter(|&v| self.is_sink(v)).collect()
    }

    pub fn reference_source_vertex(&self) -> Option<NodeIndex> {
        self.vertices().find(|&v| self.is_ref_source(v))
    }

    pub fn reference_sink_vertex(&self) -> Option<NodeIndex> {
        self.vertices().find(|&v| self.is_ref_sink(v))
    }

    /// Follow the outgoing reference edge of `v`. With `allow_non_ref_paths`,
    /// a single non-blacklisted outgoing edge is followed when no reference
    /// edge exists.
    pub fn next_reference_vertex(
        &self,
        v: NodeIndex,
        allow_non_ref_paths: bool,
        blacklisted_edges: &[EdgeIndex],
    ) -> Option<NodeIndex> {
        for e in self.graph.edges_directed(v, Direction::Outgoing) {
            if e.weight().is_ref() {
                return Some(e.target());
            }
        }
        if allow_non_ref_paths {
            let candidates: Vec<NodeIndex> = self
                .graph
                .edges_directed(v, Direction::Outgoing)
                .filter(|e| !blacklisted_edges.contains(&e.id()))
                .map(|e| e.target())
                .collect();
            if candidates.len() == 1 {
                return Some(candidates[0]);
            }
        }
        None
    }

    /// Follow the incoming reference edge of `v`.
    pub fn prev_reference_vertex(&self, v: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .edges_directed(v, Direction::Incoming)
            .find(|e| e.weight().is_ref())
            .map(|e| e.source())
    }

    /// The bases this vertex contributes to a path through it.
    pub fn additional_sequence(&self, v: NodeIndex) -> &[u8] {
        self.vertex(v).additional_sequence(self.is_source(v))
    }

    /// Walk the reference path from `from` towards `to`, concatenating each
    /// vertex's contribution.
    pub fn reference_bytes(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        include_start: bool,
        include_stop: bool,
    ) -> Vec<u8> {
        let mut bytes = Vec::new();
        if include_start {
            bytes.extend_from_slice(self.additional_sequence(from));
        }
        let mut v = self.next_reference_vertex(from, false, &[]);
        while let Some(u) = v {
            if u == to {
                break;
            }
            bytes.extend_from_slice(self.additional_sequence(u));
            v = self.next_reference_vertex(u, false, &[]);
        }
        if include_stop && v == Some(to) {
            bytes.extend_from_slice(self.additional_sequence(to));
        }
        bytes
    }

    /// Remove every non-reference edge whose pruning multiplicity falls below
    /// `prune_factor`, then sweep the vertices that ended up disconnected.
    pub fn prune_low_weight_chains(&mut self, prune_factor: u64) {
        let doomed: Vec<EdgeIndex> = self
            .graph
            .edge_indices()
            .filter(|&e| {
                let w = &self.graph[e];
                !w.is_ref() && w.pruning_multiplicity() < prune_factor
            })
            .collect();
        for e in doomed {
            self.graph.remove_edge(e);
        }
        self.remove_singleton_orphan_vertices();
    }

    /// Remove edges that lead into the reference source or out of the
    /// reference sink, transitively, then sweep orphans.
    pub fn clean_non_ref_paths(&mut self) {
        let (Some(ref_source), Some(ref_sink)) =
            (self.reference_source_vertex(), self.reference_sink_vertex())
        else {
            return;
        };

        let mut to_check: Vec<EdgeIndex> = self.incoming_edges(ref_source).collect();
        while let Some(e) = to_check.pop() {
            let Some(weight) = self.graph.edge_weight(e) else {
                continue;
            };
            if !weight.is_ref() {
                let (source, _) = self.graph.edge_endpoints(e).unwrap();
                to_check.extend(self.incoming_edges(source));
                self.graph.remove_edge(e);
            }
        }

        let mut to_check: Vec<EdgeIndex> = self.outgoing_edges(ref_sink).collect();
        while let Some(e) = to_check.pop() {
            let Some(weight) = self.graph.edge_weight(e) else {
                continue;
            };
            if !weight.is_ref() {
                let (_, target) = self.graph.edge_endpoints(e).unwrap();
                to_check.extend(self.outgoing_edges(target));
                self.graph.remove_edge(e);
            }
        }

        self.remove_singleton_orphan_vertices();
    }

    /// Remove every vertex with no edges left in either direction.
    pub fn remove_singleton_orphan_vertices(&mut self) {
        let doomed: Vec<NodeIndex> = self
            .vertices()
            .filter(|&v| self.in_degree(v) == 0 && self.out_degree(v) == 0 && !self.is_ref_source(v))
            .collect();
        for v in doomed {
            self.graph.remove_node(v);
        }
    }

    /// Keep only vertices lying on some directed path from the reference
    /// source to the reference sink. Afterwards the graph has exactly one
    /// source and one sink.
    pub fn remove_paths_not_connected_to_ref(&mut self) {
        let ref_source = self
            .reference_source_vertex()
            .expect("graph must have a reference source vertex");
        let ref_sink = self
            .reference_sink_vertex()
            .expect("graph must have a reference sink vertex");

        let mut from_source = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, ref_source);
        while let Some(v) = dfs.next(&self.graph) {
            from_source.insert(v);
        }

        let mut from_sink = HashSet::new();
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, ref_sink);
        while let Some(v) = dfs.next(reversed) {
            from_sink.insert(v);
        }

        let doomed: Vec<NodeIndex> = self
            .vertices()
            .filter(|v| !(from_source.contains(v) && from_sink.contains(v)))
            .collect();
        for v in doomed {
            self.graph.remove_node(v);
        }

        let sinks = self.sinks();
        assert!(
            sinks.len() <= 1,
            "should have eliminated all but the reference sink, but found {} sinks",
            sinks.len()
        );
        let sources = self.sources();
        assert!(
            sources.len() <= 1,
            "should have eliminated all but the reference source, but found {} sources",
            sources.len()
        );
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Collapse into a sequence graph: sources keep their whole sequence,
    /// every other vertex contributes its suffix base; edges carry over the
    /// reference flag and multiplicity.
    pub fn convert_to_sequence_graph(&self) -> SeqGraph {
        let mut seq_graph = AssemblyGraph::new(self.kmer_size);
        let mut vertex_map: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        for v in self.vertices() {
            let mut seq_vertex = SeqVertex::new(self.additional_sequence(v).to_vec());
            seq_vertex.set_additional_info(self.vertex(v).additional_info());
            vertex_map.insert(v, seq_graph.add_vertex(seq_vertex));
        }

        for e in self.graph.edge_references() {
            let w = e.weight();
            seq_graph.add_edge(
                vertex_map[&e.source()],
                vertex_map[&e.target()],
                SeqEdge::new(w.is_ref(), w.multiplicity()),
            );
        }

        seq_graph
    }

    /// Lenient structural comparison: same counts, every vertex and edge can
    /// find a sequence-equal partner in the other graph.
    pub fn graph_equals(g1: &Self, g2: &Self) -> bool {
        if g1.vertex_count() != g2.vertex_count() || g1.edge_count() != g2.edge_count() {
            return false;
        }

        for v1 in g1.vertices() {
            if !g2.vertices().any(|v2| g1.vertex(v1).sequence() == g2.vertex(v2).sequence()) {
                return false;
            }
        }

        let seq_equal = |ga: &Self, ea: EdgeIndex, gb: &Self, eb: EdgeIndex| {
            ga.vertex(ga.edge_source(ea)).sequence() == gb.vertex(gb.edge_source(eb)).sequence()
                && ga.vertex(ga.edge_target(ea)).sequence() == gb.vertex(gb.edge_target(eb)).sequence()
        };
        for e1 in g1.edges() {
            if !g2.edges().any(|e2| seq_equal(g1, e1, g2, e2)) {
                return false;
            }
        }
        for e2 in g2.edges() {
            if !g1.edges().any(|e1| seq_equal(g2, e2, g1, e1)) {
                return false;
            }
        }
        true
    }

    /// Dump the graph in DOT for visualization. Edges at or below
    /// `prune_factor` render dotted, reference edges red.
    pub fn write_dot<W: Write>(&self, out: &mut W, prune_factor: u64) -> io::Result<()> {
        writeln!(out, "digraph assemblyGraphs {{")?;
        for e in self.graph.edge_references() {
            let w = e.weight();
            let style = if w.multiplicity() > 0 && w.multiplicity() <= prune_factor {
                "dotted"
            } else {
                "solid"
            };
            let color = if w.is_ref() { ",color=red" } else { "" };
            writeln!(
                out,
                "\t{} -> {} [label=\"{}\",style={}{}];",
                self.vertex(e.source()),
                self.vertex(e.target()),
                w.dot_label(),
                style,
                color
            )?;
        }
        for v in self.vertices() {
            writeln!(
                out,
                "\t{} [label=\"{}{}\",shape=box];",
                self.vertex(v),
                String::from_utf8_lossy(self.additional_sequence(v)),
                self.vertex(v).additional_info()
            )?;
        }
        writeln!(out, "}}")
    }

    pub fn print_graph(&self, destination: &Path, prune_factor: u64) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(destination)?);
        self.write_dot(&mut out, prune_factor)
    }
}
