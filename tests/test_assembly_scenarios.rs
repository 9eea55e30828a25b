use kloom::{AssemblyRead, GraphEdge, GraphVertex, Kmer, SeqGraph, ThreadingGraph};
use rand::Rng;

fn init_logging() {
    let _ = pretty_env_logger::try_init();
}

/// Thread a reference and reads end to end, recover both kinds of dangling
/// branches, clean up, and collapse to a sequence graph.
#[test]
fn full_pipeline_over_two_samples() {
    init_logging();

    let reference = b"TCAGTCGAATGCTACGGACC";
    let mut graph = ThreadingGraph::new(4, false, 10, 2);
    graph.add_sequence("ref", "anonymous", reference.to_vec(), 0, reference.len(), 1, true);

    // sample A: two clean reads over the reference
    for (i, window) in [(0usize, 12usize), (6, 20)].iter().enumerate() {
        let read = AssemblyRead::new(
            &format!("a{i}"),
            "sampleA",
            reference[window.0..window.1].to_vec(),
            vec![30; window.1 - window.0],
        );
        graph.add_read(&read);
    }
    // sample B: a read with a SNP inside, plus one with a low-quality gap
    let mut snp_read = reference[2..16].to_vec();
    snp_read[5] = b'T';
    graph.add_read(&AssemblyRead::new("b0", "sampleB", snp_read, vec![30; 14]));
    let mut quals = vec![30u8; reference.len()];
    quals[10] = 2;
    graph.add_read(&AssemblyRead::new("b1", "sampleB", reference.to_vec(), quals));

    graph.build_graph_if_necessary();
    assert!(graph.is_built());
    assert!(!graph.graph.has_cycles());

    graph.recover_dangling_tails(1, 2);
    graph.recover_dangling_heads(1, 2);
    graph.prune_low_weight_chains(1);
    graph.remove_paths_not_connected_to_ref();
    assert_eq!(graph.graph.sources().len(), 1);
    assert_eq!(graph.graph.sinks().len(), 1);

    let seq_graph: SeqGraph = graph.convert_to_sequence_graph();
    assert_eq!(seq_graph.vertex_count(), graph.graph.vertex_count());
    assert_eq!(seq_graph.edge_count(), graph.graph.edge_count());

    // the reference spells itself back out of the collapsed graph
    let source = seq_graph.reference_source_vertex().unwrap();
    let sink = seq_graph.reference_sink_vertex().unwrap();
    assert_eq!(seq_graph.reference_bytes(source, sink, true, true), reference);
}

/// The graph is deterministic for a fixed input set.
#[test]
fn rebuilt_graphs_are_structurally_identical() {
    init_logging();

    let build = || {
        let mut graph = ThreadingGraph::with_kmer_size(5);
        let reference = b"ACCGGTTAACAGTCAGTACG";
        graph.add_sequence("ref", "anonymous", reference.to_vec(), 0, reference.len(), 1, true);
        graph.add_sequence("r1", "sampleA", b"ACCGGTTAACAGT".to_vec(), 0, 13, 1, false);
        graph.add_sequence("r2", "sampleA", b"TAACAGTCAGTACG".to_vec(), 0, 14, 1, false);
        graph.build_graph_if_necessary();
        graph
    };
    let first = build();
    let second = build();
    assert!(kloom::KmerGraph::graph_equals(&first.graph, &second.graph));
}

fn random_reference_with_unique_kmers(rng: &mut impl Rng, len: usize, kmer_size: usize) -> Vec<u8> {
    let alphabet = [b'A', b'C', b'G', b'T'];
    'attempt: loop {
        let reference: Vec<u8> = (0..len).map(|_| alphabet[rng.gen_range(0..4)]).collect();
        let mut seen = std::collections::HashSet::new();
        for window in reference.windows(kmer_size) {
            if !seen.insert(window.to_vec()) {
                continue 'attempt;
            }
        }
        return reference;
    }
}

/// Multiplicity conservation: for exact-copy reads over a repeat-free
/// reference, every reference edge's multiplicity is predictable from the
/// read windows alone. Forward threading covers the transitions inside a
/// window; the backward count propagation additionally reaches up to
/// `kmer_size - 1` transitions upstream of each window start.
#[test]
fn multiplicities_match_the_window_oracle() {
    init_logging();

    let mut rng = rand::thread_rng();
    let kmer_size = 10;
    let len = 60;

    for _ in 0..10 {
        let reference = random_reference_with_unique_kmers(&mut rng, len, kmer_size);
        let mut graph = ThreadingGraph::with_kmer_size(kmer_size);
        graph.add_sequence("ref", "anonymous", reference.clone(), 0, len, 1, true);

        let mut windows = Vec::new();
        for i in 0..12 {
            // a window must hold at least two kmers: the anchor scan stops
            // short of the final kmer position, so a one-kmer window never
            // threads at all
            let start = rng.gen_range(0..len - kmer_size);
            let stop = rng.gen_range(start + kmer_size + 1..=len);
            windows.push((start, stop));
            let name = format!("read{i}");
            graph.add_sequence(&name, "sampleA", reference.clone(), start, stop, 1, false);
        }
        graph.build_graph_if_necessary();

        // no repeats, so the graph stays a single reference path
        assert_eq!(graph.graph.vertex_count(), len - kmer_size + 1);
        assert_eq!(graph.graph.edge_count(), len - kmer_size);

        let mut vertex = graph.graph.reference_source_vertex().unwrap();
        for transition in 0..len - kmer_size {
            let next = graph.graph.next_reference_vertex(vertex, false, &[]).unwrap();
            let edge = graph.graph.get_edge(vertex, next).unwrap();
            let forward = windows
                .iter()
                .filter(|(start, stop)| *start <= transition && transition + kmer_size < *stop)
                .count() as u64;
            let backward = windows
                .iter()
                .filter(|(start, _)| transition < *start && *start <= transition + kmer_size - 1)
                .count() as u64;
            assert_eq!(
                graph.graph.edge(edge).multiplicity(),
                1 + forward + backward,
                "transition {transition} of reference {}",
                String::from_utf8_lossy(&reference)
            );
            vertex = next;
        }
    }
}

/// Conversion keeps path spelling intact for branching graphs too.
#[test]
fn sequence_graph_preserves_alternate_haplotype_spelling() {
    init_logging();

    let mut graph = ThreadingGraph::with_kmer_size(4);
    let reference = b"AAACCCGGG";
    graph.add_sequence("ref", "anonymous", reference.to_vec(), 0, 9, 1, true);
    graph.add_sequence("r", "sampleA", b"AAACTCGGG".to_vec(), 0, 9, 1, false);
    let seq_graph = graph.convert_to_sequence_graph();

    // walk the alternate branch: source, then always prefer non-ref edges
    let mut haplotype: Vec<u8> = Vec::new();
    let mut vertex = seq_graph.reference_source_vertex().unwrap();
    haplotype.extend_from_slice(seq_graph.vertex(vertex).sequence());
    loop {
        let mut next = None;
        let outgoing: Vec<_> = seq_graph.outgoing_edges(vertex).collect();
        for e in &outgoing {
            if !seq_graph.edge(*e).is_ref() {
                next = Some(seq_graph.edge_target(*e));
                break;
            }
        }
        if next.is_none() {
            next = outgoing.first().map(|e| seq_graph.edge_target(*e));
        }
        match next {
            Some(v) => {
                haplotype.extend_from_slice(seq_graph.vertex(v).sequence());
                vertex = v;
            }
            None => break,
        }
    }
    assert_eq!(haplotype, b"AAACTCGGG");
}

/// Unique-kmer bookkeeping honors its invariants across the lifecycle.
#[test]
fn unique_and_non_unique_kmers_stay_disjoint() {
    init_logging();

    let mut graph = ThreadingGraph::with_kmer_size(4);
    let reference = b"AAAAACCCCCGGGGG";
    graph.add_sequence("ref", "anonymous", reference.to_vec(), 0, 15, 1, true);
    graph.add_sequence("r", "sampleA", b"AACCCCCGGG".to_vec(), 0, 10, 1, false);
    graph.build_graph_if_necessary();

    for kmer in graph.unique_kmers().keys() {
        assert!(!graph.non_unique_kmers().contains(kmer));
    }
    let mut ids = std::collections::HashSet::new();
    for (_, &v) in graph.unique_kmers() {
        assert!(ids.insert(graph.graph.vertex(v).id()), "duplicate vertex in the kmer index");
    }
    assert!(graph.find_kmer(&Kmer::from_bases(b"AACC".to_vec())).is_some());
    assert!(graph.find_kmer(&Kmer::from_bases(b"AAAA".to_vec())).is_none());
}
