//! Benchmarks for consensus fusion over layered plants.
//!
//! Run with:
//! - `cargo bench --bench fusion`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use aether_core::{
    AlgorithmId, AlgorithmSet, BeliefEngine, DomainContext, EdgeData, EdgeKind, EngineConfig,
    Evidence, NodeData, NodeId, NodeKind, ProcessGraph,
};

/// Three layers (design, manufacturing, support) of `width` nodes each, every
/// node feeding the two nodes below it (one when `width` is 1).
fn layered_plant(width: usize) -> ProcessGraph {
    let layers = [
        ("d", DomainContext::Design),
        ("m", DomainContext::Manufacturing),
        ("s", DomainContext::Support),
    ];
    let mut graph = ProcessGraph::default();
    for (prefix, context) in layers {
        for i in 0..width {
            let node = NodeData::new(format!("{prefix}{i:04}"), NodeKind::Part, context)
                .with_attribute("tolerance", 0.01, 0.8 + (i % 5) as f64 * 0.03);
            graph.add_node(node).expect("node");
        }
    }
    for pair in layers.windows(2) {
        let (upper, lower) = (pair[0].0, pair[1].0);
        for i in 0..width {
            let next = (i + 1) % width;
            let targets = if next == i { vec![i] } else { vec![i, next] };
            for j in targets {
                graph
                    .add_edge(EdgeData::new(
                        format!("{upper}{i:04}-{lower}{j:04}"),
                        format!("{upper}{i:04}"),
                        format!("{lower}{j:04}"),
                        EdgeKind::Structural,
                    ))
                    .expect("edge");
            }
        }
    }
    graph
}

fn bench_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");
    let selections: [(&str, AlgorithmSet); 2] = [
        ("bn", [AlgorithmId::Bn].into_iter().collect()),
        ("all", AlgorithmId::ALL.into_iter().collect()),
    ];
    for width in [1_usize, 8, 32, 128] {
        let graph = layered_plant(width);
        let evidence: Evidence = [(NodeId::from("s0000"), 0.3)].into_iter().collect();
        for (name, algorithms) in &selections {
            group.bench_with_input(BenchmarkId::new(*name, width), &graph, |b, graph| {
                let mut engine = BeliefEngine::new(EngineConfig::seeded(7)).expect("engine");
                b.iter(|| {
                    let mut g = graph.clone();
                    black_box(
                        engine
                            .analyze(&mut g, black_box(&evidence), algorithms, false)
                            .expect("analyze"),
                    )
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_fusion);
criterion_main!(benches);
