//! Property tests for score ranges, evidence pinning and sensitivity signs.

use aether_core::{
    AlgorithmId, BeliefEngine, DomainContext, EdgeData, EdgeKind, EngineConfig, Evidence,
    NodeData, NodeId, NodeKind, ProcessGraph,
};
use proptest::prelude::*;

const CONTEXTS: [DomainContext; 3] = [
    DomainContext::Design,
    DomainContext::Manufacturing,
    DomainContext::Support,
];

#[derive(Debug, Clone)]
struct Plant {
    confidences: Vec<Option<f64>>,
    edges: Vec<(usize, usize)>,
    evidence: Vec<Option<f64>>,
}

impl Plant {
    fn graph(&self) -> ProcessGraph {
        let mut g = ProcessGraph::default();
        for (i, confidence) in self.confidences.iter().enumerate() {
            let mut node = NodeData::new(format!("n{}", i), NodeKind::Part, CONTEXTS[i % 3]);
            if let Some(c) = confidence {
                node = node.with_attribute("grade", "x", *c);
            }
            g.add_node(node).unwrap();
        }
        for (k, &(s, t)) in self.edges.iter().enumerate() {
            if s != t {
                g.add_edge(EdgeData::new(
                    format!("e{}", k),
                    format!("n{}", s),
                    format!("n{}", t),
                    EdgeKind::Structural,
                ))
                .unwrap();
            }
        }
        g
    }

    fn evidence(&self) -> Evidence {
        self.evidence
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|v| (NodeId::from(format!("n{}", i)), v)))
            .collect()
    }
}

fn plant_strategy() -> impl Strategy<Value = Plant> {
    (2usize..7).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::option::of(0.0f64..=1.0), n),
            prop::collection::vec((0..n, 0..n), 0..(2 * n)),
            prop::collection::vec(prop::option::weighted(0.3, 0.0f64..=1.0), n),
        )
            .prop_map(|(confidences, edges, evidence)| Plant {
                confidences,
                edges,
                evidence,
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_runner_keeps_scores_in_range_and_evidence_exact(plant in plant_strategy(), seed in 0u64..1000) {
        let ev = plant.evidence();
        for algorithm in AlgorithmId::ALL {
            let mut g = plant.graph();
            let mut engine = BeliefEngine::new(EngineConfig::seeded(seed)).unwrap();
            let report = engine
                .analyze_detailed(&mut g, &ev, &[algorithm].into_iter().collect(), true)
                .unwrap();
            let run = &report.runs[0];
            let floor = if algorithm == AlgorithmId::LogReg { 0.2 } else { 0.1 };
            prop_assert!(run.reliability >= floor && run.reliability <= 1.0);
            for (id, s) in &run.scores {
                prop_assert!((0.0..=1.0).contains(s), "{} {} = {}", algorithm, id, s);
                if let Some(e) = ev.get(id) {
                    prop_assert_eq!(*s, *e);
                }
            }
            for (id, e) in &ev {
                prop_assert_eq!(report.scores[id], *e);
            }
        }
    }

    #[test]
    fn sensitivity_values_are_non_negative(plant in plant_strategy(), target in 0usize..7, use_dt in any::<bool>()) {
        let g = plant.graph();
        let target = format!("n{}", target % plant.confidences.len());
        let algorithm = if use_dt { AlgorithmId::Dt } else { AlgorithmId::Bn };
        let mut engine = BeliefEngine::new(EngineConfig::seeded(0)).unwrap();
        let report = engine
            .run_sensitivity_analysis(&g, &target, &plant.evidence(), algorithm)
            .unwrap();
        for (key, value) in report.iter() {
            prop_assert!(value >= 0.0 && value.is_finite(), "{} = {}", key, value);
        }
    }
}
