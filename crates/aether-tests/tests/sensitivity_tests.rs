//! Influence ranking via perturbation.

mod common;

use aether_core::{commit, run_sensitivity_analysis, AlgorithmId, ExecError};
use common::*;

#[test]
fn upstream_design_dominates_sensor_influence() {
    let g = plant();
    let report = engine(0)
        .run_sensitivity_analysis(&g, "S001", &evidence(&[]), AlgorithmId::Bn)
        .unwrap();
    assert!(!report.is_empty());
    for (key, influence) in report.iter() {
        assert!(influence > 0.005, "{} = {}", key, influence);
        assert!(!key.starts_with("S001"), "target reported: {}", key);
    }
    // the isolated spare cannot move the target
    assert!(report.get("SPARE").is_none());
    assert!(report.get("SPARE:shelf_life").is_none());
    // the direct parent is the strongest single lever
    assert_eq!(report.ranked()[0].0, "M001");
    assert!(report.get("D001:review").is_some());
}

#[test]
fn values_are_never_negative_for_either_estimator() {
    let g = plant();
    let ev = evidence(&[("S002", 0.3), ("M002", 0.6)]);
    for algorithm in [AlgorithmId::Bn, AlgorithmId::Dt] {
        for target in ["S001", "S002", "D001"] {
            let report = engine(0)
                .run_sensitivity_analysis(&g, target, &ev, algorithm)
                .unwrap();
            assert!(report.iter().all(|(_, v)| v >= 0.0 && v.is_finite()));
        }
    }
}

#[test]
fn evidenced_target_has_no_sensitivity() {
    let g = plant();
    let report = engine(0)
        .run_sensitivity_analysis(&g, "S001", &evidence(&[("S001", 0.2)]), AlgorithmId::Bn)
        .unwrap();
    assert!(report.is_empty());
}

#[test]
fn caller_graph_and_committed_beliefs_survive() {
    let mut g = plant();
    let scores = engine(0)
        .analyze(&mut g, &evidence(&[("S001", 0.1)]), &all_algorithms(), true)
        .unwrap();
    commit(&mut g, &scores).unwrap();
    let before: Vec<_> = g
        .sorted_node_ids()
        .into_iter()
        .map(|id| g.node(id.as_str()).cloned())
        .collect();

    run_sensitivity_analysis(&g, "S002", &evidence(&[("S001", 0.1)]), AlgorithmId::Dt).unwrap();

    let after: Vec<_> = g
        .sorted_node_ids()
        .into_iter()
        .map(|id| g.node(id.as_str()).cloned())
        .collect();
    assert_eq!(before, after);
}

#[test]
fn rejects_fused_or_sampling_estimators() {
    let g = plant();
    for algorithm in [
        AlgorithmId::Mcs,
        AlgorithmId::Mcmc,
        AlgorithmId::Lr,
        AlgorithmId::LogReg,
        AlgorithmId::Vi,
        AlgorithmId::Transformer,
    ] {
        let err = engine(0)
            .run_sensitivity_analysis(&g, "S001", &evidence(&[]), algorithm)
            .unwrap_err();
        assert!(matches!(err, ExecError::ValidationError(_)), "{}", algorithm);
    }
}
