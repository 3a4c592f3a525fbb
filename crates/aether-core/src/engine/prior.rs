//! Prior estimation.
//!
//! A node's prior is its intrinsic, structure-independent confidence. It must
//! reflect design-time quality rather than the evolving posterior, so the
//! sources are consulted in a fixed order:
//!
//! 1. custom attributes (authoritative): mean of their confidences;
//! 2. tags: percentages, plain numbers in `[0, 1]` and qualitative status
//!    levels, blended with a neutral optimism constant;
//! 3. the last committed working belief;
//! 4. [`DEFAULT_PRIOR`].

use crate::engine::graph::{FieldValue, NodeData, ProcessGraph};
use crate::engine::runners::Topology;

/// Prior for a node with no intrinsic signal at all.
pub const DEFAULT_PRIOR: f64 = 0.95;

/// Weight of the tag-derived mean when blending with [`DEFAULT_PRIOR`].
const TAG_SIGNAL_WEIGHT: f64 = 0.6;

/// Tag keys containing one of these fragments are read as qualitative levels.
const QUALITATIVE_KEYS: [&str; 3] = ["status", "quality", "health"];

/// Confidence for a node, in `[0, 1]`.
pub fn prior_of(node: &NodeData) -> f64 {
    if let Some(attrs) = node.custom_attributes.as_ref().filter(|a| !a.is_empty()) {
        let sum: f64 = attrs.values().map(|a| a.confidence).sum();
        return (sum / attrs.len() as f64).clamp(0.0, 1.0);
    }

    if let Some(tags) = &node.tags {
        let factors: Vec<f64> = tags
            .iter()
            .filter_map(|(key, value)| tag_factor(key, value))
            .collect();
        if !factors.is_empty() {
            let mean = factors.iter().sum::<f64>() / factors.len() as f64;
            return (TAG_SIGNAL_WEIGHT * mean + (1.0 - TAG_SIGNAL_WEIGHT) * DEFAULT_PRIOR)
                .clamp(0.0, 1.0);
        }
    }

    node.working_belief().unwrap_or(DEFAULT_PRIOR)
}

/// Dense prior vector in topology order.
pub fn prior_table(graph: &ProcessGraph, topology: &Topology) -> Vec<f64> {
    topology
        .ids()
        .iter()
        .map(|id| graph.node(id.as_str()).map_or(DEFAULT_PRIOR, prior_of))
        .collect()
}

/// Interprets one tag as a confidence factor, if it carries one.
fn tag_factor(key: &str, value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Number(n) => unit_interval(*n),
        FieldValue::Text(text) => {
            let text = text.trim();
            if let Some(percent) = text.strip_suffix('%') {
                let n: f64 = percent.trim().parse().ok()?;
                return n.is_finite().then(|| (n / 100.0).clamp(0.0, 1.0));
            }
            if let Ok(n) = text.parse::<f64>() {
                return unit_interval(n);
            }
            let key = key.to_ascii_lowercase();
            if QUALITATIVE_KEYS.iter().any(|k| key.contains(k)) {
                qualitative_level(text)
            } else {
                None
            }
        }
    }
}

fn unit_interval(n: f64) -> Option<f64> {
    (n.is_finite() && (0.0..=1.0).contains(&n)).then_some(n)
}

fn qualitative_level(text: &str) -> Option<f64> {
    match text.to_ascii_lowercase().as_str() {
        "high" | "ok" | "good" => Some(0.98),
        "medium" | "fair" => Some(0.85),
        "low" | "poor" | "bad" => Some(0.60),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::graph::{DomainContext, NodeKind, WORKING_BELIEF};

    fn node() -> NodeData {
        NodeData::new("n", NodeKind::Part, DomainContext::Manufacturing)
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn attributes_override_tags_and_beliefs() {
        let n = node()
            .with_attribute("surface", "Ra0.8", 0.9)
            .with_attribute("hardness", 58.0, 0.7)
            .with_tag("quality", "bad")
            .with_belief(WORKING_BELIEF, 0.1);
        assert_close(prior_of(&n), 0.8);
    }

    #[test]
    fn tags_blend_with_optimism_constant() {
        // factors: 80% -> 0.8, 0.5 -> 0.5, status=medium -> 0.85; mean = 0.7166..
        let n = node()
            .with_tag("yield", "80%")
            .with_tag("calibration", 0.5)
            .with_tag("Machine Status", "Medium");
        let mean = (0.8 + 0.5 + 0.85) / 3.0;
        assert_close(prior_of(&n), 0.6 * mean + 0.4 * 0.95);
    }

    #[test]
    fn uninformative_tags_fall_back_to_working_belief() {
        let n = node()
            .with_tag("owner", "line-3")
            .with_tag("torque", 42.0)
            .with_tag("quality", "unknown")
            .with_tag("bogus", "NaN")
            .with_belief(WORKING_BELIEF, 0.42);
        assert_close(prior_of(&n), 0.42);
    }

    #[test]
    fn qualitative_levels_need_a_status_like_key() {
        let n = node().with_tag("colour", "good");
        assert_close(prior_of(&n), DEFAULT_PRIOR);
        let n = node().with_tag("health_check", "POOR");
        assert_close(prior_of(&n), 0.6 * 0.6 + 0.4 * 0.95);
    }

    #[test]
    fn default_prior_without_any_signal() {
        assert_close(prior_of(&node()), DEFAULT_PRIOR);
    }
}
