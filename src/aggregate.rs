//! Reduces per-frame classifications of a clip to a single decision.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResult;
use crate::error::EmptySequence;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDecision {
    pub label_index: usize,
    /// Mean confidence of the frames that voted for `label_index`.
    pub mean_confidence: f32,
    pub supporting_frames: usize,
    pub total_frames: usize,
}

impl AggregateDecision {
    /// Share of frames that agreed with the winner.
    pub fn agreement(&self) -> f32 {
        self.supporting_frames as f32 / self.total_frames as f32
    }
}

/// Majority vote over `results`; ties go to the lowest label index.
pub fn aggregate(results: &[ClassificationResult]) -> Result<AggregateDecision, EmptySequence> {
    if results.is_empty() {
        return Err(EmptySequence);
    }

    let mut votes: BTreeMap<usize, (usize, f32)> = BTreeMap::new();
    for result in results {
        let slot = votes.entry(result.label_index).or_insert((0, 0.0));
        slot.0 += 1;
        slot.1 += result.confidence;
    }

    // `max_by_key` keeps the last maximum, so walk in reverse to favour low indices.
    let (label_index, (count, confidence_sum)) = votes
        .into_iter()
        .rev()
        .max_by_key(|(_, (count, _))| *count)
        .ok_or(EmptySequence)?;

    Ok(AggregateDecision {
        label_index,
        mean_confidence: confidence_sum / count as f32,
        supporting_frames: count,
        total_frames: results.len(),
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn results(pairs: &[(usize, f32)]) -> Vec<ClassificationResult> {
        pairs
            .iter()
            .map(|&(label, confidence)| ClassificationResult::new(label, confidence))
            .collect()
    }

    #[test]
    fn majority_label_wins() {
        let decision = aggregate(&results(&[(3, 0.9), (3, 0.95), (1, 0.99), (3, 0.85)])).unwrap();
        assert_eq!(decision.label_index, 3);
        assert_abs_diff_eq!(decision.mean_confidence, 0.9, epsilon = 1e-6);
        assert_eq!(decision.supporting_frames, 3);
        assert_eq!(decision.total_frames, 4);
        assert_abs_diff_eq!(decision.agreement(), 0.75);
    }

    #[test]
    fn ties_go_to_lowest_index() {
        let decision = aggregate(&results(&[(4, 0.6), (2, 0.5), (4, 0.7), (2, 0.9)])).unwrap();
        assert_eq!(decision.label_index, 2);
        assert_abs_diff_eq!(decision.mean_confidence, 0.7, epsilon = 1e-6);
    }

    #[test]
    fn single_frame_is_its_own_decision() {
        let decision = aggregate(&results(&[(0, 0.42)])).unwrap();
        assert_eq!(decision.label_index, 0);
        assert_abs_diff_eq!(decision.mean_confidence, 0.42);
    }

    #[test]
    fn sparse_label_indices_are_counted() {
        let decision = aggregate(&results(&[(usize::MAX, 0.8), (7, 0.6), (usize::MAX, 0.6)])).unwrap();
        assert_eq!(decision.label_index, usize::MAX);
        assert_abs_diff_eq!(decision.mean_confidence, 0.7, epsilon = 1e-6);
        assert_eq!(decision.supporting_frames, 2);
    }

    #[test]
    fn empty_sequence_is_rejected() {
        assert_eq!(aggregate(&[]), Err(EmptySequence));
    }
}
