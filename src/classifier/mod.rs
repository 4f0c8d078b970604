//! Gesture classification over normalized hand keypoints.

pub mod model;
pub mod network;
pub mod shared;
pub mod training;

use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::landmark::NormalizedKeypointSet;

pub use model::GestureModel;
pub use shared::SharedModel;
pub use training::{EpochMetrics, TrainingConfig, TrainingHistory};

/// Per-frame prediction: the winning label and its probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub label_index: usize,
    pub confidence: f32,
}

impl ClassificationResult {
    pub fn new(label_index: usize, confidence: f32) -> Self {
        Self {
            label_index,
            confidence,
        }
    }

    /// Picks the most probable class of a softmax distribution.
    ///
    /// Returns `None` for an empty distribution.
    pub fn from_distribution(distribution: &[f32]) -> Option<Self> {
        if distribution.is_empty() {
            return None;
        }
        let label_index = training::argmax(distribution.iter().copied());
        Some(Self::new(
            label_index,
            distribution[label_index].clamp(0.0, 1.0),
        ))
    }

    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

/// The fixed, ordered set of gesture names a model predicts over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelVocabulary(Vec<String>);

impl LabelVocabulary {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    /// Everyday ASL phrases used by the demo deployment.
    pub fn asl_demo() -> Self {
        Self::new([
            "Hello",
            "Thank you",
            "Please",
            "Yes",
            "No",
            "Good morning",
            "How are you?",
        ])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.0.iter().position(|l| l == label)
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self::asl_demo()
    }
}

/// Something that turns one normalized hand into a [`ClassificationResult`].
///
/// The recognizer and the session machine only see this trait, so a trained
/// [`GestureModel`], a hot-swappable [`SharedModel`] or a test stub can be
/// plugged in.
pub trait Classify: Send + Sync + 'static {
    fn classify(
        &self,
        keypoints: &NormalizedKeypointSet,
    ) -> Result<ClassificationResult, ClassifierError>;

    /// Name of the label at `index`, if the vocabulary has one.
    fn label(&self, index: usize) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_picks_highest_probability() {
        let result = ClassificationResult::from_distribution(&[0.1, 0.7, 0.2]).unwrap();
        assert_eq!(result.label_index, 1);
        assert_eq!(result.confidence, 0.7);
        assert!(result.is_confident(0.5));
        assert!(!result.is_confident(0.85));
        assert!(ClassificationResult::from_distribution(&[]).is_none());
    }

    #[test]
    fn vocabulary_lookup() {
        let vocabulary = LabelVocabulary::asl_demo();
        assert_eq!(vocabulary.len(), 7);
        assert_eq!(vocabulary.get(0), Some("Hello"));
        assert_eq!(vocabulary.index_of("No"), Some(4));
        assert_eq!(vocabulary.get(7), None);
    }
}
