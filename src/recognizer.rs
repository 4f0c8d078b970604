//! Frame and clip recognition: extractor → classifier (→ aggregator).

use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate, AggregateDecision};
use crate::classifier::{ClassificationResult, Classify};
use crate::error::{ClassifierError, RecognizeError};
use crate::landmark::{decode_frame, LandmarkExtractor, NormalizedKeypointSet};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Default cut-off below which a prediction is flagged as uncertain.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.85;

/// One classified frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recognition {
    pub label: String,
    pub result: ClassificationResult,
    pub confident: bool,
}

/// The decision over a whole clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipRecognition {
    pub label: String,
    pub decision: AggregateDecision,
    pub confident: bool,
}

pub struct Recognizer {
    extractor: LandmarkExtractor,
    classifier: Arc<dyn Classify>,
    confidence_threshold: f32,
}

impl Recognizer {
    pub fn new(extractor: LandmarkExtractor, classifier: Arc<dyn Classify>) -> Self {
        Self {
            extractor,
            classifier,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Classifies an already normalized hand.
    pub fn classify(&self, keypoints: &NormalizedKeypointSet) -> Result<Recognition, RecognizeError> {
        let result = self.classifier.classify(keypoints)?;
        Ok(Recognition {
            label: self.label(result.label_index)?,
            confident: result.is_confident(self.confidence_threshold),
            result,
        })
    }

    /// Runs the full pipeline on one encoded frame.
    ///
    /// `Ok(None)` means no usable hand was found in the frame.
    pub fn recognize_frame(&self, bytes: &[u8]) -> Result<Option<Recognition>, RecognizeError> {
        match self.extractor.extract_bytes(bytes)? {
            Some(keypoints) => self.classify(&keypoints).map(Some),
            None => Ok(None),
        }
    }

    /// Recognizes the single gesture performed over a decoded clip.
    ///
    /// A clip without any hand frame fails with `EmptySequence`.
    pub fn recognize_clip<'a, I>(&self, frames: I) -> Result<ClipRecognition, RecognizeError>
    where
        I: IntoIterator<Item = &'a RgbImage>,
    {
        let frames: Vec<&RgbImage> = frames.into_iter().collect();
        let total = frames.len();
        let hands = self.extractor.extract_clip(frames)?;

        let results = hands
            .iter()
            .map(|keypoints| self.classifier.classify(keypoints))
            .collect::<Result<Vec<_>, _>>()?;
        let decision = aggregate(&results)?;
        log_debug!(
            "clip of {total} frames: {} with a hand, label {} ({}/{} votes)",
            results.len(),
            decision.label_index,
            decision.supporting_frames,
            decision.total_frames
        );

        Ok(ClipRecognition {
            label: self.label(decision.label_index)?,
            confident: decision.mean_confidence >= self.confidence_threshold,
            decision,
        })
    }

    /// Decodes every buffer and recognizes the resulting clip.
    pub fn recognize_encoded_clip<B>(&self, buffers: &[B]) -> Result<ClipRecognition, RecognizeError>
    where
        B: AsRef<[u8]>,
    {
        let frames = buffers
            .iter()
            .map(|bytes| decode_frame(bytes.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.recognize_clip(&frames)
    }

    fn label(&self, index: usize) -> Result<String, ClassifierError> {
        self.classifier.label(index).ok_or_else(|| {
            ClassifierError::ShapeMismatch(format!("label index {index} is outside the vocabulary"))
        })
    }
}
