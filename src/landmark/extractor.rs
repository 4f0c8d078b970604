//! Frame decoding and hand keypoint extraction.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

use super::keypoints::{normalize, KeypointSet, NormalizedKeypointSet};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// Detector thresholds handed to [`HandPoseEstimator`] adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EstimatorSettings {
    /// Minimum palm-detection score for a hand to be reported.
    pub min_detection_confidence: f32,
    /// Minimum landmark-presence score to keep following a tracked hand.
    pub min_tracking_confidence: f32,
    pub max_num_hands: usize,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.7,
            min_tracking_confidence: 0.5,
            max_num_hands: 1,
        }
    }
}

/// An external hand-pose estimation capability.
///
/// Implementations return the first detected hand in image coordinates, or
/// `None` when no hand is visible. They must not rely on per-call state for
/// correctness.
pub trait HandPoseEstimator: Send + Sync + 'static {
    fn estimate(&self, frame: &RgbImage) -> anyhow::Result<Option<KeypointSet>>;
}

impl<F> HandPoseEstimator for F
where
    F: Fn(&RgbImage) -> anyhow::Result<Option<KeypointSet>> + Send + Sync + 'static,
{
    fn estimate(&self, frame: &RgbImage) -> anyhow::Result<Option<KeypointSet>> {
        self(frame)
    }
}

/// Decodes an encoded image buffer (JPEG, PNG, ...) into an RGB pixel matrix.
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::Decode("empty frame buffer".into()));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|err| ExtractError::Decode(err.to_string()))?
        .into_rgb8();
    ensure_non_empty(&image)?;
    Ok(image)
}

fn ensure_non_empty(frame: &RgbImage) -> Result<(), ExtractError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(ExtractError::Decode(format!(
            "frame has no pixels ({}x{})",
            frame.width(),
            frame.height()
        )));
    }
    Ok(())
}

/// Runs a [`HandPoseEstimator`] on frames and normalizes what it finds.
pub struct LandmarkExtractor {
    estimator: Box<dyn HandPoseEstimator>,
}

impl LandmarkExtractor {
    pub fn new<E: HandPoseEstimator>(estimator: E) -> Self {
        Self {
            estimator: Box::new(estimator),
        }
    }

    /// Wraps a plain function or closure as the estimator.
    pub fn from_fn<F>(estimate: F) -> Self
    where
        F: Fn(&RgbImage) -> anyhow::Result<Option<KeypointSet>> + Send + Sync + 'static,
    {
        Self::new(estimate)
    }

    /// Extracts the normalized keypoints of the hand in `frame`.
    ///
    /// Returns `Ok(None)` when no hand is detected. A degenerate detection
    /// (all points on top of each other) is logged and also reported as
    /// `None`, since it carries no gesture information.
    pub fn extract(&self, frame: &RgbImage) -> Result<Option<NormalizedKeypointSet>, ExtractError> {
        ensure_non_empty(frame)?;

        let Some(keypoints) = self
            .estimator
            .estimate(frame)
            .map_err(ExtractError::Estimator)?
        else {
            log_debug!("no hand in {}x{} frame", frame.width(), frame.height());
            return Ok(None);
        };

        match normalize(&keypoints) {
            Ok(normalized) => Ok(Some(normalized)),
            Err(err) => {
                log_warn!("dropping hand detection: {err}");
                Ok(None)
            }
        }
    }

    /// Decodes `bytes` and extracts from the resulting frame.
    pub fn extract_bytes(&self, bytes: &[u8]) -> Result<Option<NormalizedKeypointSet>, ExtractError> {
        let frame = decode_frame(bytes)?;
        self.extract(&frame)
    }

    /// Extracts every frame of a clip, keeping only frames that contain a hand.
    ///
    /// Estimator failures on single frames are logged and skipped; a decode
    /// failure aborts the whole clip.
    pub fn extract_clip<'a, I>(&self, frames: I) -> Result<Vec<NormalizedKeypointSet>, ExtractError>
    where
        I: IntoIterator<Item = &'a RgbImage>,
    {
        let mut hands = Vec::new();
        for (index, frame) in frames.into_iter().enumerate() {
            match self.extract(frame) {
                Ok(Some(keypoints)) => hands.push(keypoints),
                Ok(None) => {}
                Err(ExtractError::Estimator(err)) => {
                    log_warn!("estimator failed on clip frame {index}: {err:#}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(hands)
    }
}
