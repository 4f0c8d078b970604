//! Error taxonomy shared by the recognition pipeline and the session machine.

use thiserror::Error;

/// Failures while turning an encoded frame into hand keypoints.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The frame buffer is not a decodable, non-empty color image.
    #[error("frame decode failed: {0}")]
    Decode(String),

    /// The hand-pose estimator itself failed on an otherwise valid frame.
    #[error("hand pose estimator failed: {0}")]
    Estimator(#[source] anyhow::Error),
}

/// All keypoints coincide, so the set has no usable scale.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("degenerate keypoint set: all points coincide")]
pub struct DegenerateInput;

/// Aggregation was asked to decide over zero classifications.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no classifications to aggregate (no gesture detected)")]
pub struct EmptySequence;

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The model was neither built nor loaded.
    #[error("classifier is not ready: build or load a model first")]
    NotReady,

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("model I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures of the frame → label pipeline.
#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Empty(#[from] EmptySequence),
}

/// Guard and pipeline failures reported by the session machine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session '{0}'")]
    NotFound(String),

    #[error("requester is not the owner of session '{0}'")]
    Authorization(String),

    #[error("session '{id}' is {status}, cannot {action}")]
    InvalidState {
        id: String,
        status: &'static str,
        action: &'static str,
    },

    #[error(transparent)]
    Decode(ExtractError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("internal error: {0}")]
    Internal(String),
}
