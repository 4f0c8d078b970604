//! Sign language gesture recognition: hand landmarks in, labels out.
//!
//! Frames flow through [`landmark`] (decode, estimate, normalize) into a
//! [`classifier`], then either into [`aggregate`] for a finished clip or
//! into a live [`session`] that keeps running statistics.

pub mod aggregate;
pub mod app;
pub mod classifier;
pub mod error;
pub mod landmark;
pub mod recognizer;
pub mod session;
pub mod settings;
pub mod store;
pub mod utils;

pub use aggregate::{aggregate, AggregateDecision};
pub use app::AppState;
pub use classifier::{
    ClassificationResult, Classify, GestureModel, LabelVocabulary, SharedModel, TrainingConfig,
    TrainingHistory,
};
pub use error::{
    ClassifierError, DegenerateInput, EmptySequence, ExtractError, RecognizeError, SessionError,
};
pub use landmark::{
    decode_frame, normalize, HandPoseEstimator, KeypointSet, LandmarkExtractor,
    NormalizedKeypointSet,
};
pub use recognizer::{ClipRecognition, Recognition, Recognizer};
pub use session::{
    FrameOutcome, OpenAiRefiner, Quality, Refiner, Session, SessionEvent, SessionManager,
    SessionPage, SessionStatus, SessionSummary, StatusFilter, TranslationEvent,
};
pub use settings::{Settings, SettingsStore};
pub use store::{Database, MemorySink, SessionRecord, SessionSink};
pub use utils::init_logger;
