//! Live recognition sessions: lifecycle, per-frame ingestion, statistics.

pub mod controller;
pub mod events;
pub mod refine;
pub mod state;

pub use controller::{FrameOutcome, SessionManager, SessionPage, StatusFilter};
pub use events::SessionEvent;
pub use refine::{refine_or_fallback, OpenAiRefiner, RefineFuture, Refiner};
pub use state::{Quality, Session, SessionSnapshot, SessionStatus, SessionSummary, TranslationEvent};
