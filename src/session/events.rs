use serde::Serialize;

use super::state::{Quality, SessionSummary, TranslationEvent};

/// Lifecycle notifications broadcast to subscribers of a `SessionManager`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        session_id: String,
        owner: String,
        language: String,
        quality: Quality,
    },
    #[serde(rename_all = "camelCase")]
    FrameProcessed {
        session_id: String,
        frame_count: u64,
        translation: Option<TranslationEvent>,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        session_id: String,
        summary: SessionSummary,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Started { session_id, .. }
            | SessionEvent::FrameProcessed { session_id, .. }
            | SessionEvent::Completed { session_id, .. } => session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Started { .. } => "session_start",
            SessionEvent::FrameProcessed { .. } => "frame_processed",
            SessionEvent::Completed { .. } => "session_end",
        }
    }
}
