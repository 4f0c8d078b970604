use std::{future::Future, pin::Pin, sync::Mutex};

use serde::{Deserialize, Serialize};

use crate::session::{Session, SessionSummary, TranslationEvent};

/// Everything known about a session once it has completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session: Session,
    pub translations: Vec<TranslationEvent>,
    pub summary: SessionSummary,
}

pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Receives every completed session exactly once.
///
/// A failing sink never undoes the completion; the session manager logs the
/// error and moves on.
pub trait SessionSink: Send + Sync + 'static {
    fn persist<'a>(&'a self, record: &'a SessionRecord) -> SinkFuture<'a>;
}

/// Keeps completed sessions in memory, in completion order.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<SessionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl SessionSink for MemorySink {
    fn persist<'a>(&'a self, record: &'a SessionRecord) -> SinkFuture<'a> {
        Box::pin(async move {
            let mut guard = match self.records.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.push(record.clone());
            Ok(())
        })
    }
}
