//! Where completed sessions go.

mod database;
mod helpers;
mod migrations;
mod sink;

pub use database::Database;
pub use sink::{MemorySink, SessionRecord, SessionSink, SinkFuture};
