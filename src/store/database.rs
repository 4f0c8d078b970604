use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::oneshot;

use crate::session::{Quality, Session, SessionStatus, SessionSummary, TranslationEvent};

use super::helpers::{
    count_from_sql, count_to_sql, optional_timestamp_from_sql, timestamp_from_sql, timestamp_to_sql,
};
use super::migrations::run_migrations;
use super::sink::{SessionRecord, SessionSink, SinkFuture};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Work shipped to the connection thread.
type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Close,
}

/// Where the connection lives.
enum Target {
    File(PathBuf),
    Memory,
}

impl Target {
    fn connect(&self) -> Result<Connection> {
        let mut conn = match self {
            Target::File(path) => Connection::open(path)
                .with_context(|| format!("failed to open session store {}", path.display()))?,
            Target::Memory => {
                Connection::open_in_memory().context("failed to open in-memory session store")?
            }
        };

        // Pragma failures are logged and tolerated.
        for (pragma, value) in [("journal_mode", "WAL"), ("foreign_keys", "ON")] {
            if let Err(err) = conn.pragma_update(None, pragma, value) {
                log_error!("could not set {pragma}={value}: {err}");
            }
        }
        run_migrations(&mut conn)?;
        Ok(conn)
    }

    fn path(&self) -> Option<&Path> {
        match self {
            Target::File(path) => Some(path),
            Target::Memory => None,
        }
    }
}

/// The connection thread and the queue feeding it. Dropping the last handle
/// closes the queue and joins the thread.
struct Worker {
    requests: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn start(target: Arc<Target>) -> Result<Self> {
        let (requests, queue) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("gesturebridge-db".into())
            .spawn(move || match target.connect() {
                Ok(mut conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(&mut conn, queue);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn session store thread")?;

        ready_rx
            .recv()
            .context("session store thread exited during startup")??;

        Ok(Self {
            requests,
            thread: Mutex::new(Some(thread)),
        })
    }
}

fn serve(conn: &mut Connection, queue: mpsc::Receiver<Request>) {
    for request in queue {
        match request {
            Request::Run(job) => job(conn),
            Request::Close => break,
        }
    }
    log_info!("session store thread stopped");
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };
        if self.requests.send(Request::Close).is_err() {
            log_error!("session store thread was already gone at shutdown");
        }
        if handle.join().is_err() {
            log_error!("session store thread panicked");
        }
    }
}

/// SQLite store for completed sessions.
///
/// All statements run on one dedicated thread; async callers hand it closures
/// and await the reply on a oneshot channel.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    target: Arc<Target>,
}

impl Database {
    /// Opens (creating if needed) the store at `db_path` and migrates it.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let database = Self::open(Target::File(db_path))?;
        if let Some(path) = database.path() {
            log_info!("session store ready at {}", path.display());
        }
        Ok(database)
    }

    /// A private database that lives as long as the handle.
    pub fn in_memory() -> Result<Self> {
        Self::open(Target::Memory)
    }

    fn open(target: Target) -> Result<Self> {
        let target = Arc::new(target);
        Ok(Self {
            worker: Arc::new(Worker::start(target.clone())?),
            target,
        })
    }

    /// File backing the database, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.target.path()
    }

    /// Runs `task` on the connection thread and awaits its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, answer) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            if reply.send(task(conn)).is_err() {
                log_error!("session store caller went away before its result arrived");
            }
        });

        self.worker
            .requests
            .send(Request::Run(job))
            .map_err(|_| anyhow!("session store thread is not running"))?;
        answer
            .await
            .map_err(|_| anyhow!("session store thread dropped the request"))?
    }

    /// Stores a completed session and its translations in one transaction.
    pub async fn insert_session_record(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let session = &record.session;
            let summary = &record.summary;
            tx.execute(
                "INSERT INTO sessions (id, owner, language, quality, status, frame_count, confidence_sum,
                                       total_translations, duration_secs, average_confidence, created_at, ended_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    session.id,
                    session.owner,
                    session.language,
                    session.quality.as_str(),
                    session.status.as_str(),
                    count_to_sql(session.frame_count)?,
                    session.confidence_sum,
                    count_to_sql(summary.total_translations as u64)?,
                    summary.duration_secs,
                    summary.average_confidence,
                    timestamp_to_sql(&session.created_at),
                    session.ended_at.as_ref().map(timestamp_to_sql),
                ],
            )
            .context("failed to insert session")?;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO translations (session_id, position, label, refined_label, confidence, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (position, translation) in record.translations.iter().enumerate() {
                    stmt.execute(params![
                        session.id,
                        count_to_sql(position as u64)?,
                        translation.label,
                        translation.refined_label,
                        f64::from(translation.confidence),
                        timestamp_to_sql(&translation.timestamp),
                    ])
                    .context("failed to insert translation")?;
                }
            }

            tx.commit().context("failed to commit session record")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session_record(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, owner, language, quality, status, frame_count, confidence_sum,
                            total_translations, duration_secs, average_confidence, created_at, ended_at
                     FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| Ok(row_to_session(row)),
                )
                .optional()?;
            let Some(parsed) = row else {
                return Ok(None);
            };
            let (session, summary) = parsed?;

            let mut stmt = conn.prepare(
                "SELECT label, refined_label, confidence, timestamp
                 FROM translations
                 WHERE session_id = ?1
                 ORDER BY position ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut translations = Vec::new();
            while let Some(row) = rows.next()? {
                let timestamp: String = row.get("timestamp")?;
                let confidence: f64 = row.get("confidence")?;
                translations.push(TranslationEvent {
                    label: row.get("label")?,
                    refined_label: row.get("refined_label")?,
                    confidence: confidence as f32,
                    timestamp: timestamp_from_sql(&timestamp, "timestamp")?,
                });
            }

            Ok(Some(SessionRecord {
                session,
                translations,
                summary,
            }))
        })
        .await
    }

    /// Stored session ids of `owner`, newest first.
    pub async fn session_ids_for_owner(&self, owner: &str) -> Result<Vec<String>> {
        let owner = owner.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM sessions WHERE owner = ?1 ORDER BY created_at DESC",
            )?;
            let ids = stmt
                .query_map(params![owner], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }
}

fn row_to_session(row: &Row) -> Result<(Session, SessionSummary)> {
    let quality: String = row.get("quality")?;
    let status: String = row.get("status")?;
    let frame_count: i64 = row.get("frame_count")?;
    let total_translations: i64 = row.get("total_translations")?;
    let created_at: String = row.get("created_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;

    let session = Session {
        id: row.get("id")?,
        owner: row.get("owner")?,
        language: row.get("language")?,
        quality: quality.parse::<Quality>().map_err(|err| anyhow!(err))?,
        status: status.parse::<SessionStatus>().map_err(|err| anyhow!(err))?,
        frame_count: count_from_sql(frame_count, "frame_count")?,
        confidence_sum: row.get("confidence_sum")?,
        created_at: timestamp_from_sql(&created_at, "created_at")?,
        ended_at: optional_timestamp_from_sql(ended_at, "ended_at")?,
    };
    let summary = SessionSummary {
        total_frames: session.frame_count,
        total_translations: count_from_sql(total_translations, "total_translations")? as usize,
        duration_secs: row.get("duration_secs")?,
        average_confidence: row.get("average_confidence")?,
    };
    Ok((session, summary))
}

impl SessionSink for Database {
    fn persist<'a>(&'a self, record: &'a SessionRecord) -> SinkFuture<'a> {
        Box::pin(self.insert_session_record(record))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn record(owner: &str, labels: &[(&str, f32)]) -> SessionRecord {
        let start = Utc::now();
        let mut session = Session::new(owner.into(), "ASL".into(), Quality::High, start);
        let translations: Vec<TranslationEvent> = labels
            .iter()
            .enumerate()
            .map(|(i, &(label, confidence))| TranslationEvent {
                label: label.into(),
                refined_label: (i == 0).then(|| format!("{label}!")),
                confidence,
                timestamp: start + Duration::milliseconds(i as i64 * 40),
            })
            .collect();
        for translation in &translations {
            session.record_frame(Some(translation));
        }
        session.record_frame(None);
        let summary = session.complete(start + Duration::seconds(3), translations.len());
        SessionRecord {
            session,
            translations,
            summary,
        }
    }

    #[tokio::test]
    async fn stores_sessions_with_ordered_translations() {
        let db = Database::in_memory().unwrap();
        let written = record("alice", &[("Hello", 0.9), ("Thank you", 0.8), ("Yes", 0.7)]);
        db.persist(&written).await.unwrap();

        let stored = db
            .get_session_record(&written.session.id)
            .await
            .unwrap()
            .unwrap();
        let labels: Vec<&str> = stored.translations.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, ["Hello", "Thank you", "Yes"]);
        assert_eq!(stored.translations[0].refined_label.as_deref(), Some("Hello!"));
        assert_eq!(stored.session.status, SessionStatus::Completed);
        assert_eq!(stored.session.frame_count, 4);
        assert_eq!(stored.summary.total_translations, 3);
        assert!((stored.summary.average_confidence - written.summary.average_confidence).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let db = Database::in_memory().unwrap();
        assert!(db.get_session_record("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_session_is_rejected_atomically() {
        let db = Database::in_memory().unwrap();
        let written = record("bob", &[("No", 0.6)]);
        db.persist(&written).await.unwrap();
        assert!(db.persist(&written).await.is_err());

        let stored = db.get_session_record(&written.session.id).await.unwrap().unwrap();
        assert_eq!(stored.translations.len(), 1);
        assert_eq!(db.session_ids_for_owner("bob").await.unwrap(), [written.session.id]);
    }

    #[tokio::test]
    async fn file_database_creates_its_directory() {
        let dir = std::env::temp_dir().join(format!("gesturebridge-db-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("sessions.sqlite");
        let db = Database::new(path.clone()).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        db.persist(&record("carol", &[])).await.unwrap();
        drop(db);
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn unreadable_store_fails_to_open() {
        let dir = std::env::temp_dir().join(format!("gesturebridge-db-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sessions.sqlite");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        assert!(Database::new(path).is_err());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn clones_share_one_connection_thread() {
        let db = Database::in_memory().unwrap();
        let clone = db.clone();
        clone.persist(&record("dave", &[("Yes", 0.9)])).await.unwrap();
        drop(clone);
        assert_eq!(db.session_ids_for_owner("dave").await.unwrap().len(), 1);
        assert_eq!(db.path(), None);
    }
}
