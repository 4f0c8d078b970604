use std::{
    collections::HashMap,
    str::FromStr,
    sync::{Arc, RwLock},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

use crate::error::{ExtractError, RecognizeError, SessionError};
use crate::recognizer::Recognizer;
use crate::settings::{RefinementSettings, SessionSettings};
use crate::store::{SessionRecord, SessionSink};
use crate::utils::debug_mode;

use super::events::SessionEvent;
use super::refine::{refine_or_fallback, Refiner};
use super::state::{Quality, Session, SessionSnapshot, SessionStatus, SessionSummary, TranslationEvent};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Which sessions `list_sessions` returns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum StatusFilter {
    #[default]
    Active,
    Completed,
    All,
}

impl StatusFilter {
    pub fn matches(&self, status: SessionStatus) -> bool {
        match self {
            StatusFilter::Active => status == SessionStatus::Active,
            StatusFilter::Completed => status == SessionStatus::Completed,
            StatusFilter::All => true,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(StatusFilter::Active),
            "completed" => Ok(StatusFilter::Completed),
            "all" => Ok(StatusFilter::All),
            other => Err(format!("unknown status filter '{other}'")),
        }
    }
}

/// One page of an owner's sessions, newest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// Result of feeding one frame to a live session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameOutcome {
    pub session_id: String,
    pub language: String,
    pub frame_count: u64,
    /// `None` when the frame had no usable hand.
    pub translation: Option<TranslationEvent>,
    /// Whether the prediction cleared the confidence threshold.
    pub confident: bool,
}

struct SessionEntry {
    session: Session,
    translations: Vec<TranslationEvent>,
}

impl SessionEntry {
    fn authorize(&self, requester: &str) -> Result<(), SessionError> {
        if self.session.owner != requester {
            return Err(SessionError::Authorization(self.session.id.clone()));
        }
        Ok(())
    }

    fn ensure_active(&self, action: &'static str) -> Result<(), SessionError> {
        if !self.session.is_active() {
            return Err(SessionError::InvalidState {
                id: self.session.id.clone(),
                status: self.session.status.as_str(),
                action,
            });
        }
        Ok(())
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session: self.session.clone(),
            translations: self.translations.clone(),
        }
    }
}

/// Owns every live session and drives frames through the recognition
/// pipeline.
///
/// Frames of one session are processed strictly one at a time: the session's
/// mutex is held from the guard checks until the outcome is committed,
/// including refinement. Different sessions never wait on each other.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<SessionEntry>>>>>,
    recognizer: Arc<Recognizer>,
    refiner: Option<Arc<dyn Refiner>>,
    refine_timeout: Duration,
    sink: Option<Arc<dyn SessionSink>>,
    events: broadcast::Sender<SessionEvent>,
    defaults: SessionSettings,
    debug_mode: bool,
}

impl SessionManager {
    pub fn new(recognizer: Recognizer) -> Self {
        Self::with_settings(recognizer, SessionSettings::default())
    }

    pub fn with_settings(recognizer: Recognizer, settings: SessionSettings) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            recognizer: Arc::new(recognizer),
            refiner: None,
            refine_timeout: RefinementSettings::default().timeout(),
            sink: None,
            events,
            defaults: settings,
            debug_mode: debug_mode(),
        }
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn Refiner>, timeout: Duration) -> Self {
        self.refiner = Some(refiner);
        self.refine_timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Starts a session in the default language and quality.
    pub async fn create_default(&self, owner: &str) -> Session {
        let language = self.defaults.default_language.clone();
        self.create(owner, &language, self.defaults.default_quality).await
    }

    pub async fn create(&self, owner: &str, language: &str, quality: Quality) -> Session {
        let language = match language.trim() {
            "" => self.defaults.default_language.clone(),
            lang => lang.to_string(),
        };
        let session = Session::new(owner.to_string(), language, quality, Utc::now());
        let entry = SessionEntry {
            session: session.clone(),
            translations: Vec::new(),
        };

        {
            let mut sessions = self.write_registry();
            sessions.insert(session.id.clone(), Arc::new(Mutex::new(entry)));
        }

        log_info!(
            "session {} started for {} ({}, {})",
            session.id,
            session.owner,
            session.language,
            session.quality
        );
        self.emit(SessionEvent::Started {
            session_id: session.id.clone(),
            owner: session.owner.clone(),
            language: session.language.clone(),
            quality: session.quality,
        });
        session
    }

    /// Runs one encoded frame through the pipeline and records the outcome.
    ///
    /// Undecodable frames and classifier failures are returned to the caller
    /// and leave the session untouched. A frame whose hand could not be
    /// estimated is still counted.
    pub async fn ingest_frame(
        &self,
        session_id: &str,
        requester: &str,
        frame: Vec<u8>,
        timestamp: DateTime<Utc>,
    ) -> Result<FrameOutcome, SessionError> {
        let entry = self.lookup(session_id)?;
        let mut guard = entry.lock().await;
        guard.authorize(requester)?;
        guard.ensure_active("ingest frames")?;

        let recognizer = self.recognizer.clone();
        let recognized = tokio::task::spawn_blocking(move || recognizer.recognize_frame(&frame))
            .await
            .map_err(|err| SessionError::Internal(format!("recognition task failed: {err}")))?;

        let recognition = match recognized {
            Ok(recognition) => recognition,
            Err(RecognizeError::Extract(ExtractError::Estimator(err))) => {
                log_warn!("session {session_id}: hand estimation failed, frame counted without translation: {err:#}");
                None
            }
            Err(RecognizeError::Extract(err)) => return Err(SessionError::Decode(err)),
            Err(RecognizeError::Classifier(err)) => return Err(SessionError::Classifier(err)),
            Err(RecognizeError::Empty(err)) => return Err(SessionError::Internal(err.to_string())),
        };

        let confident = recognition.as_ref().is_some_and(|r| r.confident);
        let translation = match recognition {
            Some(recognition) => {
                let refined_label = refine_or_fallback(
                    self.refiner.as_deref(),
                    &recognition.label,
                    &guard.session.language,
                    self.refine_timeout,
                )
                .await;
                Some(TranslationEvent {
                    label: recognition.label,
                    refined_label,
                    confidence: recognition.result.confidence,
                    timestamp,
                })
            }
            None => None,
        };

        guard.session.record_frame(translation.as_ref());
        if let Some(event) = &translation {
            guard.translations.push(event.clone());
        }
        let frame_count = guard.session.frame_count;
        let language = guard.session.language.clone();

        // Sent under the session lock so it always precedes this session's `Completed`.
        self.emit(SessionEvent::FrameProcessed {
            session_id: session_id.to_string(),
            frame_count,
            translation: translation.clone(),
        });
        drop(guard);

        if self.debug_mode {
            log_info!("session {session_id}: frame {frame_count} -> {translation:?}");
        } else {
            log_debug!(
                "session {session_id}: frame {frame_count} -> {:?}",
                translation.as_ref().map(|t| t.display_text())
            );
        }

        Ok(FrameOutcome {
            session_id: session_id.to_string(),
            language,
            frame_count,
            translation,
            confident,
        })
    }

    /// Completes an active session and hands it to the sink.
    pub async fn stop(&self, session_id: &str, requester: &str) -> Result<SessionSummary, SessionError> {
        let entry = self.lookup(session_id)?;
        let record = {
            let mut guard = entry.lock().await;
            guard.authorize(requester)?;
            guard.ensure_active("stop")?;

            let total_translations = guard.translations.len();
            let summary = guard.session.complete(Utc::now(), total_translations);
            SessionRecord {
                session: guard.session.clone(),
                translations: guard.translations.clone(),
                summary,
            }
        };

        log_info!(
            "session {session_id} completed: {} frames, {} translations, avg confidence {:.3}",
            record.summary.total_frames,
            record.summary.total_translations,
            record.summary.average_confidence
        );

        if let Some(sink) = &self.sink {
            if let Err(err) = sink.persist(&record).await {
                log_error!("failed to persist session {session_id}: {err:#}");
            }
        }

        self.emit(SessionEvent::Completed {
            session_id: session_id.to_string(),
            summary: record.summary.clone(),
        });
        Ok(record.summary)
    }

    /// The session and its translations so far.
    pub async fn get(&self, session_id: &str, requester: &str) -> Result<SessionSnapshot, SessionError> {
        let entry = self.lookup(session_id)?;
        let guard = entry.lock().await;
        guard.authorize(requester)?;
        Ok(guard.snapshot())
    }

    /// Sessions of `owner` matching `filter`, newest first. `page` is 1-based.
    pub async fn list_sessions(
        &self,
        owner: &str,
        filter: StatusFilter,
        page: usize,
        per_page: usize,
    ) -> SessionPage {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let entries: Vec<Arc<Mutex<SessionEntry>>> = self.read_registry().values().cloned().collect();
        let mut sessions = Vec::new();
        for entry in entries {
            let guard = entry.lock().await;
            if guard.session.owner == owner && filter.matches(guard.session.status) {
                sessions.push(guard.session.clone());
            }
        }
        sessions.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = sessions.len();
        let total_pages = total.div_ceil(per_page);
        // An offset past `usize::MAX` is past the end of any listing.
        let offset = (page - 1).checked_mul(per_page).unwrap_or(usize::MAX);
        let sessions = sessions.into_iter().skip(offset).take(per_page).collect();

        SessionPage {
            sessions,
            total,
            page,
            per_page,
            total_pages,
        }
    }

    fn lookup(&self, session_id: &str) -> Result<Arc<Mutex<SessionEntry>>, SessionError> {
        self.read_registry()
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    fn read_registry(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Mutex<SessionEntry>>>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_registry(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Mutex<SessionEntry>>>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            log_debug!("no subscribers for session events");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;
    use crate::classifier::{ClassificationResult, Classify};
    use crate::error::ClassifierError;
    use crate::landmark::{KeypointSet, LandmarkExtractor, NormalizedKeypointSet, NUM_KEYPOINTS};

    struct FixedClassifier;

    impl Classify for FixedClassifier {
        fn classify(
            &self,
            _keypoints: &NormalizedKeypointSet,
        ) -> Result<ClassificationResult, ClassifierError> {
            Ok(ClassificationResult::new(0, 0.9))
        }

        fn label(&self, index: usize) -> Option<String> {
            (index == 0).then(|| "Hello".to_string())
        }
    }

    fn manager() -> SessionManager {
        let extractor = LandmarkExtractor::from_fn(|frame: &RgbImage| {
            if frame.width() == 1 {
                return Ok(None);
            }
            let mut positions = [[0.0; 3]; NUM_KEYPOINTS];
            for (i, pos) in positions.iter_mut().enumerate() {
                *pos = [i as f32, 1.0, 0.0];
            }
            Ok(Some(KeypointSet::new(positions)))
        });
        SessionManager::new(Recognizer::new(extractor, Arc::new(FixedClassifier)))
    }

    fn png(width: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        RgbImage::from_pixel(width, 1, Rgb([1, 2, 3]))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn status_filter_parsing() {
        assert_eq!("all".parse::<StatusFilter>(), Ok(StatusFilter::All));
        assert_eq!(StatusFilter::default(), StatusFilter::Active);
        assert!(StatusFilter::Completed.matches(SessionStatus::Completed));
        assert!(!StatusFilter::Active.matches(SessionStatus::Completed));
    }

    #[tokio::test]
    async fn blank_language_uses_default() {
        let manager = manager();
        let session = manager.create("u1", "  ", Quality::Low).await;
        assert_eq!(session.language, "ASL");
        let session = manager.create_default("u1").await;
        assert_eq!(session.quality, Quality::Medium);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let manager = manager();
        let err = manager.stop("nope", "u1").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn translations_are_recorded_in_order() {
        let manager = manager();
        let session = manager.create("u1", "ASL", Quality::High).await;
        let start = Utc::now();
        for (i, width) in [2, 1, 2].into_iter().enumerate() {
            let at = start + chrono::Duration::milliseconds(i as i64);
            manager.ingest_frame(&session.id, "u1", png(width), at).await.unwrap();
        }

        let snapshot = manager.get(&session.id, "u1").await.unwrap();
        assert_eq!(snapshot.session.frame_count, 3);
        assert_eq!(snapshot.translations.len(), 2);
        assert!(snapshot.translations[0].timestamp < snapshot.translations[1].timestamp);
        assert!(snapshot.translations.iter().all(|t| t.refined_label.is_none()));
    }

    #[tokio::test]
    async fn decode_failure_leaves_session_untouched() {
        let manager = manager();
        let session = manager.create("u1", "ASL", Quality::High).await;
        let err = manager
            .ingest_frame(&session.id, "u1", b"not a frame".to_vec(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Decode(ExtractError::Decode(_))));
        assert_eq!(manager.get(&session.id, "u1").await.unwrap().session.frame_count, 0);
    }

    #[tokio::test]
    async fn events_follow_the_lifecycle() {
        let manager = manager();
        let mut events = manager.subscribe();
        let session = manager.create("u1", "ASL", Quality::High).await;
        manager.ingest_frame(&session.id, "u1", png(2), Utc::now()).await.unwrap();
        manager.stop(&session.id, "u1").await.unwrap();

        let names: Vec<&str> = [
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| {
            assert_eq!(e.session_id(), session.id);
            e.name()
        })
        .collect();
        assert_eq!(names, ["session_start", "frame_processed", "session_end"]);
    }

    #[tokio::test]
    async fn pagination_is_newest_first() {
        let manager = manager();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(manager.create("owner", "ASL", Quality::Medium).await.id);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        manager.create("someone-else", "ASL", Quality::Medium).await;
        manager.stop(&ids[0], "owner").await.unwrap();

        let page = manager.list_sessions("owner", StatusFilter::All, 1, 2).await;
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages, 3);
        let first: Vec<&str> = page.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(first, [ids[4].as_str(), ids[3].as_str()]);

        let last = manager.list_sessions("owner", StatusFilter::All, 3, 2).await;
        assert_eq!(last.sessions.len(), 1);
        assert_eq!(last.sessions[0].id, ids[0]);

        let far = manager.list_sessions("owner", StatusFilter::All, usize::MAX, 2).await;
        assert!(far.sessions.is_empty());
        assert_eq!(far.total, 5);
        assert_eq!(far.page, usize::MAX);

        let huge = manager.list_sessions("owner", StatusFilter::All, 2, usize::MAX).await;
        assert!(huge.sessions.is_empty());
        assert_eq!(huge.total_pages, 1);

        let active = manager.list_sessions("owner", StatusFilter::Active, 1, 10).await;
        assert_eq!(active.total, 4);
        let completed = manager.list_sessions("owner", StatusFilter::Completed, 1, 10).await;
        assert_eq!(completed.total, 1);
    }
}
