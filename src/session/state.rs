use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// Video quality tier requested by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "low" => Ok(Quality::Low),
            "medium" => Ok(Quality::Medium),
            "high" => Ok(Quality::High),
            other => Err(format!("unknown quality tier '{other}'")),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recognized gesture inside a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationEvent {
    pub label: String,
    /// Natural-language rewrite of `label`, when refinement succeeded.
    pub refined_label: Option<String>,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl TranslationEvent {
    /// The text to show: the refined label if there is one.
    pub fn display_text(&self) -> &str {
        self.refined_label.as_deref().unwrap_or(&self.label)
    }
}

/// Final statistics of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_frames: u64,
    pub total_translations: usize,
    pub duration_secs: f64,
    pub average_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub owner: String,
    pub language: String,
    pub quality: Quality,
    pub status: SessionStatus,
    pub frame_count: u64,
    pub confidence_sum: f64,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(owner: String, language: String, quality: Quality, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            language,
            quality,
            status: SessionStatus::Active,
            frame_count: 0,
            confidence_sum: 0.0,
            created_at,
            ended_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Mean confidence per ingested frame; frames without a hand count as zero.
    pub fn average_confidence(&self) -> f64 {
        if self.frame_count == 0 {
            0.0
        } else {
            self.confidence_sum / self.frame_count as f64
        }
    }

    pub fn duration_secs(&self, now: DateTime<Utc>) -> f64 {
        let end = self.ended_at.unwrap_or(now);
        (end - self.created_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub(crate) fn record_frame(&mut self, translation: Option<&TranslationEvent>) {
        self.frame_count += 1;
        if let Some(event) = translation {
            self.confidence_sum += f64::from(event.confidence);
        }
    }

    pub(crate) fn complete(&mut self, ended_at: DateTime<Utc>, total_translations: usize) -> SessionSummary {
        self.status = SessionStatus::Completed;
        self.ended_at = Some(ended_at);
        SessionSummary {
            total_frames: self.frame_count,
            total_translations,
            duration_secs: self.duration_secs(ended_at),
            average_confidence: self.average_confidence(),
        }
    }
}

/// A session together with its ordered translation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: Session,
    pub translations: Vec<TranslationEvent>,
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use chrono::Duration;

    use super::*;

    fn event(confidence: f32) -> TranslationEvent {
        TranslationEvent {
            label: "Hello".into(),
            refined_label: None,
            confidence,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_session_is_active_and_empty() {
        let session = Session::new("u1".into(), "ASL".into(), Quality::High, Utc::now());
        assert!(session.is_active());
        assert_eq!(session.frame_count, 0);
        assert_eq!(session.average_confidence(), 0.0);
        assert!(Uuid::parse_str(&session.id).is_ok());
    }

    #[test]
    fn frames_without_hands_only_bump_the_counter() {
        let mut session = Session::new("u1".into(), "ASL".into(), Quality::Medium, Utc::now());
        session.record_frame(Some(&event(0.9)));
        session.record_frame(None);
        assert_eq!(session.frame_count, 2);
        assert_abs_diff_eq!(session.confidence_sum, 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(session.average_confidence(), 0.45, epsilon = 1e-6);
    }

    #[test]
    fn completion_fills_summary() {
        let start = Utc::now();
        let mut session = Session::new("u1".into(), "BSL".into(), Quality::Low, start);
        session.record_frame(Some(&event(0.8)));
        let summary = session.complete(start + Duration::milliseconds(2500), 1);
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(summary.total_frames, 1);
        assert_eq!(summary.total_translations, 1);
        assert_abs_diff_eq!(summary.duration_secs, 2.5);
        assert_abs_diff_eq!(summary.average_confidence, 0.8, epsilon = 1e-6);
    }

    #[test]
    fn quality_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Quality>(), Ok(Quality::High));
        assert!("ultra".parse::<Quality>().is_err());
        assert_eq!(Quality::default(), Quality::Medium);
        assert_eq!("completed".parse::<SessionStatus>(), Ok(SessionStatus::Completed));
    }

    #[test]
    fn display_text_prefers_refinement() {
        let mut translation = event(0.5);
        assert_eq!(translation.display_text(), "Hello");
        translation.refined_label = Some("Hi there!".into());
        assert_eq!(translation.display_text(), "Hi there!");
    }
}
