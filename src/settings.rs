use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classifier::TrainingConfig;
use crate::landmark::EstimatorSettings;
use crate::recognizer::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::session::Quality;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub version: String,
    /// Predictions below this confidence are flagged as uncertain.
    pub confidence_threshold: f32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("model/gesture_model.json"),
            version: "2.0".into(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefinementSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    /// Only ever taken from the environment, never written to disk.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl RefinementSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1/chat/completions".into(),
            model: "gpt-3.5-turbo".into(),
            timeout_ms: 3_000,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    pub default_language: String,
    pub default_quality: Quality,
    /// Buffered lifecycle events per subscriber before the slowest lags.
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_language: "ASL".into(),
            default_quality: Quality::Medium,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub model: ModelSettings,
    pub training: TrainingConfig,
    pub refinement: RefinementSettings,
    pub estimator: EstimatorSettings,
    pub sessions: SessionSettings,
}

impl Settings {
    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GESTUREBRIDGE_MODEL_PATH").or_else(|| lookup("MODEL_PATH")) {
            self.model.path = PathBuf::from(path);
        }
        if let Some(version) = lookup("MODEL_VERSION") {
            self.model.version = version;
        }
        if let Some(raw) = lookup("CONFIDENCE_THRESHOLD") {
            match raw.trim().parse::<f32>() {
                Ok(value) if (0.0..=1.0).contains(&value) => self.model.confidence_threshold = value,
                _ => log_warn!("ignoring CONFIDENCE_THRESHOLD={raw}: expected a number in [0, 1]"),
            }
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty()) {
            self.refinement.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL") {
            self.refinement.model = model;
        }
        if let Some(raw) = lookup("GESTUREBRIDGE_REFINE_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(value) => self.refinement.timeout_ms = value,
                Err(_) => log_warn!("ignoring GESTUREBRIDGE_REFINE_TIMEOUT_MS={raw}"),
            }
        }
    }
}

/// JSON-file backed [`Settings`], with environment overrides layered on top.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = read_settings(&path)?;
        data.apply_env();
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Mutates the settings and writes them back to disk.
    pub fn update<F>(&self, apply: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    /// Re-reads the file, then re-applies environment overrides.
    pub fn reload(&self) -> Result<()> {
        let mut data = read_settings(&self.path)?;
        data.apply_env();
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    match serde_json::from_str(&contents) {
        Ok(settings) => Ok(settings),
        Err(err) => {
            log_warn!("settings at {} are invalid ({err}), using defaults", path.display());
            Ok(Settings::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("gesturebridge-settings-{}", uuid::Uuid::new_v4()))
            .join("settings.json")
    }

    #[test]
    fn defaults_follow_deployment_config() {
        let settings = Settings::default();
        assert_eq!(settings.model.confidence_threshold, 0.85);
        assert_eq!(settings.training.epochs, 50);
        assert_eq!(settings.training.batch_size, 32);
        assert_eq!(settings.refinement.timeout(), Duration::from_secs(3));
        assert_eq!(settings.sessions.default_language, "ASL");
        assert_eq!(settings.sessions.default_quality, Quality::Medium);
        assert_eq!(settings.estimator.max_num_hands, 1);
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("MODEL_PATH", "/srv/models/asl.json"),
            ("CONFIDENCE_THRESHOLD", "0.6"),
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("GESTUREBRIDGE_REFINE_TIMEOUT_MS", "750"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.model.path, PathBuf::from("/srv/models/asl.json"));
        assert_eq!(settings.model.confidence_threshold, 0.6);
        assert_eq!(settings.refinement.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.refinement.model, "gpt-4o-mini");
        assert_eq!(settings.refinement.timeout(), Duration::from_millis(750));
    }

    #[test]
    fn bad_overrides_are_ignored() {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| match key {
            "CONFIDENCE_THRESHOLD" => Some("1.5".into()),
            "GESTUREBRIDGE_REFINE_TIMEOUT_MS" => Some("soon".into()),
            "OPENAI_API_KEY" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(settings.model.confidence_threshold, 0.85);
        assert_eq!(settings.refinement.timeout_ms, 3_000);
        assert!(settings.refinement.api_key.is_none());
    }

    #[test]
    fn store_persists_updates_without_the_api_key() {
        let path = temp_path();
        let store = SettingsStore::new(path.clone()).unwrap();
        store
            .update(|s| {
                s.sessions.default_language = "BSL".into();
                s.refinement.api_key = Some("secret".into());
            })
            .unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("\"defaultLanguage\": \"BSL\""));
        assert!(!written.contains("secret"));

        let reopened = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(reopened.get().sessions.default_language, "BSL");
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{ "model": { "confidenceThreshold": 0.5 } }"#).unwrap();

        let store = SettingsStore::new(path.clone()).unwrap();
        let settings = store.get();
        assert_eq!(settings.model.version, "2.0");
        assert_eq!(settings.sessions.event_capacity, 256);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
