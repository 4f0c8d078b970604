use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};

use crate::classifier::{Classify, GestureModel, LabelVocabulary, SharedModel, TrainingHistory};
use crate::landmark::{EstimatorSettings, HandPoseEstimator, LandmarkExtractor, NormalizedKeypointSet};
use crate::recognizer::Recognizer;
use crate::session::{OpenAiRefiner, SessionManager};
use crate::settings::{Settings, SettingsStore};
use crate::store::Database;
use crate::utils::init_logger;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Everything a host process needs, wired from a data directory.
pub struct AppState {
    pub settings: SettingsStore,
    pub db: Database,
    pub model: Arc<SharedModel>,
    pub sessions: SessionManager,
    data_dir: PathBuf,
}

impl AppState {
    /// Opens (or creates) `data_dir/settings.json` and
    /// `data_dir/gesturebridge.sqlite3`, loads classifier weights if present,
    /// and builds the session manager around the estimator `make_estimator`
    /// returns for the configured detector thresholds.
    pub fn init<E, F>(data_dir: &Path, make_estimator: F) -> Result<Self>
    where
        E: HandPoseEstimator,
        F: FnOnce(&EstimatorSettings) -> E,
    {
        init_logger();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let db = Database::new(data_dir.join("gesturebridge.sqlite3"))?;
        let config = settings.get();

        let model = Arc::new(SharedModel::empty());
        let model_path = resolve(data_dir, &config.model.path);
        if model_path.exists() {
            model
                .load(&model_path)
                .with_context(|| format!("failed to load model from {}", model_path.display()))?;
        } else {
            log_warn!(
                "no classifier weights at {}; recognition is unavailable until a model is loaded",
                model_path.display()
            );
        }

        let estimator = make_estimator(&config.estimator);
        let sessions = build_manager(&config, estimator, model.clone(), db.clone());
        log_info!("gesturebridge ready (data dir {})", data_dir.display());

        Ok(Self {
            settings,
            db,
            model,
            sessions,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// An untrained model over `vocabulary` using the configured training
    /// hyperparameters.
    pub fn new_model(&self, vocabulary: LabelVocabulary) -> GestureModel {
        GestureModel::with_config(vocabulary, self.settings.get().training)
    }

    /// Trains a fresh model with the configured hyperparameters and holdout
    /// split, saves it to the configured model path and puts it in service.
    pub fn train_model(
        &self,
        vocabulary: LabelVocabulary,
        samples: &[NormalizedKeypointSet],
        labels: &[usize],
    ) -> Result<TrainingHistory> {
        let mut model = self.new_model(vocabulary);
        let history = model
            .train_with_holdout(samples, labels)
            .context("failed to train gesture model")?;

        let path = resolve(&self.data_dir, &self.settings.get().model.path);
        model
            .save(&path)
            .with_context(|| format!("failed to save model to {}", path.display()))?;
        self.model.replace(&model)?;
        log_info!(
            "trained model on {} samples ({} epochs) now serving from {}",
            samples.len(),
            history.epochs.len(),
            path.display()
        );
        Ok(history)
    }

    /// Swaps in the weights at the configured model path. In-flight frames
    /// finish on the old weights.
    pub fn reload_model(&self) -> Result<()> {
        let path = resolve(&self.data_dir, &self.settings.get().model.path);
        self.model
            .load(&path)
            .with_context(|| format!("failed to reload model from {}", path.display()))
    }
}

fn build_manager<E: HandPoseEstimator>(
    settings: &Settings,
    estimator: E,
    model: Arc<SharedModel>,
    db: Database,
) -> SessionManager {
    let classifier: Arc<dyn Classify> = model;
    let recognizer = Recognizer::new(LandmarkExtractor::new(estimator), classifier)
        .with_confidence_threshold(settings.model.confidence_threshold);

    let mut manager = SessionManager::with_settings(recognizer, settings.sessions.clone())
        .with_sink(Arc::new(db));

    let refinement = &settings.refinement;
    if refinement.enabled && refinement.api_key.is_some() {
        manager = manager.with_refiner(
            Arc::new(OpenAiRefiner::from_settings(refinement)),
            refinement.timeout(),
        );
    } else {
        log_info!("translation refinement disabled");
    }
    manager
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;
    use crate::classifier::{GestureModel, LabelVocabulary};
    use crate::classifier::model::INPUT_SHAPE;
    use crate::landmark::KeypointSet;
    use crate::session::Quality;

    fn no_hands(_: &RgbImage) -> anyhow::Result<Option<KeypointSet>> {
        Ok(None)
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("gesturebridge-app-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn starts_without_a_model() {
        let dir = temp_dir();
        let state = AppState::init(&dir, |_: &EstimatorSettings| no_hands).unwrap();
        assert!(!state.model.is_ready());
        assert!(dir.join("gesturebridge.sqlite3").exists());

        let session = state.sessions.create("u1", "ASL", Quality::Medium).await;
        state.sessions.stop(&session.id, "u1").await.unwrap();
        let stored = state.db.get_session_record(&session.id).await.unwrap();
        assert!(stored.is_some());
        drop(state);
        let _ = std::fs::remove_dir_all(dir);
    }

    fn write_settings(dir: &Path, json: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("settings.json"), json).unwrap();
    }

    #[test]
    fn estimator_is_built_from_configured_thresholds() {
        let dir = temp_dir();
        write_settings(&dir, r#"{ "estimator": { "minDetectionConfidence": 0.9, "maxNumHands": 2 } }"#);

        let mut seen = None;
        let state = AppState::init(&dir, |settings: &EstimatorSettings| {
            seen = Some(settings.clone());
            no_hands
        })
        .unwrap();
        let seen = seen.unwrap();
        assert_eq!(seen.min_detection_confidence, 0.9);
        assert_eq!(seen.max_num_hands, 2);
        assert_eq!(seen.min_tracking_confidence, 0.5);
        drop(state);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn trains_with_configured_hyperparameters_and_serves_the_result() {
        let dir = temp_dir();
        write_settings(&dir, r#"{ "training": { "epochs": 3, "batchSize": 4, "seed": 9 } }"#);
        let state = AppState::init(&dir, |_: &EstimatorSettings| no_hands).unwrap();
        assert_eq!(state.new_model(LabelVocabulary::new(["A"])).config().epochs, 3);

        let mut samples = Vec::new();
        let mut labels = Vec::new();
        for step in 0..10 {
            for label in 0..2 {
                let mut positions = [[0.0f32; 3]; 21];
                for (i, pos) in positions.iter_mut().enumerate() {
                    let spread = if label == 0 { 0.01 } else { 0.1 };
                    *pos = [i as f32 * spread, step as f32 * 0.01 + i as f32 * 0.02, 0.0];
                }
                samples.push(crate::landmark::normalize(&KeypointSet::new(positions)).unwrap());
                labels.push(label);
            }
        }

        let history = state
            .train_model(LabelVocabulary::new(["Yes", "No"]), &samples, &labels)
            .unwrap();
        assert!(!history.epochs.is_empty() && history.epochs.len() <= 3);
        assert!(state.model.is_ready());
        assert_eq!(state.model.label(1).as_deref(), Some("No"));
        assert!(dir.join(&Settings::default().model.path).exists());
        drop(state);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn loads_and_reloads_saved_weights() {
        let dir = temp_dir();
        let mut model = GestureModel::new(LabelVocabulary::asl_demo());
        model.build(INPUT_SHAPE, 7).unwrap();
        model
            .save(dir.join(&Settings::default().model.path))
            .unwrap();

        let state = AppState::init(&dir, |_: &EstimatorSettings| no_hands).unwrap();
        assert!(state.model.is_ready());
        assert_eq!(state.model.label(6).as_deref(), Some("How are you?"));
        state.reload_model().unwrap();
        drop(state);
        let _ = std::fs::remove_dir_all(dir);
    }
}
