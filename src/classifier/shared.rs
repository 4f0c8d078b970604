use std::{
    path::Path,
    sync::{Arc, RwLock},
};

use crate::error::ClassifierError;
use crate::landmark::NormalizedKeypointSet;

use super::model::{classify_with, predict_with, GestureModel};
use super::network::Network;
use super::{ClassificationResult, Classify, LabelVocabulary};

const ENABLE_LOGS: bool = true;

use crate::log_info;

/// Immutable weights plus the vocabulary they were trained on.
struct Snapshot {
    network: Network,
    vocabulary: LabelVocabulary,
}

/// A classifier handle shared by every concurrent prediction.
///
/// Predictions grab an `Arc` to the current weights and run without holding
/// any lock; only [`load`](Self::load) and [`replace`](Self::replace) take the
/// write lock to swap in new weights. In-flight predictions finish on the
/// weights they started with.
#[derive(Default)]
pub struct SharedModel {
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl SharedModel {
    /// A handle with no weights; classification fails with `NotReady`.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_model(model: &GestureModel) -> Result<Self, ClassifierError> {
        let shared = Self::empty();
        shared.replace(model)?;
        Ok(shared)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let shared = Self::empty();
        shared.load(path)?;
        Ok(shared)
    }

    /// Publishes a copy of `model`'s current weights.
    pub fn replace(&self, model: &GestureModel) -> Result<(), ClassifierError> {
        let network = model.network().ok_or(ClassifierError::NotReady)?.clone();
        self.publish(Snapshot {
            network,
            vocabulary: model.vocabulary().clone(),
        });
        Ok(())
    }

    /// Loads weights from disk and publishes them. A failed load keeps the
    /// previous weights in service.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), ClassifierError> {
        let model = GestureModel::from_file(path.as_ref())?;
        self.replace(&model)?;
        log_info!("classifier weights reloaded from {}", path.as_ref().display());
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ok()
    }

    pub fn vocabulary(&self) -> Option<LabelVocabulary> {
        self.snapshot().ok().map(|s| s.vocabulary.clone())
    }

    pub fn predict(&self, samples: &[NormalizedKeypointSet]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        let snapshot = self.snapshot()?;
        Ok(predict_with(&snapshot.network, samples))
    }

    fn publish(&self, snapshot: Snapshot) {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Arc::new(snapshot));
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, ClassifierError> {
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone().ok_or(ClassifierError::NotReady)
    }
}

impl Classify for SharedModel {
    fn classify(
        &self,
        keypoints: &NormalizedKeypointSet,
    ) -> Result<ClassificationResult, ClassifierError> {
        let snapshot = self.snapshot()?;
        classify_with(&snapshot.network, keypoints)
    }

    fn label(&self, index: usize) -> Option<String> {
        let snapshot = self.snapshot().ok()?;
        snapshot.vocabulary.get(index).map(str::to_owned)
    }
}
