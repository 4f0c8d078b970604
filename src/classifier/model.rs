//! The trainable gesture model: build, train, predict, evaluate, persist.

use std::{fs, path::Path};

use ndarray::Array2;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;
use crate::landmark::{NormalizedKeypointSet, NUM_FEATURES, NUM_KEYPOINTS};

use super::network::{Network, HIDDEN_LAYERS};
use super::training::{self, Dataset, TrainingConfig, TrainingHistory};
use super::{ClassificationResult, Classify, LabelVocabulary};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Shape of one model input: 21 keypoints × 3 coordinates.
pub const INPUT_SHAPE: [usize; 2] = [NUM_KEYPOINTS, 3];

const FORMAT_VERSION: u32 = 1;

/// On-disk representation written by [`GestureModel::save`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SavedModel {
    format_version: u32,
    vocabulary: LabelVocabulary,
    network: Network,
}

/// Feed-forward gesture classifier over normalized keypoints.
///
/// A fresh model is unbuilt; [`predict`](Self::predict),
/// [`evaluate`](Self::evaluate) and [`save`](Self::save) fail with
/// [`ClassifierError::NotReady`] until [`build`](Self::build),
/// [`train`](Self::train) or [`load`](Self::load) ran.
pub struct GestureModel {
    vocabulary: LabelVocabulary,
    network: Option<Network>,
    config: TrainingConfig,
}

impl GestureModel {
    pub fn new(vocabulary: LabelVocabulary) -> Self {
        Self::with_config(vocabulary, TrainingConfig::default())
    }

    pub fn with_config(vocabulary: LabelVocabulary, config: TrainingConfig) -> Self {
        Self {
            vocabulary,
            network: None,
            config,
        }
    }

    /// Reads a model previously written by [`save`](Self::save).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClassifierError> {
        let mut model = Self::new(LabelVocabulary::default());
        model.load(path)?;
        Ok(model)
    }

    pub fn vocabulary(&self) -> &LabelVocabulary {
        &self.vocabulary
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn is_ready(&self) -> bool {
        self.network.is_some()
    }

    pub(crate) fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    /// Creates freshly initialized weights, discarding any previous ones.
    pub fn build(&mut self, input_shape: [usize; 2], num_classes: usize) -> Result<(), ClassifierError> {
        if input_shape != INPUT_SHAPE {
            return Err(ClassifierError::ShapeMismatch(format!(
                "input shape {input_shape:?} is not {INPUT_SHAPE:?}"
            )));
        }
        if num_classes == 0 || num_classes != self.vocabulary.len() {
            return Err(ClassifierError::ShapeMismatch(format!(
                "{num_classes} classes requested but the vocabulary has {} labels",
                self.vocabulary.len()
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.network = Some(Network::new(NUM_FEATURES, HIDDEN_LAYERS, num_classes, &mut rng));
        log_info!(
            "built gesture model: {NUM_FEATURES} inputs, {num_classes} classes"
        );
        Ok(())
    }

    /// Trains on `samples` labelled with class indices.
    ///
    /// Builds the model first if needed. Stops early once the validation loss
    /// (training loss without validation data) stops improving, and keeps the
    /// best epoch's weights.
    pub fn train(
        &mut self,
        samples: &[NormalizedKeypointSet],
        labels: &[usize],
        validation: Option<(&[NormalizedKeypointSet], &[usize])>,
        epochs: usize,
        batch_size: usize,
    ) -> Result<TrainingHistory, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::ShapeMismatch("no training samples".into()));
        }
        if batch_size == 0 {
            return Err(ClassifierError::ShapeMismatch("batch size must be positive".into()));
        }

        if self.network.is_none() {
            self.build(INPUT_SHAPE, self.vocabulary.len())?;
        }
        let num_classes = self.vocabulary.len();

        let train = dataset(samples, labels, num_classes)?;
        let validation = validation
            .map(|(samples, labels)| dataset(samples, labels, num_classes))
            .transpose()?;

        let config = TrainingConfig {
            epochs,
            batch_size,
            ..self.config.clone()
        };
        let network = self.network.as_mut().ok_or(ClassifierError::NotReady)?;
        let history = training::fit(network, &train, validation.as_ref(), &config);

        if let Some(best) = history.best() {
            log_info!(
                "training finished after {} epochs, best epoch {} (loss {:.4}, val_loss {:?})",
                history.epochs.len(),
                best.epoch,
                best.loss,
                best.val_loss
            );
        }
        Ok(history)
    }

    /// Shuffles the samples with the configured seed, holds out
    /// `validation_split` of them for validation and trains with the
    /// configured epochs and batch size.
    pub fn train_with_holdout(
        &mut self,
        samples: &[NormalizedKeypointSet],
        labels: &[usize],
    ) -> Result<TrainingHistory, ClassifierError> {
        if samples.len() != labels.len() {
            return Err(ClassifierError::ShapeMismatch(format!(
                "{} samples but {} labels",
                samples.len(),
                labels.len()
            )));
        }

        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.config.seed));
        let split = self.config.validation_split.clamp(0.0, 0.9);
        let held_out = ((samples.len() as f32) * split).round() as usize;
        let (val_idx, train_idx) = order.split_at(held_out.min(samples.len().saturating_sub(1)));

        let pick = |idx: &[usize]| -> (Vec<NormalizedKeypointSet>, Vec<usize>) {
            idx.iter().map(|&i| (samples[i], labels[i])).unzip()
        };
        let (train_samples, train_labels) = pick(train_idx);
        let (val_samples, val_labels) = pick(val_idx);
        log_info!(
            "dataset split - training: {}, validation: {}",
            train_samples.len(),
            val_samples.len()
        );

        let validation = (!val_samples.is_empty())
            .then(|| (val_samples.as_slice(), val_labels.as_slice()));
        let (epochs, batch_size) = (self.config.epochs, self.config.batch_size);
        self.train(&train_samples, &train_labels, validation, epochs, batch_size)
    }

    /// Softmax distribution over the vocabulary for each sample.
    pub fn predict(&self, samples: &[NormalizedKeypointSet]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        let network = self.network.as_ref().ok_or(ClassifierError::NotReady)?;
        Ok(predict_with(network, samples))
    }

    /// Mean cross-entropy loss and accuracy on labelled samples.
    pub fn evaluate(
        &self,
        samples: &[NormalizedKeypointSet],
        labels: &[usize],
    ) -> Result<(f32, f32), ClassifierError> {
        let network = self.network.as_ref().ok_or(ClassifierError::NotReady)?;
        let data = dataset(samples, labels, network.num_classes())?;
        let (loss, accuracy) = training::evaluate(network, &data);
        log_info!("model evaluation - loss: {loss:.4}, accuracy: {accuracy:.4}");
        Ok((loss, accuracy))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ClassifierError> {
        let path = path.as_ref();
        let network = self.network.as_ref().ok_or(ClassifierError::NotReady)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let saved = SavedModel {
            format_version: FORMAT_VERSION,
            vocabulary: self.vocabulary.clone(),
            network: network.clone(),
        };
        fs::write(path, serde_json::to_vec(&saved)?)?;
        log_info!("model saved to {}", path.display());
        Ok(())
    }

    /// Replaces weights and vocabulary with the ones stored at `path`.
    ///
    /// On failure the current model is left untouched.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), ClassifierError> {
        let path = path.as_ref();
        let saved: SavedModel = fs::read(path)
            .map_err(ClassifierError::from)
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(ClassifierError::from))
            .map_err(|err| {
                log_error!("failed to load model from {}: {err}", path.display());
                err
            })?;

        if saved.format_version != FORMAT_VERSION {
            return Err(ClassifierError::ShapeMismatch(format!(
                "unsupported model format version {}",
                saved.format_version
            )));
        }
        saved.network.validate().map_err(|reason| {
            log_error!("rejecting model at {}: {reason}", path.display());
            ClassifierError::ShapeMismatch(reason)
        })?;
        if saved.network.input_size() != NUM_FEATURES
            || saved.network.num_classes() != saved.vocabulary.len()
        {
            return Err(ClassifierError::ShapeMismatch(format!(
                "stored network ({} inputs, {} classes) does not match {} features / {} labels",
                saved.network.input_size(),
                saved.network.num_classes(),
                NUM_FEATURES,
                saved.vocabulary.len()
            )));
        }

        self.vocabulary = saved.vocabulary;
        self.network = Some(saved.network);
        log_info!("model loaded from {}", path.display());
        Ok(())
    }
}

impl Classify for GestureModel {
    fn classify(
        &self,
        keypoints: &NormalizedKeypointSet,
    ) -> Result<ClassificationResult, ClassifierError> {
        let network = self.network.as_ref().ok_or(ClassifierError::NotReady)?;
        classify_with(network, keypoints)
    }

    fn label(&self, index: usize) -> Option<String> {
        self.vocabulary.get(index).map(str::to_owned)
    }
}

pub(crate) fn features(samples: &[NormalizedKeypointSet]) -> Array2<f32> {
    let mut features = Array2::zeros((samples.len(), NUM_FEATURES));
    for (mut row, sample) in features.rows_mut().into_iter().zip(samples) {
        for (out, value) in row.iter_mut().zip(sample.to_features()) {
            *out = value;
        }
    }
    features
}

pub(crate) fn predict_with(network: &Network, samples: &[NormalizedKeypointSet]) -> Vec<Vec<f32>> {
    if samples.is_empty() {
        return Vec::new();
    }
    network
        .forward(features(samples).view())
        .rows()
        .into_iter()
        .map(|row| row.to_vec())
        .collect()
}

pub(crate) fn classify_with(
    network: &Network,
    keypoints: &NormalizedKeypointSet,
) -> Result<ClassificationResult, ClassifierError> {
    let distribution = predict_with(network, std::slice::from_ref(keypoints));
    distribution
        .first()
        .and_then(|row| ClassificationResult::from_distribution(row))
        .ok_or_else(|| ClassifierError::ShapeMismatch("network produced no classes".into()))
}

fn dataset(
    samples: &[NormalizedKeypointSet],
    labels: &[usize],
    num_classes: usize,
) -> Result<Dataset, ClassifierError> {
    if samples.len() != labels.len() {
        return Err(ClassifierError::ShapeMismatch(format!(
            "{} samples but {} labels",
            samples.len(),
            labels.len()
        )));
    }
    if let Some(&label) = labels.iter().find(|&&label| label >= num_classes) {
        return Err(ClassifierError::ShapeMismatch(format!(
            "label {label} is outside the {num_classes} known classes"
        )));
    }
    Ok(Dataset::new(features(samples), labels.to_vec(), num_classes))
}
