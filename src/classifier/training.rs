//! Mini-batch training loop with early stopping.

use ndarray::{Array2, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use super::network::{cross_entropy, Adam, Network};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Epochs without improvement of the monitored loss before training stops.
    pub patience: usize,
    /// Smallest decrease of the monitored loss that counts as improvement.
    pub min_delta: f32,
    /// Fraction of samples held out when the caller supplies no validation set.
    pub validation_split: f32,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-3,
            patience: 5,
            min_delta: 0.0,
            validation_split: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

impl EpochMetrics {
    /// The loss early stopping watches: validation loss if present.
    pub fn monitored_loss(&self) -> f32 {
        self.val_loss.unwrap_or(self.loss)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
    /// Epoch (1-based) whose weights were kept.
    pub best_epoch: usize,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().find(|m| m.epoch == self.best_epoch)
    }
}

/// Features plus one-hot targets.
pub struct Dataset {
    pub features: Array2<f32>,
    pub targets: Array2<f32>,
    pub labels: Vec<usize>,
}

impl Dataset {
    pub fn new(features: Array2<f32>, labels: Vec<usize>, num_classes: usize) -> Self {
        let mut targets = Array2::zeros((labels.len(), num_classes));
        for (row, &label) in labels.iter().enumerate() {
            targets[[row, label]] = 1.0;
        }
        Self {
            features,
            targets,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Mean loss and accuracy of `network` on `data`, dropout disabled.
pub fn evaluate(network: &Network, data: &Dataset) -> (f32, f32) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let probabilities = network.forward(data.features.view());
    let loss = cross_entropy(probabilities.view(), data.targets.view());
    let correct = probabilities
        .rows()
        .into_iter()
        .zip(&data.labels)
        .filter(|(row, label)| argmax(row.iter().copied()) == **label)
        .count();
    (loss, correct as f32 / data.len() as f32)
}

/// Index of the largest value; the lowest index wins ties.
pub fn argmax(values: impl IntoIterator<Item = f32>) -> usize {
    let mut best = (0, f32::NEG_INFINITY);
    for (index, value) in values.into_iter().enumerate() {
        if value > best.1 {
            best = (index, value);
        }
    }
    best.0
}

/// Watches a loss and remembers the weights of the best epoch.
struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    best_loss: f32,
    best_epoch: usize,
    best_weights: Option<Network>,
    waited: usize,
}

impl EarlyStopping {
    fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta,
            best_loss: f32::INFINITY,
            best_epoch: 0,
            best_weights: None,
            waited: 0,
        }
    }

    /// Records an epoch; returns `true` when training should stop.
    fn observe(&mut self, epoch: usize, loss: f32, network: &Network) -> bool {
        if loss < self.best_loss - self.min_delta {
            self.best_loss = loss;
            self.best_epoch = epoch;
            self.best_weights = Some(network.clone());
            self.waited = 0;
            false
        } else {
            self.waited += 1;
            self.waited >= self.patience
        }
    }
}

/// Trains `network` in place and leaves it holding the best epoch's weights.
///
/// Callers validate shapes; this function assumes `train` is non-empty and
/// labels fit the network's output width.
pub fn fit(
    network: &mut Network,
    train: &Dataset,
    validation: Option<&Dataset>,
    config: &TrainingConfig,
) -> TrainingHistory {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut optimizer = Adam::new(network, config.learning_rate);
    let mut stopper = EarlyStopping::new(config.patience.max(1), config.min_delta);
    let mut history = TrainingHistory::default();
    let mut order: Vec<usize> = (0..train.len()).collect();

    for epoch in 1..=config.epochs {
        order.shuffle(&mut rng);
        for batch in order.chunks(config.batch_size.max(1)) {
            let features = train.features.select(Axis(0), batch);
            let targets = train.targets.select(Axis(0), batch);
            let (_, gradients) = network.backprop(features.view(), targets.view(), &mut rng);
            optimizer.apply(network, &gradients);
        }

        let (loss, accuracy) = evaluate(network, train);
        let (val_loss, val_accuracy) = match validation.filter(|v| !v.is_empty()) {
            Some(data) => {
                let (l, a) = evaluate(network, data);
                (Some(l), Some(a))
            }
            None => (None, None),
        };
        let metrics = EpochMetrics {
            epoch,
            loss,
            accuracy,
            val_loss,
            val_accuracy,
        };
        log_debug!(
            "epoch {epoch}/{}: loss={loss:.4} acc={accuracy:.3} val_loss={val_loss:?}",
            config.epochs
        );

        let stop = stopper.observe(epoch, metrics.monitored_loss(), network);
        history.epochs.push(metrics);
        if stop {
            history.stopped_early = epoch < config.epochs;
            log_info!(
                "early stopping at epoch {epoch}, best epoch {}",
                stopper.best_epoch
            );
            break;
        }
    }

    if let Some(best) = stopper.best_weights.take() {
        *network = best;
    }
    history.best_epoch = stopper.best_epoch;
    history
}
