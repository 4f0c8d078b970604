//! Dense feed-forward scorer with softmax output and its Adam optimizer.

use ndarray::{Array1, Array2, ArrayView2, Axis, Zip};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Hidden layer widths and dropout rates of the gesture scorer.
pub const HIDDEN_LAYERS: &[(usize, f32)] = &[(128, 0.3), (64, 0.2)];

const LOG_EPSILON: f32 = 1e-7;

/// One fully connected layer. `weights` is `inputs × outputs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
    /// Fraction of this layer's activations dropped while training.
    pub dropout: f32,
}

impl Dense {
    fn new(inputs: usize, outputs: usize, dropout: f32, rng: &mut impl Rng) -> Self {
        // He-uniform, suited to ReLU.
        let limit = (6.0 / inputs as f32).sqrt();
        Self {
            weights: Array2::from_shape_fn((inputs, outputs), |_| rng.gen_range(-limit..limit)),
            bias: Array1::zeros(outputs),
            dropout,
        }
    }

    fn affine(&self, inputs: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut z = inputs.dot(&self.weights);
        z += &self.bias;
        z
    }
}

/// Gradients for one [`Dense`] layer.
#[derive(Debug, Clone)]
pub struct Gradient {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

/// ReLU hidden layers followed by a softmax output layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    layers: Vec<Dense>,
}

impl Network {
    pub fn new(inputs: usize, hidden: &[(usize, f32)], outputs: usize, rng: &mut impl Rng) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut width = inputs;
        for &(size, dropout) in hidden {
            layers.push(Dense::new(width, size, dropout, rng));
            width = size;
        }
        layers.push(Dense::new(width, outputs, 0.0, rng));
        Self { layers }
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.weights.nrows())
    }

    pub fn num_classes(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.weights.ncols())
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    /// Checks that consecutive layers chain and every bias matches its layer.
    ///
    /// Weights read from disk must pass this before they are used, since a
    /// mismatch would otherwise only surface as a panic inside `forward`.
    pub fn validate(&self) -> Result<(), String> {
        if self.layers.is_empty() {
            return Err("network has no layers".into());
        }
        for (index, layer) in self.layers.iter().enumerate() {
            let (inputs, outputs) = layer.weights.dim();
            if inputs == 0 || outputs == 0 {
                return Err(format!("layer {index} has an empty {inputs}x{outputs} weight matrix"));
            }
            if layer.bias.len() != outputs {
                return Err(format!(
                    "layer {index} has {} biases for {outputs} outputs",
                    layer.bias.len()
                ));
            }
            if !(0.0..1.0).contains(&layer.dropout) {
                return Err(format!("layer {index} has dropout {} outside [0, 1)", layer.dropout));
            }
            if index > 0 {
                let previous = self.layers[index - 1].weights.ncols();
                if inputs != previous {
                    return Err(format!(
                        "layer {index} expects {inputs} inputs but layer {} produces {previous}",
                        index - 1
                    ));
                }
            }
        }
        Ok(())
    }

    /// Class probabilities for each row of `inputs`. Dropout is inactive.
    pub fn forward(&self, inputs: ArrayView2<'_, f32>) -> Array2<f32> {
        let last = self.layers.len() - 1;
        let mut activations = inputs.to_owned();
        for (index, layer) in self.layers.iter().enumerate() {
            let z = layer.affine(activations.view());
            activations = if index == last {
                softmax(z)
            } else {
                z.mapv(relu)
            };
        }
        activations
    }

    /// Runs a training pass (dropout active) and backpropagates the mean
    /// categorical cross-entropy against one-hot `targets`.
    ///
    /// Returns the batch loss and one [`Gradient`] per layer.
    pub fn backprop(
        &self,
        inputs: ArrayView2<'_, f32>,
        targets: ArrayView2<'_, f32>,
        rng: &mut impl Rng,
    ) -> (f32, Vec<Gradient>) {
        let last = self.layers.len() - 1;
        let mut layer_inputs = Vec::with_capacity(self.layers.len());
        // d(activation)/d(z) per hidden layer, with the dropout mask folded in.
        let mut derivatives = Vec::with_capacity(last);

        let mut activations = inputs.to_owned();
        for (index, layer) in self.layers.iter().enumerate() {
            let z = layer.affine(activations.view());
            layer_inputs.push(activations);
            if index == last {
                activations = softmax(z);
                break;
            }

            let keep = 1.0 - layer.dropout;
            let mask = z.mapv(|value| {
                if value <= 0.0 {
                    0.0
                } else if layer.dropout > 0.0 && rng.gen::<f32>() >= keep {
                    0.0
                } else {
                    1.0 / keep
                }
            });
            activations = z.mapv(relu) * &mask;
            derivatives.push(mask);
        }

        let probabilities = activations;
        let loss = cross_entropy(probabilities.view(), targets);
        let batch = inputs.nrows().max(1) as f32;

        let mut delta = (&probabilities - &targets) / batch;
        let mut gradients = Vec::with_capacity(self.layers.len());
        for index in (0..self.layers.len()).rev() {
            let layer_input = &layer_inputs[index];
            gradients.push(Gradient {
                weights: layer_input.t().dot(&delta),
                bias: delta.sum_axis(Axis(0)),
            });
            if index > 0 {
                delta = delta.dot(&self.layers[index].weights.t()) * &derivatives[index - 1];
            }
        }
        gradients.reverse();

        (loss, gradients)
    }
}

#[inline]
fn relu(value: f32) -> f32 {
    value.max(0.0)
}

/// Row-wise, numerically stable softmax.
pub fn softmax(mut logits: Array2<f32>) -> Array2<f32> {
    for mut row in logits.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    logits
}

/// Mean categorical cross-entropy of `probabilities` against one-hot `targets`.
pub fn cross_entropy(probabilities: ArrayView2<'_, f32>, targets: ArrayView2<'_, f32>) -> f32 {
    let rows = probabilities.nrows();
    if rows == 0 {
        return 0.0;
    }
    let mut total = 0.0;
    Zip::from(&probabilities)
        .and(&targets)
        .for_each(|&p, &t| total -= t * p.max(LOG_EPSILON).ln());
    total / rows as f32
}

/// Adam optimizer state for one [`Network`].
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    first_moment: Vec<Gradient>,
    second_moment: Vec<Gradient>,
}

impl Adam {
    pub fn new(network: &Network, learning_rate: f32) -> Self {
        let zeros = || {
            network
                .layers
                .iter()
                .map(|layer| Gradient {
                    weights: Array2::zeros(layer.weights.raw_dim()),
                    bias: Array1::zeros(layer.bias.raw_dim()),
                })
                .collect::<Vec<_>>()
        };
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            first_moment: zeros(),
            second_moment: zeros(),
        }
    }

    pub fn apply(&mut self, network: &mut Network, gradients: &[Gradient]) {
        self.step += 1;
        let (b1, b2) = (self.beta1, self.beta2);
        let correction1 = 1.0 - b1.powi(self.step);
        let correction2 = 1.0 - b2.powi(self.step);
        let lr = self.learning_rate;
        let eps = self.epsilon;

        for (((layer, grad), m), v) in network
            .layers
            .iter_mut()
            .zip(gradients)
            .zip(&mut self.first_moment)
            .zip(&mut self.second_moment)
        {
            Zip::from(&mut layer.weights)
                .and(&grad.weights)
                .and(&mut m.weights)
                .and(&mut v.weights)
                .for_each(|w, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *w -= lr * (*m / correction1) / ((*v / correction2).sqrt() + eps);
                });
            Zip::from(&mut layer.bias)
                .and(&grad.bias)
                .and(&mut m.bias)
                .and(&mut v.bias)
                .for_each(|b, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *b -= lr * (*m / correction1) / ((*v / correction2).sqrt() + eps);
                });
        }
    }
}
