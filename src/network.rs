//! Feed-forward network: a stack of fully-connected layers trained with
//! per-example backpropagation.
//!
//! Each layer pairs its activation with the matching derivative; the pairing
//! is a per-layer contract, never assumed. Hidden layers use sigmoid, the
//! final policy layer uses tanh so every action output is bounded in [-1, 1].

use std::path::Path;

use crate::matrix::{Matrix, MatrixError};
use crate::model::{self, ModelError};
use crate::rng::SeededRng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Sigmoid,
    Tanh,
}

impl Activation {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
        }
    }

    /// Derivative expressed in terms of the activation's own output `y`.
    #[inline]
    pub fn derivative(self, y: f32) -> f32 {
        match self {
            Self::Sigmoid => y * (1.0 - y),
            Self::Tanh => 1.0 - y * y,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    weights: Matrix,
    biases: Matrix,
    activation: Activation,
}

impl Layer {
    /// New layer with weights and biases drawn uniformly from [-0.5, 0.5).
    pub fn new(inputs: usize, outputs: usize, activation: Activation, rng: &mut SeededRng) -> Self {
        let mut weights = Matrix::zeros(inputs, outputs);
        let mut biases = Matrix::zeros(1, outputs);
        weights.randomize(-0.5, 0.5, rng);
        biases.randomize(-0.5, 0.5, rng);
        Self {
            weights,
            biases,
            activation,
        }
    }

    pub fn forward(&self, input: &Matrix) -> Result<Matrix, MatrixError> {
        let act = self.activation;
        Ok(input
            .dot(&self.weights)?
            .add(&self.biases)?
            .apply(|x| act.apply(x)))
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn biases(&self) -> &Matrix {
        &self.biases
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub(crate) fn set_parameters(&mut self, weights: Matrix, biases: Matrix) {
        self.weights = weights;
        self.biases = biases;
    }
}

/// One supervised example: a 1-row sensor vector and a 1-row action target.
#[derive(Clone, Debug)]
pub struct TrainingExample {
    pub input: Matrix,
    pub target: Matrix,
}

#[derive(Clone, Debug)]
pub struct Network {
    layers: Vec<Layer>,
}

impl Network {
    /// Build from consecutive layer sizes, e.g. `[12, 16, 4]`. Hidden layers
    /// get sigmoid, the final layer tanh. The RNG is threaded through every
    /// layer so a fixed seed reproduces the full initialization.
    pub fn new(sizes: &[usize], rng: &mut SeededRng) -> Self {
        let last = sizes.len().saturating_sub(1);
        let layers = sizes
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let activation = if i + 1 == last {
                    Activation::Tanh
                } else {
                    Activation::Sigmoid
                };
                Layer::new(pair[0], pair[1], activation, rng)
            })
            .collect();
        Self { layers }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Pure forward pass. Safe to call concurrently from read-only contexts
    /// as long as nothing is training the same network.
    pub fn predict(&self, input: &Matrix) -> Result<Matrix, MatrixError> {
        let mut out = input.clone();
        for layer in &self.layers {
            out = layer.forward(&out)?;
        }
        Ok(out)
    }

    /// One step of online backpropagation on a single example.
    pub fn train(
        &mut self,
        input: &Matrix,
        target: &Matrix,
        learning_rate: f32,
    ) -> Result<(), MatrixError> {
        // Forward pass, recording every layer output including the input.
        let mut outputs = Vec::with_capacity(self.layers.len() + 1);
        outputs.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward(outputs.last().unwrap_or(input))?;
            outputs.push(next);
        }

        let mut error = target.sub(&outputs[self.layers.len()])?;

        for idx in (0..self.layers.len()).rev() {
            let layer_output = &outputs[idx + 1];
            let prev_output = &outputs[idx];

            let act = self.layers[idx].activation();
            let gradient = layer_output
                .apply(|y| act.derivative(y))
                .hadamard(&error)?
                .scale(learning_rate);

            // Propagate the error through the weights *before* they are
            // updated; the update below must not feed into this step.
            let next_error = gradient.dot(&self.layers[idx].weights().transpose())?;

            let weight_delta = prev_output.transpose().dot(&gradient)?;
            let layer = &mut self.layers[idx];
            let weights = layer.weights().add(&weight_delta)?;
            let biases = layer.biases().add(&gradient)?;
            layer.set_parameters(weights, biases);

            error = next_error;
        }
        Ok(())
    }

    /// Train once per example (stochastic, not minibatch-averaged), then
    /// report the mean squared error of the batch under the updated weights.
    pub fn train_batch(
        &mut self,
        examples: &[TrainingExample],
        learning_rate: f32,
    ) -> Result<f32, MatrixError> {
        for example in examples {
            self.train(&example.input, &example.target, learning_rate)?;
        }
        self.calculate_loss(examples)
    }

    /// Mean squared error: total squared error divided by the total number of
    /// output scalars, so losses stay comparable across output widths.
    pub fn calculate_loss(&self, examples: &[TrainingExample]) -> Result<f32, MatrixError> {
        let mut total_error = 0.0f32;
        let mut total_outputs = 0usize;
        for example in examples {
            let prediction = self.predict(&example.input)?;
            let diff = example.target.sub(&prediction)?;
            total_error += diff.as_slice().iter().map(|e| e * e).sum::<f32>();
            total_outputs += diff.as_slice().len();
        }
        if total_outputs == 0 {
            return Ok(0.0);
        }
        Ok(total_error / total_outputs as f32)
    }

    pub fn save_model(&self, path: &Path) -> Result<(), ModelError> {
        model::save(self, path)
    }

    /// Load weights from disk. Fails without touching the live network if the
    /// stored topology disagrees with this network's topology.
    pub fn load_model(&mut self, path: &Path) -> Result<(), ModelError> {
        let parameters = model::load(path, &self.topology())?;
        for (layer, (weights, biases)) in self.layers.iter_mut().zip(parameters) {
            layer.set_parameters(weights, biases);
        }
        Ok(())
    }

    /// Per-layer (weight shape, bias shape) pairs.
    pub(crate) fn topology(&self) -> Vec<((usize, usize), (usize, usize))> {
        self.layers
            .iter()
            .map(|l| (l.weights().shape(), l.biases().shape()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed(sizes: &[usize], activation_override: Option<Activation>) -> Network {
        let mut rng = SeededRng::new(1);
        let mut network = Network::new(sizes, &mut rng);
        for layer in &mut network.layers {
            let w = Matrix::zeros(layer.weights().rows(), layer.weights().cols());
            let b = Matrix::zeros(1, layer.biases().cols());
            layer.set_parameters(w, b);
            if let Some(act) = activation_override {
                layer.activation = act;
            }
        }
        network
    }

    #[test]
    fn hidden_layers_sigmoid_final_layer_tanh() {
        let mut rng = SeededRng::new(42);
        let network = Network::new(&[12, 16, 4], &mut rng);
        assert_eq!(network.layers()[0].activation(), Activation::Sigmoid);
        assert_eq!(network.layers()[1].activation(), Activation::Tanh);
    }

    #[test]
    fn zero_weight_sigmoid_network_predicts_exactly_half() {
        let network = zeroed(&[4, 3, 2], Some(Activation::Sigmoid));
        let out = network.predict(&Matrix::from_row(&[0.3, -0.7, 1.0, 0.0])).unwrap();
        assert_eq!(out.shape(), (1, 2));
        for j in 0..2 {
            assert_eq!(out.get(0, j), 0.5);
        }
    }

    #[test]
    fn one_training_step_strictly_decreases_loss() {
        let mut rng = SeededRng::new(42);
        let mut network = Network::new(&[2, 1], &mut rng);
        let example = TrainingExample {
            input: Matrix::from_row(&[1.0, 0.0]),
            target: Matrix::from_row(&[1.0]),
        };
        let before = network.calculate_loss(std::slice::from_ref(&example)).unwrap();
        network.train(&example.input, &example.target, 1.0).unwrap();
        let after = network.calculate_loss(std::slice::from_ref(&example)).unwrap();
        assert!(
            after < before,
            "loss did not decrease: before={before} after={after}"
        );
    }

    #[test]
    fn train_rejects_mismatched_target_width() {
        let mut rng = SeededRng::new(3);
        let mut network = Network::new(&[2, 2], &mut rng);
        let input = Matrix::from_row(&[0.1, 0.2]);
        let bad_target = Matrix::from_row(&[1.0, 0.0, 0.0]);
        assert!(network.train(&input, &bad_target, 0.1).is_err());
    }

    #[test]
    fn tanh_derivative_matches_its_activation() {
        let y = Activation::Tanh.apply(0.7);
        let expected = 1.0 - y * y;
        assert!((Activation::Tanh.derivative(y) - expected).abs() < 1e-7);
        let s = Activation::Sigmoid.apply(0.7);
        assert!((Activation::Sigmoid.derivative(s) - s * (1.0 - s)).abs() < 1e-7);
    }

    #[test]
    fn fixed_seed_reproduces_initial_weights() {
        let mut a = SeededRng::new(42);
        let mut b = SeededRng::new(42);
        let n1 = Network::new(&[12, 16, 4], &mut a);
        let n2 = Network::new(&[12, 16, 4], &mut b);
        for (l1, l2) in n1.layers().iter().zip(n2.layers()) {
            assert_eq!(l1.weights(), l2.weights());
            assert_eq!(l1.biases(), l2.biases());
        }
    }

    #[test]
    fn batch_training_reduces_loss_on_a_fixed_mapping() {
        let mut rng = SeededRng::new(42);
        let mut network = Network::new(&[2, 4, 1], &mut rng);
        let examples: Vec<TrainingExample> = [([0.0, 0.0], -0.5), ([1.0, 1.0], 0.5)]
            .iter()
            .map(|(input, target)| TrainingExample {
                input: Matrix::from_row(input),
                target: Matrix::from_row(&[*target]),
            })
            .collect();
        let before = network.calculate_loss(&examples).unwrap();
        for _ in 0..200 {
            network.train_batch(&examples, 0.5).unwrap();
        }
        let after = network.calculate_loss(&examples).unwrap();
        assert!(after < before, "before={before} after={after}");
    }
}
