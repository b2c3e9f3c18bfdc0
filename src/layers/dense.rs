use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{activation::activation::ActivationFunction, math::matrix::Matrix};

/// Weight and bias gradients for one layer.
#[derive(Debug, Clone)]
pub struct LayerGradient {
    pub weights: Matrix,
    pub biases: Matrix,
}

impl LayerGradient {
    pub fn zeros_for(layer: &Layer) -> LayerGradient {
        LayerGradient {
            weights: layer.weights.zeros_like(),
            biases: layer.biases.zeros_like(),
        }
    }

    pub fn add_assign(&mut self, other: &LayerGradient) {
        self.weights.add_assign(&other.weights);
        self.biases.add_assign(&other.biases);
    }

    pub fn scale(&self, factor: f64) -> LayerGradient {
        LayerGradient {
            weights: self.weights.scale(factor),
            biases: self.biases.scale(factor),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub size: usize,
    pub weights: Matrix,
    pub biases: Matrix,
    pub activator: ActivationFunction,
    // Forward caches for backprop; never persisted.
    #[serde(skip)]
    input: Matrix,
    #[serde(skip)]
    pre_neurons: Matrix,
}

impl Layer {
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        input_size: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Layer {
        let weights = match activation {
            ActivationFunction::ReLU | ActivationFunction::LeakyReLU { .. } => {
                Matrix::he(input_size, size, rng)
            }
            _ => Matrix::xavier(input_size, size, rng),
        };

        Layer {
            size,
            weights,
            biases: Matrix::zeros(1, size),
            activator: activation,
            input: Matrix::default(),
            pre_neurons: Matrix::default(),
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.rows
    }

    /// True when `other` has the same weight and bias shapes.
    pub fn same_shape(&self, other: &Layer) -> bool {
        self.weights.same_shape(&other.weights) && self.biases.same_shape(&other.biases)
    }

    /// Training forward pass: caches the input and pre-activation.
    pub fn forward(&mut self, input: Vec<f64>) -> Vec<f64> {
        let x = Matrix::row(input);
        let z = &(&x * &self.weights) + &self.biases;
        let a = self.activator.apply(&z.data[0]);
        self.input = x;
        self.pre_neurons = z;
        a
    }

    /// Inference forward pass; leaves the caches untouched.
    pub fn predict(&self, input: &[f64]) -> Vec<f64> {
        let x = Matrix::row(input.to_vec());
        let z = &(&x * &self.weights) + &self.biases;
        self.activator.apply(&z.data[0])
    }

    /// Backprop through this layer using the caches of the last `forward`.
    ///
    /// `delta` is ∂L/∂a for this layer's output. Returns the parameter
    /// gradients and ∂L/∂a of the previous layer.
    pub fn backward(&self, delta: &Matrix) -> (LayerGradient, Matrix) {
        let act_derivative = self.pre_neurons.map(|x| self.activator.derivative(x));
        let layer_delta = delta.zip_map(&act_derivative, |d, s| d * s);

        let weights = &self.input.transpose() * &layer_delta;
        let previous = &layer_delta * &self.weights.transpose();

        (LayerGradient { weights, biases: layer_delta }, previous)
    }
}
