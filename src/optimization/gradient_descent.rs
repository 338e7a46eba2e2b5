use super::{Optimizer, optimizer::check_sizes};
use crate::{Result, model::ParamKey};

/// Gradient descent optimization algorithm.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    /// Makes a step in the opposite direction of the gradient, with a length of `learning_rate`.
    fn update(&mut self, key: ParamKey, weights: &mut [f32], grad: &mut [f32]) -> Result<()> {
        check_sizes(key, weights, grad)?;

        let lr = self.learning_rate;

        for (w, g) in weights.iter_mut().zip(grad.iter_mut()) {
            *w -= lr * *g;
            *g = 0.;
        }

        Ok(())
    }
}
