use std::collections::HashMap;

use super::{Optimizer, optimizer::check_sizes};
use crate::{Result, model::ParamKey};

#[derive(Debug)]
pub struct GradientDescentWithMomentum {
    learning_rate: f32,
    momentum: f32,
    velocity: HashMap<ParamKey, Box<[f32]>>,
}

impl GradientDescentWithMomentum {
    /// Creates a new `GradientDescentWithMomentum` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `GradientDescentWithMomentum` instance.
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
            velocity: HashMap::new(),
        }
    }
}

impl Optimizer for GradientDescentWithMomentum {
    fn update(&mut self, key: ParamKey, weights: &mut [f32], grad: &mut [f32]) -> Result<()> {
        check_sizes(key, weights, grad)?;

        let lr = self.learning_rate;
        let mu = self.momentum;
        let velocity = self
            .velocity
            .entry(key)
            .or_insert_with(|| vec![0.; weights.len()].into_boxed_slice());

        check_sizes(key, velocity, grad)?;

        weights
            .iter_mut()
            .zip(grad.iter_mut())
            .zip(velocity.iter_mut())
            .for_each(|((w, g), v)| {
                *v = (mu * *v) + *g;
                *w -= lr * *v;
                *g = 0.;
            });

        Ok(())
    }
}
