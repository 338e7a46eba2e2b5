use std::collections::HashMap;

use super::{Optimizer, optimizer::check_sizes};
use crate::{Result, model::ParamKey};

#[derive(Debug)]
struct Moments {
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
}

impl Moments {
    fn new(len: usize) -> Self {
        Self {
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
        }
    }
}

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    moments: HashMap<ParamKey, Moments>,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            moments: HashMap::new(),
        }
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.001, 0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn update(&mut self, key: ParamKey, weights: &mut [f32], grad: &mut [f32]) -> Result<()> {
        check_sizes(key, weights, grad)?;

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        let moments = self
            .moments
            .entry(key)
            .or_insert_with(|| Moments::new(weights.len()));

        check_sizes(key, &moments.v, grad)?;

        moments.beta1_t *= b1;
        moments.beta2_t *= b2;

        let bc1 = 1. - moments.beta1_t;
        let bc2 = 1. - moments.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        weights
            .iter_mut()
            .zip(grad.iter_mut())
            .zip(moments.v.iter_mut())
            .zip(moments.s.iter_mut())
            .for_each(|(((w, g), v), s)| {
                *v = b1 * *v + (1. - b1) * *g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *w -= step_size * *v / (s.sqrt() + eps);
                *g = 0.;
            });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_has_the_learning_rate_as_length() {
        let mut optimizer = Adam::new(0.1, 0.9, 0.999, 1e-8);
        let key = ParamKey {
            model_id: 3,
            param: "W",
        };

        let mut weights = [1., 1.];
        let mut grad = [4., -0.5];
        optimizer.update(key, &mut weights, &mut grad).unwrap();

        assert!((weights[0] - 0.9).abs() < 1e-4);
        assert!((weights[1] - 1.1).abs() < 1e-4);
        assert_eq!(grad, [0., 0.]);
    }
}
