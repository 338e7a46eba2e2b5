use crate::{MlErr, Result, model::ParamKey};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the provided slice of weights using the accumulated gradient, then resets the
    /// gradient to zero.
    ///
    /// # Arguments
    /// * `key` - Identifies the parameter, stateful optimizers keep their state per key.
    /// * `weights` - The weights to update.
    /// * `grad` - The gradient accumulated for `weights`.
    ///
    /// # Returns
    /// An error if there's a mismatch in the sizes of `grad` and `weights`.
    fn update(&mut self, key: ParamKey, weights: &mut [f32], grad: &mut [f32]) -> Result<()>;
}

pub(super) fn check_sizes(key: ParamKey, weights: &[f32], grad: &[f32]) -> Result<()> {
    if grad.len() != weights.len() {
        return Err(MlErr::shape(
            format!("#{}", key.model_id),
            "gradient size",
            grad.len(),
            weights.len(),
        ));
    }

    Ok(())
}
