use super::Model;
use crate::{MlErr, Result, data::Data};

type BackpropFn = Box<dyn FnOnce(&mut Model, Data) -> Result<Data>>;

/// The backward pass of a single forward call.
///
/// Owns whatever the forward pass cached and is consumed when called, so it can run at most
/// once.
pub struct Backprop {
    model_id: usize,
    inner: Option<BackpropFn>,
}

impl Backprop {
    /// Creates a new `Backprop` for the given model.
    ///
    /// # Arguments
    /// * `model` - The model whose forward pass produced this backward pass.
    /// * `f` - Takes the model and the gradient of the output, returns the gradient of the input.
    pub fn new<F>(model: &Model, f: F) -> Self
    where
        F: FnOnce(&mut Model, Data) -> Result<Data> + 'static,
    {
        Self {
            model_id: model.id(),
            inner: Some(Box::new(f)),
        }
    }

    /// The backward pass of an inference call, there's nothing to run.
    pub fn inference(model: &Model) -> Self {
        Self {
            model_id: model.id(),
            inner: None,
        }
    }

    /// Runs the backward pass.
    ///
    /// # Arguments
    /// * `model` - The model that produced this backward pass.
    /// * `d_y` - The gradient of the forward output.
    ///
    /// # Returns
    /// The gradient of the forward input.
    pub fn call(self, model: &mut Model, d_y: Data) -> Result<Data> {
        if model.id() != self.model_id {
            return Err(MlErr::invalid(
                model.label(),
                format!("backward pass belongs to model #{}", self.model_id),
            ));
        }

        let Some(f) = self.inner else {
            return Err(MlErr::BackwardUnavailable {
                model: model.label(),
            });
        };

        f(model, d_y)
    }
}
