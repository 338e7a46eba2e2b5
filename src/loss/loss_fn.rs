use crate::{Result, data::Data, model::Model};

/// Scores a prediction against its target and seeds the backward pass.
pub trait LossFn {
    /// Returns the loss of `y_pred` against `y`, and its gradient with respect to `y_pred` in the
    /// same structure as `y_pred`.
    ///
    /// # Errors
    /// `InvalidInput` if the two are different `Data` variants, `ShapeMismatch` if any pair of
    /// matrices differs in shape. Both are labelled with `model`, the producer of `y_pred`.
    fn score(&self, model: &Model, y_pred: Data, y: &Data) -> Result<(f32, Data)>;
}
