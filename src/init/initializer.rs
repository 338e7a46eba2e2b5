use ndarray::ArrayD;

use crate::{Result, ops::Ops};

/// Fills a newly allocated parameter.
pub trait Initializer {
    /// Creates the initial value of a parameter.
    ///
    /// # Arguments
    /// * `ops` - The numeric backend, source of randomness.
    /// * `shape` - The shape of the parameter.
    ///
    /// # Returns
    /// A tensor of the given shape, or an error if the initializer can't produce one (for
    /// example, an invalid distribution range).
    fn init(&self, ops: &dyn Ops, shape: &[usize]) -> Result<ArrayD<f32>>;
}

/// The fan in and fan out of a parameter of the given shape.
///
/// The first axis is the amount of output units, the product of the rest the amount of input
/// units. Vectors are treated as square.
pub(crate) fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [fan_out, rest @ ..] => (rest.iter().product(), *fan_out),
    }
}
