use std::cell::RefMut;

use ndarray::{Array2, Array3, ArrayD, ArrayView2};
use rand::rngs::StdRng;

use crate::Result;

/// The numeric backend every layer computes through.
///
/// A model tree shares a single `Ops` handle. Layers never touch the random number generator
/// directly, they ask the backend for masks and random tensors instead.
pub trait Ops {
    /// Gives access to the backend's random number generator.
    fn rng(&self) -> RefMut<'_, StdRng>;

    /// Allocates a zero filled tensor.
    ///
    /// # Arguments
    /// * `shape` - The shape of the new tensor.
    fn allocate(&self, shape: &[usize]) -> ArrayD<f32>;

    /// Allocates a zero filled matrix.
    fn allocate2(&self, shape: (usize, usize)) -> Array2<f32> {
        Array2::zeros(shape)
    }

    /// Allocates a zero filled 3D tensor.
    fn allocate3(&self, shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::zeros(shape)
    }

    /// Copies a flat buffer into a tensor of the given shape.
    ///
    /// # Returns
    /// An error if the buffer's length doesn't match the shape.
    fn asarray(&self, data: &[f32], shape: &[usize]) -> Result<ArrayD<f32>>;

    /// General matrix multiplication, optionally transposing either operand.
    ///
    /// # Returns
    /// An error if the inner dimensions don't agree.
    fn gemm(
        &self,
        a: ArrayView2<f32>,
        b: ArrayView2<f32>,
        trans1: bool,
        trans2: bool,
    ) -> Result<Array2<f32>>;

    /// Concatenates a list of matrices along the row axis.
    fn flatten(&self, xs: &[Array2<f32>]) -> Result<Array2<f32>>;

    /// Splits a matrix into consecutive row blocks of the given lengths.
    fn unflatten(&self, x: ArrayView2<f32>, lengths: &[usize]) -> Result<Vec<Array2<f32>>>;

    /// Max pools every sequence of a ragged batch.
    ///
    /// # Returns
    /// The pooled rows, one per sequence, and the offset inside each sequence where every
    /// maximum was found.
    fn max_pool(
        &self,
        x: ArrayView2<f32>,
        lengths: &[usize],
    ) -> Result<(Array2<f32>, Array2<usize>)>;

    /// Routes each pooled gradient back to the position that held the maximum.
    fn backprop_max_pool(
        &self,
        d_y: ArrayView2<f32>,
        which: ArrayView2<usize>,
        lengths: &[usize],
    ) -> Result<Array2<f32>>;

    /// Mean pools every sequence of a ragged batch.
    fn mean_pool(&self, x: ArrayView2<f32>, lengths: &[usize]) -> Result<Array2<f32>>;

    /// Spreads each pooled gradient evenly across its sequence.
    fn backprop_mean_pool(&self, d_y: ArrayView2<f32>, lengths: &[usize]) -> Result<Array2<f32>>;

    /// LSTM cell update.
    ///
    /// `acts` holds the pre-activations of the forget, input, output and candidate gates, in that
    /// order, each `nO` columns wide.
    ///
    /// # Returns
    /// The new cells, the new hiddens and the activated gates (needed by `backprop_lstm`).
    fn lstm(
        &self,
        acts: ArrayView2<f32>,
        prev_cells: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>, Array2<f32>)>;

    /// Backward pass of `lstm`.
    ///
    /// # Returns
    /// The gradient of the gate pre-activations and of the previous cells.
    fn backprop_lstm(
        &self,
        d_cells: ArrayView2<f32>,
        d_hiddens: ArrayView2<f32>,
        gates: ArrayView2<f32>,
        cells: ArrayView2<f32>,
        prev_cells: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)>;

    /// Draws an inverted dropout mask: kept entries are scaled by `1 / (1 - rate)`.
    ///
    /// # Returns
    /// `None` if `rate` is zero or negative, there's nothing to mask then.
    fn get_dropout_mask(&self, shape: (usize, usize), rate: f32) -> Option<Array2<f32>>;

    /// Samples a tensor from `U(low, high)`.
    fn random_uniform(&self, shape: &[usize], low: f32, high: f32) -> Result<ArrayD<f32>>;

    /// Samples a tensor from `N(mean, std_dev)`.
    fn random_normal(&self, shape: &[usize], mean: f32, std_dev: f32) -> Result<ArrayD<f32>>;
}
