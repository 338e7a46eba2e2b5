mod activations;
mod affine;
mod conversion;
mod dropout;
mod embed;
mod layer_norm;
mod lstm;
mod pooling;

pub use activations::{relu, sigmoid, softmax, tanh};
pub use affine::{affine, affine_with};
pub use conversion::{list2array, list2ragged, ragged2list};
pub use dropout::dropout;
pub(crate) use dropout::check_rate;
pub use embed::embed;
pub use layer_norm::layer_norm;
pub use lstm::lstm_step;
pub use pooling::{max_pool, mean_pool};

use crate::{MlErr, Result, data::Data, model::Model};

/// Init function of the layers whose output is as wide as their input.
///
/// Resolves `nI` and `nO` from the samples, then makes them equal.
pub(crate) fn init_same_width(
    model: &mut Model,
    x: Option<&Data>,
    y: Option<&Data>,
) -> Result<()> {
    if let Some(width) = x.and_then(Data::sample_width) {
        model.set_dim("nI", width)?;
    }

    if let Some(width) = y.and_then(Data::sample_width) {
        model.set_dim("nO", width)?;
    }

    if let Some(n_i) = model.get_dim("nI") {
        model.set_dim("nO", n_i)?;
    }

    if let Some(n_o) = model.get_dim("nO") {
        model.set_dim("nI", n_o)?;
    }

    Ok(())
}

/// Rejects inputs whose feature width differs from a resolved `nI`.
///
/// Every sequence of a list is checked. Unresolved widths accept anything.
pub(crate) fn check_input_width(model: &Model, x: &Data) -> Result<()> {
    let Some(n_i) = model.get_dim("nI") else {
        return Ok(());
    };

    let mismatch = match x {
        Data::List(xs) => xs.iter().map(|x| x.ncols()).find(|&w| w != n_i),
        other => Some(other.width()).filter(|&w| w != n_i),
    };

    match mismatch {
        Some(width) => Err(MlErr::shape(model.label(), "input width", width, n_i)),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use ndarray::{Array2, ArrayD};

    use crate::{data::Data, model::Model};

    /// Central difference estimate of `d(sum(forward(x) * d_y)) / dx`.
    pub fn numeric_input_grad(model: &Model, x: &Array2<f32>, d_y: &Array2<f32>) -> Array2<f32> {
        const EPS: f32 = 1e-2;

        let objective = |x: &Array2<f32>| -> f32 {
            let y = model
                .predict(Data::Array(x.clone()))
                .unwrap()
                .into_array(model)
                .unwrap();
            (&y * d_y).sum()
        };

        let mut grad = Array2::zeros(x.raw_dim());
        for idx in 0..x.len() {
            let (r, c) = (idx / x.ncols(), idx % x.ncols());

            let mut plus = x.clone();
            plus[[r, c]] += EPS;
            let mut minus = x.clone();
            minus[[r, c]] -= EPS;

            grad[[r, c]] = (objective(&plus) - objective(&minus)) / (2. * EPS);
        }

        grad
    }

    /// Central difference estimate of `d(sum(forward(x) * d_y)) / d(param)`.
    ///
    /// The parameter is restored before returning.
    pub fn numeric_param_grad(
        model: &mut Model,
        name: &str,
        x: &Array2<f32>,
        d_y: &Array2<f32>,
        eps: f32,
    ) -> ArrayD<f32> {
        let value = model.get_param(name).unwrap().clone();
        let mut objective = |value: ArrayD<f32>| -> f32 {
            *model.get_param_mut(name).unwrap() = value;
            let y = model
                .predict(Data::Array(x.clone()))
                .unwrap()
                .into_array(model)
                .unwrap();
            (&y * d_y).sum()
        };

        let mut grad = ArrayD::zeros(value.raw_dim());
        for (idx, g) in grad.indexed_iter_mut() {
            let mut plus = value.clone();
            plus[&idx] += eps;
            let mut minus = value.clone();
            minus[&idx] -= eps;

            *g = (objective(plus) - objective(minus)) / (2. * eps);
        }

        *model.get_param_mut(name).unwrap() = value;
        grad
    }

    pub fn assert_close(numeric: &Array2<f32>, analytic: &Array2<f32>) {
        assert_eq!(numeric.dim(), analytic.dim());

        for (n, a) in numeric.iter().zip(analytic) {
            assert!((n - a).abs() <= 1e-2 * (1. + a.abs()), "numeric {n} vs analytic {a}");
        }
    }
}
