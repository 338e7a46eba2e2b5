use std::{
    cell::{RefCell, RefMut},
    rc::Rc,
};

use ndarray::{Axis, IxDyn, concatenate, linalg, prelude::*};
use ndarray_rand::RandomExt;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Normal, Uniform};

use super::Ops;
use crate::{MlErr, Result};

const LABEL: &str = "ops";

/// The CPU backend, built on top of `ndarray`.
pub struct NdOps {
    rng: RefCell<StdRng>,
}

impl NdOps {
    /// Creates a new `NdOps`.
    ///
    /// # Arguments
    /// * `seed` - An optional seed, if missing the generator is seeded from the OS.
    ///
    /// # Returns
    /// A new `NdOps` instance.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self {
            rng: RefCell::new(rng),
        }
    }

    /// Creates a new `NdOps` seeded from the OS.
    pub fn from_os_rng() -> Self {
        Self::new(None)
    }

    /// Creates a new `NdOps` behind the shared handle models hold on to.
    pub fn shared(seed: Option<u64>) -> Rc<dyn Ops> {
        Rc::new(Self::new(seed))
    }
}

impl Default for NdOps {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

/// Validates that the lengths of a ragged batch cover exactly `rows` rows.
fn check_lengths(rows: usize, lengths: &[usize]) -> Result<()> {
    let total: usize = lengths.iter().sum();

    if total != rows {
        return Err(MlErr::shape(LABEL, "sum of lengths", total, rows));
    }

    Ok(())
}

impl Ops for NdOps {
    fn rng(&self) -> RefMut<'_, StdRng> {
        self.rng.borrow_mut()
    }

    fn allocate(&self, shape: &[usize]) -> ArrayD<f32> {
        ArrayD::zeros(IxDyn(shape))
    }

    fn asarray(&self, data: &[f32], shape: &[usize]) -> Result<ArrayD<f32>> {
        let expected = shape.iter().product();

        ArrayD::from_shape_vec(IxDyn(shape), data.to_vec())
            .map_err(|_| MlErr::shape(LABEL, "asarray", data.len(), expected))
    }

    fn gemm(
        &self,
        a: ArrayView2<f32>,
        b: ArrayView2<f32>,
        trans1: bool,
        trans2: bool,
    ) -> Result<Array2<f32>> {
        let a = if trans1 { a.reversed_axes() } else { a };
        let b = if trans2 { b.reversed_axes() } else { b };

        if a.ncols() != b.nrows() {
            return Err(MlErr::shape(LABEL, "gemm inner dimension", b.nrows(), a.ncols()));
        }

        let mut c = Array2::zeros((a.nrows(), b.ncols()));
        linalg::general_mat_mul(1., &a, &b, 0., &mut c);
        Ok(c)
    }

    fn flatten(&self, xs: &[Array2<f32>]) -> Result<Array2<f32>> {
        let Some(first) = xs.first() else {
            return Ok(Array2::zeros((0, 0)));
        };

        let width = first.ncols();
        if let Some(x) = xs.iter().find(|x| x.ncols() != width) {
            return Err(MlErr::shape(LABEL, "flatten width", x.ncols(), width));
        }

        let views: Vec<_> = xs.iter().map(|x| x.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| MlErr::invalid(LABEL, e.to_string()))
    }

    fn unflatten(&self, x: ArrayView2<f32>, lengths: &[usize]) -> Result<Vec<Array2<f32>>> {
        check_lengths(x.nrows(), lengths)?;

        let mut start = 0;
        let seqs = lengths
            .iter()
            .map(|&len| {
                let seq = x.slice(s![start..start + len, ..]).to_owned();
                start += len;
                seq
            })
            .collect();

        Ok(seqs)
    }

    fn max_pool(
        &self,
        x: ArrayView2<f32>,
        lengths: &[usize],
    ) -> Result<(Array2<f32>, Array2<usize>)> {
        check_lengths(x.nrows(), lengths)?;

        let n_f = x.ncols();
        let mut pooled = Array2::zeros((lengths.len(), n_f));
        let mut which = Array2::zeros((lengths.len(), n_f));
        let mut start = 0;

        for (i, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }

            let seq = x.slice(s![start..start + len, ..]);

            for j in 0..n_f {
                let mut best = 0;
                let mut best_val = f32::NEG_INFINITY;

                for (k, &v) in seq.column(j).iter().enumerate() {
                    if v > best_val {
                        best_val = v;
                        best = k;
                    }
                }

                pooled[[i, j]] = seq[[best, j]];
                which[[i, j]] = best;
            }

            start += len;
        }

        Ok((pooled, which))
    }

    fn backprop_max_pool(
        &self,
        d_y: ArrayView2<f32>,
        which: ArrayView2<usize>,
        lengths: &[usize],
    ) -> Result<Array2<f32>> {
        if d_y.nrows() != lengths.len() {
            return Err(MlErr::shape(LABEL, "pooled rows", d_y.nrows(), lengths.len()));
        }

        if which.dim() != d_y.dim() {
            return Err(MlErr::shape(LABEL, "argmax width", which.ncols(), d_y.ncols()));
        }

        let total = lengths.iter().sum();
        let mut d_x = Array2::zeros((total, d_y.ncols()));
        let mut start = 0;

        for (i, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }

            for (j, &k) in which.row(i).iter().enumerate() {
                if k >= len {
                    return Err(MlErr::shape(LABEL, "argmax offset", k, len));
                }

                d_x[[start + k, j]] += d_y[[i, j]];
            }

            start += len;
        }

        Ok(d_x)
    }

    fn mean_pool(&self, x: ArrayView2<f32>, lengths: &[usize]) -> Result<Array2<f32>> {
        check_lengths(x.nrows(), lengths)?;

        let mut pooled = Array2::zeros((lengths.len(), x.ncols()));
        let mut start = 0;

        for (i, &len) in lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }

            let seq = x.slice(s![start..start + len, ..]);
            pooled
                .row_mut(i)
                .assign(&(seq.sum_axis(Axis(0)) / len as f32));
            start += len;
        }

        Ok(pooled)
    }

    fn backprop_mean_pool(&self, d_y: ArrayView2<f32>, lengths: &[usize]) -> Result<Array2<f32>> {
        if d_y.nrows() != lengths.len() {
            return Err(MlErr::shape(LABEL, "pooled rows", d_y.nrows(), lengths.len()));
        }

        let total = lengths.iter().sum();
        let mut d_x = Array2::zeros((total, d_y.ncols()));
        let mut start = 0;

        for (i, &len) in lengths.iter().enumerate() {
            let d_row = &d_y.row(i) / len.max(1) as f32;

            for k in start..start + len {
                d_x.row_mut(k).assign(&d_row);
            }

            start += len;
        }

        Ok(d_x)
    }

    fn lstm(
        &self,
        acts: ArrayView2<f32>,
        prev_cells: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>, Array2<f32>)> {
        let (n_b, n_o) = prev_cells.dim();

        if acts.nrows() != n_b {
            return Err(MlErr::shape(LABEL, "lstm batch", acts.nrows(), n_b));
        }

        if acts.ncols() != 4 * n_o {
            return Err(MlErr::shape(LABEL, "lstm gates", acts.ncols(), 4 * n_o));
        }

        let mut cells = Array2::zeros((n_b, n_o));
        let mut hiddens = Array2::zeros((n_b, n_o));
        let mut gates = Array2::zeros((n_b, 4 * n_o));

        for b in 0..n_b {
            for k in 0..n_o {
                let hf = sigmoid(acts[[b, k]]);
                let hi = sigmoid(acts[[b, n_o + k]]);
                let ho = sigmoid(acts[[b, 2 * n_o + k]]);
                let hc = acts[[b, 3 * n_o + k]].tanh();

                let c = hf * prev_cells[[b, k]] + hi * hc;
                cells[[b, k]] = c;
                hiddens[[b, k]] = ho * c.tanh();

                gates[[b, k]] = hf;
                gates[[b, n_o + k]] = hi;
                gates[[b, 2 * n_o + k]] = ho;
                gates[[b, 3 * n_o + k]] = hc;
            }
        }

        Ok((cells, hiddens, gates))
    }

    fn backprop_lstm(
        &self,
        d_cells: ArrayView2<f32>,
        d_hiddens: ArrayView2<f32>,
        gates: ArrayView2<f32>,
        cells: ArrayView2<f32>,
        prev_cells: ArrayView2<f32>,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let (n_b, n_o) = prev_cells.dim();

        for (what, got) in [
            ("lstm d_cells", d_cells.dim()),
            ("lstm d_hiddens", d_hiddens.dim()),
            ("lstm cells", cells.dim()),
        ] {
            if got != (n_b, n_o) {
                return Err(MlErr::shape(LABEL, what, got.1, n_o));
            }
        }

        if gates.dim() != (n_b, 4 * n_o) {
            return Err(MlErr::shape(LABEL, "lstm gates", gates.ncols(), 4 * n_o));
        }

        let mut d_acts = Array2::zeros((n_b, 4 * n_o));
        let mut d_prev_cells = Array2::zeros((n_b, n_o));

        for b in 0..n_b {
            for k in 0..n_o {
                let hf = gates[[b, k]];
                let hi = gates[[b, n_o + k]];
                let ho = gates[[b, 2 * n_o + k]];
                let hc = gates[[b, 3 * n_o + k]];

                let tc = cells[[b, k]].tanh();
                let d_h = d_hiddens[[b, k]];
                let d_ho = d_h * tc;
                let d_c = d_cells[[b, k]] + d_h * ho * (1. - tc * tc);

                let d_hf = d_c * prev_cells[[b, k]];
                let d_hi = d_c * hc;
                let d_hc = d_c * hi;

                d_acts[[b, k]] = d_hf * hf * (1. - hf);
                d_acts[[b, n_o + k]] = d_hi * hi * (1. - hi);
                d_acts[[b, 2 * n_o + k]] = d_ho * ho * (1. - ho);
                d_acts[[b, 3 * n_o + k]] = d_hc * (1. - hc * hc);
                d_prev_cells[[b, k]] = d_c * hf;
            }
        }

        Ok((d_acts, d_prev_cells))
    }

    fn get_dropout_mask(&self, shape: (usize, usize), rate: f32) -> Option<Array2<f32>> {
        if rate <= 0. {
            return None;
        }

        let scale = if rate < 1. { 1. / (1. - rate) } else { 0. };
        let mut rng = self.rng.borrow_mut();
        let mask = Array2::from_shape_fn(shape, |_| {
            if rng.random::<f32>() >= rate {
                scale
            } else {
                0.
            }
        });

        Some(mask)
    }

    fn random_uniform(&self, shape: &[usize], low: f32, high: f32) -> Result<ArrayD<f32>> {
        let distribution = Uniform::new(low, high)?;
        let mut rng = self.rng.borrow_mut();
        Ok(ArrayD::random_using(IxDyn(shape), distribution, &mut *rng))
    }

    fn random_normal(&self, shape: &[usize], mean: f32, std_dev: f32) -> Result<ArrayD<f32>> {
        let distribution = Normal::new(mean, std_dev)?;
        let mut rng = self.rng.borrow_mut();
        Ok(ArrayD::random_using(IxDyn(shape), distribution, &mut *rng))
    }
}
