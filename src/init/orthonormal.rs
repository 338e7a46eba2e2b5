use ndarray::{Array2, ArrayD, Ix2, IxDyn};

use super::Initializer;
use crate::{MlErr, Result, ops::Ops};

/// An initializer producing a matrix with orthonormal rows or columns, whichever are fewer.
///
/// Tensors of higher rank are treated as a matrix of shape `(shape[0], rest)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Orthonormal;

impl Orthonormal {
    pub fn new() -> Self {
        Self
    }
}

impl Initializer for Orthonormal {
    fn init(&self, ops: &dyn Ops, shape: &[usize]) -> Result<ArrayD<f32>> {
        let Some((&rows, rest)) = shape.split_first() else {
            return Err(MlErr::Initializer(
                "orthonormal initialization needs at least one axis".to_string(),
            ));
        };

        let cols: usize = rest.iter().product();
        let sample = ops
            .random_normal(&[rows, cols], 0., 1.)?
            .into_dimensionality::<Ix2>()
            .map_err(|e| MlErr::Initializer(e.to_string()))?;

        // Orthonormalize along the longer axis.
        let tall = rows >= cols;
        let m = if tall { sample } else { sample.reversed_axes() };
        let q = gram_schmidt(m.mapv(f64::from)).mapv(|v| v as f32);
        let q = if tall { q } else { q.reversed_axes() };

        q.as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(shape))
            .map_err(|e| MlErr::Initializer(e.to_string()))
    }
}

/// Modified Gram-Schmidt over the columns of `m`.
fn gram_schmidt(mut m: Array2<f64>) -> Array2<f64> {
    for j in 0..m.ncols() {
        for k in 0..j {
            let proj = m.column(k).dot(&m.column(j));
            let basis = m.column(k).to_owned();
            m.column_mut(j).scaled_add(-proj, &basis);
        }

        let norm = m.column(j).dot(&m.column(j)).sqrt();
        if norm > f64::EPSILON {
            m.column_mut(j).mapv_inplace(|v| v / norm);
        }
    }

    m
}
