use std::rc::Rc;

use ndarray::ArrayD;

use super::Model;
use crate::{Result, init::Initializer};

/// Computes the shape of a parameter from its model's dimensions.
pub type ShapeFn = fn(&Model) -> Result<Vec<usize>>;

/// Identifies a parameter across calls to the optimizer.
///
/// Stable for the lifetime of the model that owns the parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamKey {
    pub model_id: usize,
    pub param: &'static str,
}

/// A scalar setting attached to a model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attr {
    Float(f32),
    Int(usize),
    Bool(bool),
}

/// A declared parameter, allocated once its shape resolves.
#[derive(Clone)]
pub(crate) struct Param {
    pub(crate) name: &'static str,
    pub(crate) shape: ShapeFn,
    pub(crate) init: Rc<dyn Initializer>,
    pub(crate) data: Option<ParamData>,
}

#[derive(Debug, Clone)]
pub(crate) struct ParamData {
    pub(crate) value: ArrayD<f32>,
    pub(crate) grad: ArrayD<f32>,
}

impl ParamData {
    pub(crate) fn new(value: ArrayD<f32>) -> Self {
        let grad = ArrayD::zeros(value.raw_dim());
        Self { value, grad }
    }
}
