//! Architectures described as data.
//!
//! Specs are plain serde enums, so a whole model tree can be read from JSON and handed to a
//! `ModelBuilder`.

mod builder;

use serde::{Deserialize, Serialize};

pub use builder::ModelBuilder;

/// The specification for an `Initializer`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSpec {
    Zeros,
    Constant { value: f32 },
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform,
    Xavier,
    Kaiming,
    Lecun,
    LecunUniform,
    Orthonormal,
}

/// The specification for a layer or a combinator.
///
/// Dimensions left out are inferred when the model is initialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerSpec {
    Affine {
        n_out: Option<usize>,
        n_in: Option<usize>,
        init_w: Option<InitSpec>,
        init_b: Option<InitSpec>,
    },
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Dropout {
        rate: f32,
    },
    Embed {
        n_out: Option<usize>,
        n_vocab: Option<usize>,
        #[serde(default)]
        column: usize,
    },
    LayerNorm {
        n_i: Option<usize>,
    },
    MaxPool,
    MeanPool,
    #[serde(rename = "list2array")]
    List2Array,
    #[serde(rename = "list2ragged")]
    List2Ragged,
    #[serde(rename = "ragged2list")]
    Ragged2List,
    Lstm {
        n_out: Option<usize>,
        n_in: Option<usize>,
        #[serde(default)]
        dropout: f32,
    },
    Bilstm {
        n_out: Option<usize>,
        n_in: Option<usize>,
        #[serde(default)]
        dropout: f32,
    },
    Chain {
        layers: Vec<LayerSpec>,
    },
    Clone {
        layer: Box<LayerSpec>,
        n: usize,
    },
    Concatenate {
        layers: Vec<LayerSpec>,
    },
    Add {
        layers: Vec<LayerSpec>,
    },
    Noop,
    Residual {
        layer: Box<LayerSpec>,
    },
    WithFlatten {
        layer: Box<LayerSpec>,
    },
    Bidirectional {
        l2r: Box<LayerSpec>,
        r2l: Box<LayerSpec>,
    },
}

/// The specification for a whole model tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Seeds the backend's random number generator, drawn from the OS if `None`.
    pub seed: Option<u64>,
    pub architecture: LayerSpec,
}

/// The specification for the `Optimizer` trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adam {
        learning_rate: f32,
        beta1: f32,
        beta2: f32,
        epsilon: f32,
    },
    GradientDescent {
        learning_rate: f32,
    },
    GradientDescentWithMomentum {
        learning_rate: f32,
        momentum: f32,
    },
}
