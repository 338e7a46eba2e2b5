use std::rc::Rc;

use log::debug;

use super::{InitSpec, LayerSpec, ModelSpec, OptimizerSpec};
use crate::{
    Result,
    combinators::{
        add, bidirectional, bilstm, chain, clone, concatenate, lstm, noop, residual, with_flatten,
    },
    init::{ConstInit, Initializer, Orthonormal, RandInit},
    layers::{
        affine_with, dropout, embed, layer_norm, list2array, list2ragged, max_pool, mean_pool,
        ragged2list, relu, sigmoid, softmax, tanh,
    },
    model::Model,
    ops::{NdOps, Ops},
    optimization::{Adam, GradientDescent, GradientDescentWithMomentum, Optimizer},
};

/// Builds `Model`s given a specification.
#[derive(Default)]
pub struct ModelBuilder;

impl ModelBuilder {
    /// Creates a new `ModelBuilder`.
    pub fn new() -> Self {
        Self
    }

    /// Builds a new model tree following a spec.
    ///
    /// The whole tree shares a single `NdOps` backend seeded with `spec.seed`. The model still
    /// has to be initialized before it can run.
    ///
    /// # Arguments
    /// * `spec` - The specification for the model.
    pub fn build(&self, spec: &ModelSpec) -> Result<Model> {
        let ops = NdOps::shared(spec.seed);
        let model = self.resolve_layer(&ops, &spec.architecture)?;

        debug!(model = model.label().as_str(), nodes = model.walk().len(); "model built");
        Ok(model)
    }

    /// Parses a JSON `ModelSpec` and builds it.
    ///
    /// # Errors
    /// `MlErr::Spec` if the JSON doesn't describe a valid spec.
    pub fn from_json(&self, json: &str) -> Result<Model> {
        let spec: ModelSpec = serde_json::from_str(json)?;
        self.build(&spec)
    }

    /// Builds the optimizer described by `spec`.
    pub fn build_optimizer(&self, spec: OptimizerSpec) -> Box<dyn Optimizer> {
        match spec {
            OptimizerSpec::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
            } => Box::new(Adam::new(learning_rate, beta1, beta2, epsilon)),
            OptimizerSpec::GradientDescent { learning_rate } => {
                Box::new(GradientDescent::new(learning_rate))
            }
            OptimizerSpec::GradientDescentWithMomentum {
                learning_rate,
                momentum,
            } => Box::new(GradientDescentWithMomentum::new(learning_rate, momentum)),
        }
    }

    fn resolve_layers(&self, ops: &Rc<dyn Ops>, specs: &[LayerSpec]) -> Result<Vec<Model>> {
        specs
            .iter()
            .map(|spec| self.resolve_layer(ops, spec))
            .collect()
    }

    fn resolve_layer(&self, ops: &Rc<dyn Ops>, spec: &LayerSpec) -> Result<Model> {
        let model = match spec {
            LayerSpec::Affine {
                n_out,
                n_in,
                init_w,
                init_b,
            } => {
                let init_w = self.resolve_init(*init_w, InitSpec::XavierUniform);
                let init_b = self.resolve_init(*init_b, InitSpec::Zeros);
                affine_with(ops, *n_out, *n_in, init_w, init_b)
            }
            LayerSpec::Relu => relu(ops),
            LayerSpec::Sigmoid => sigmoid(ops),
            LayerSpec::Tanh => tanh(ops),
            LayerSpec::Softmax => softmax(ops),
            LayerSpec::Dropout { rate } => dropout(ops, *rate),
            LayerSpec::Embed {
                n_out,
                n_vocab,
                column,
            } => embed(ops, *n_out, *n_vocab, *column),
            LayerSpec::LayerNorm { n_i } => layer_norm(ops, *n_i),
            LayerSpec::MaxPool => max_pool(ops),
            LayerSpec::MeanPool => mean_pool(ops),
            LayerSpec::List2Array => list2array(ops),
            LayerSpec::List2Ragged => list2ragged(ops),
            LayerSpec::Ragged2List => ragged2list(ops),
            LayerSpec::Lstm {
                n_out,
                n_in,
                dropout,
            } => lstm(ops, *n_out, *n_in, *dropout),
            LayerSpec::Bilstm {
                n_out,
                n_in,
                dropout,
            } => bilstm(ops, *n_out, *n_in, *dropout),
            LayerSpec::Chain { layers } => chain(self.resolve_layers(ops, layers)?)?,
            LayerSpec::Clone { layer, n } => clone(self.resolve_layer(ops, layer)?, *n),
            LayerSpec::Concatenate { layers } => concatenate(self.resolve_layers(ops, layers)?)?,
            LayerSpec::Add { layers } => add(self.resolve_layers(ops, layers)?)?,
            LayerSpec::Noop => noop(ops, vec![]),
            LayerSpec::Residual { layer } => residual(self.resolve_layer(ops, layer)?),
            LayerSpec::WithFlatten { layer } => with_flatten(self.resolve_layer(ops, layer)?),
            LayerSpec::Bidirectional { l2r, r2l } => bidirectional(
                self.resolve_layer(ops, l2r)?,
                self.resolve_layer(ops, r2l)?,
            ),
        };

        Ok(model)
    }

    fn resolve_init(&self, spec: Option<InitSpec>, default: InitSpec) -> Rc<dyn Initializer> {
        match spec.unwrap_or(default) {
            InitSpec::Zeros => Rc::new(ConstInit::zeros()),
            InitSpec::Constant { value } => Rc::new(ConstInit::new(value)),
            InitSpec::Uniform { low, high } => Rc::new(RandInit::uniform(low, high)),
            InitSpec::Normal { mean, std_dev } => Rc::new(RandInit::normal(mean, std_dev)),
            InitSpec::XavierUniform => Rc::new(RandInit::xavier_uniform()),
            InitSpec::Xavier => Rc::new(RandInit::xavier()),
            InitSpec::Kaiming => Rc::new(RandInit::kaiming()),
            InitSpec::Lecun => Rc::new(RandInit::lecun()),
            InitSpec::LecunUniform => Rc::new(RandInit::lecun_uniform()),
            InitSpec::Orthonormal => Rc::new(Orthonormal::new()),
        }
    }
}
