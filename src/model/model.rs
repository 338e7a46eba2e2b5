use std::{
    collections::BTreeMap,
    fmt,
    rc::Rc,
    sync::atomic::{AtomicUsize, Ordering},
};

use log::debug;
use ndarray::{ArrayD, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Ix1, Ix2};

use super::{
    Backprop,
    param::{Attr, Param, ParamData, ParamKey, ShapeFn},
};
use crate::{MlErr, Result, data::Data, init::Initializer, ops::Ops, optimization::Optimizer};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

fn next_id() -> usize {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Runs a model on its input, returns the output and the matching backward pass.
pub type ForwardFn = fn(&Model, Data, bool) -> Result<(Data, Backprop)>;

/// Resolves a model's dimensions from an optional sample input and output.
pub type InitFn = fn(&mut Model, Option<&Data>, Option<&Data>) -> Result<()>;

/// The unit of computation every layer and combinator is made of.
///
/// A model has a forward function, an optional init function, a list of child models, a set of
/// named dimensions which may be unresolved until `initialize` runs, and the parameters it
/// declares. Parameters are allocated lazily, once the dimensions their shapes depend on resolve.
pub struct Model {
    name: String,
    id: usize,
    forward: ForwardFn,
    init: Option<InitFn>,
    layers: Vec<Model>,
    dims: BTreeMap<&'static str, Option<usize>>,
    params: Vec<Param>,
    attrs: BTreeMap<&'static str, Attr>,
    ops: Rc<dyn Ops>,
}

impl Model {
    /// Creates a new `Model` with no dimensions, parameters nor children.
    ///
    /// # Arguments
    /// * `name` - A human readable name, used in errors and logs.
    /// * `ops` - The numeric backend.
    /// * `forward` - The forward function.
    pub fn new(name: impl Into<String>, ops: &Rc<dyn Ops>, forward: ForwardFn) -> Self {
        Self {
            name: name.into(),
            id: next_id(),
            forward,
            init: None,
            layers: Vec::new(),
            dims: BTreeMap::new(),
            params: Vec::new(),
            attrs: BTreeMap::new(),
            ops: Rc::clone(ops),
        }
    }

    pub fn with_init(mut self, init: InitFn) -> Self {
        self.init = Some(init);
        self
    }

    /// Declares a dimension, `None` leaves it to be resolved later.
    pub fn with_dim(mut self, name: &'static str, value: Option<usize>) -> Self {
        self.dims.insert(name, value);
        self
    }

    /// Declares a parameter.
    ///
    /// # Arguments
    /// * `name` - The parameter's name.
    /// * `shape` - Computes the parameter's shape from this model's dimensions.
    /// * `init` - Fills the parameter once it's allocated.
    pub fn with_param(
        mut self,
        name: &'static str,
        shape: ShapeFn,
        init: Rc<dyn Initializer>,
    ) -> Self {
        self.params.push(Param {
            name,
            shape,
            init,
            data: None,
        });
        self
    }

    pub fn with_layers(mut self, layers: Vec<Model>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_attr(mut self, name: &'static str, attr: Attr) -> Self {
        self.attrs.insert(name, attr);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// The `name#id` label used to point at this model in errors.
    pub fn label(&self) -> String {
        format!("{}#{}", self.name, self.id)
    }

    pub fn ops(&self) -> &Rc<dyn Ops> {
        &self.ops
    }

    pub fn layers(&self) -> &[Model] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Model] {
        &mut self.layers
    }

    /// # Errors
    /// `IndexOutOfRange` if this model has no child at `index`.
    pub fn get_layer(&self, index: usize) -> Result<&Model> {
        let len = self.layers.len();

        self.layers.get(index).ok_or_else(|| MlErr::IndexOutOfRange {
            model: self.label(),
            index,
            len,
        })
    }

    /// # Errors
    /// `IndexOutOfRange` if this model has no child at `index`.
    pub fn get_layer_mut(&mut self, index: usize) -> Result<&mut Model> {
        let len = self.layers.len();
        let label = self.label();

        self.layers.get_mut(index).ok_or(MlErr::IndexOutOfRange {
            model: label,
            index,
            len,
        })
    }

    pub fn has_dim(&self, name: &str) -> bool {
        self.dims.contains_key(name)
    }

    /// The value of a dimension, `None` if it's unresolved or not declared.
    pub fn get_dim(&self, name: &str) -> Option<usize> {
        self.dims.get(name).copied().flatten()
    }

    /// The names of the declared dimensions.
    pub fn dim_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.dims.keys().copied()
    }

    /// Resolves a dimension.
    ///
    /// Setting a dimension to the value it already holds does nothing.
    ///
    /// # Errors
    /// `UnknownDimension` if `name` isn't declared, `DimensionConflict` if it's already resolved to
    /// a different value.
    pub fn set_dim(&mut self, name: &str, value: usize) -> Result<()> {
        let label = self.label();

        let Some((&key, slot)) = self.dims.iter_mut().find(|(k, _)| **k == name) else {
            return Err(MlErr::UnknownDimension {
                model: label,
                dim: name.to_string(),
            });
        };

        match *slot {
            Some(current) if current == value => Ok(()),
            Some(current) => Err(MlErr::DimensionConflict {
                model: label,
                dim: name.to_string(),
                current,
                requested: value,
            }),
            None => {
                *slot = Some(value);
                debug!(model = label.as_str(), dim = key, value = value; "dimension resolved");
                Ok(())
            }
        }
    }

    /// Sets a dimension only if it's declared.
    pub(crate) fn hint_dim(&mut self, name: &str, value: usize) -> Result<()> {
        if self.has_dim(name) {
            self.set_dim(name, value)?;
        }

        Ok(())
    }

    /// # Errors
    /// `UnresolvedDimension` if the dimension isn't resolved yet.
    pub fn require_dim(&self, name: &str) -> Result<usize> {
        self.get_dim(name).ok_or_else(|| MlErr::UnresolvedDimension {
            model: self.label(),
            dim: name.to_string(),
        })
    }

    pub fn attr(&self, name: &str) -> Option<Attr> {
        self.attrs.get(name).copied()
    }

    pub fn set_attr(&mut self, name: &'static str, attr: Attr) {
        self.attrs.insert(name, attr);
    }

    pub(crate) fn float_attr(&self, name: &str) -> Result<f32> {
        match self.attr(name) {
            Some(Attr::Float(v)) => Ok(v),
            _ => Err(MlErr::invalid(
                self.label(),
                format!("missing float attribute {name}"),
            )),
        }
    }

    pub(crate) fn int_attr(&self, name: &str) -> Result<usize> {
        match self.attr(name) {
            Some(Attr::Int(v)) => Ok(v),
            _ => Err(MlErr::invalid(
                self.label(),
                format!("missing int attribute {name}"),
            )),
        }
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn param_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().map(|p| p.name)
    }

    fn find_param(&self, name: &str) -> Result<&ParamData> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.data.as_ref())
            .ok_or_else(|| MlErr::MissingParam {
                model: self.label(),
                param: name.to_string(),
            })
    }

    fn find_param_mut(&mut self, name: &str) -> Result<&mut ParamData> {
        let label = self.label();

        self.params
            .iter_mut()
            .find(|p| p.name == name)
            .and_then(|p| p.data.as_mut())
            .ok_or(MlErr::MissingParam {
                model: label,
                param: name.to_string(),
            })
    }

    /// # Errors
    /// `MissingParam` if the parameter isn't declared or not allocated yet.
    pub fn get_param(&self, name: &str) -> Result<&ArrayD<f32>> {
        Ok(&self.find_param(name)?.value)
    }

    pub fn get_param_mut(&mut self, name: &str) -> Result<&mut ArrayD<f32>> {
        Ok(&mut self.find_param_mut(name)?.value)
    }

    pub fn get_grad(&self, name: &str) -> Result<&ArrayD<f32>> {
        Ok(&self.find_param(name)?.grad)
    }

    pub fn get_grad_mut(&mut self, name: &str) -> Result<&mut ArrayD<f32>> {
        Ok(&mut self.find_param_mut(name)?.grad)
    }

    /// Overwrites a parameter, allocating it if needed.
    ///
    /// # Errors
    /// `MissingParam` if the parameter isn't declared, `UnresolvedDimension` if it isn't allocated
    /// and its shape can't be computed yet, `ShapeMismatch` if `value` has the wrong shape.
    pub fn set_param(&mut self, name: &str, value: ArrayD<f32>) -> Result<()> {
        let Some(index) = self.params.iter().position(|p| p.name == name) else {
            return Err(MlErr::MissingParam {
                model: self.label(),
                param: name.to_string(),
            });
        };

        let expected = match &self.params[index].data {
            Some(data) => data.value.shape().to_vec(),
            None => (self.params[index].shape)(self)?,
        };

        if value.ndim() != expected.len() {
            return Err(MlErr::shape(
                self.label(),
                "parameter rank",
                value.ndim(),
                expected.len(),
            ));
        }

        if let Some((&got, &want)) = value.shape().iter().zip(&expected).find(|(g, w)| g != w) {
            return Err(MlErr::shape(self.label(), "parameter shape", got, want));
        }

        let value = value.as_standard_layout().into_owned();
        let param = &mut self.params[index];

        match &mut param.data {
            Some(data) => data.value = value,
            None => param.data = Some(ParamData::new(value)),
        }

        Ok(())
    }

    pub(crate) fn param1(&self, name: &str) -> Result<ArrayView1<'_, f32>> {
        self.find_param(name)?
            .value
            .view()
            .into_dimensionality::<Ix1>()
            .map_err(|e| MlErr::invalid(self.label(), e.to_string()))
    }

    pub(crate) fn param2(&self, name: &str) -> Result<ArrayView2<'_, f32>> {
        self.find_param(name)?
            .value
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|e| MlErr::invalid(self.label(), e.to_string()))
    }

    pub(crate) fn grad1_mut(&mut self, name: &str) -> Result<ArrayViewMut1<'_, f32>> {
        let label = self.label();

        self.find_param_mut(name)?
            .grad
            .view_mut()
            .into_dimensionality::<Ix1>()
            .map_err(|e| MlErr::invalid(label, e.to_string()))
    }

    pub(crate) fn grad2_mut(&mut self, name: &str) -> Result<ArrayViewMut2<'_, f32>> {
        let label = self.label();

        self.find_param_mut(name)?
            .grad
            .view_mut()
            .into_dimensionality::<Ix2>()
            .map_err(|e| MlErr::invalid(label, e.to_string()))
    }

    /// Resolves this model's dimensions and allocates its parameters.
    ///
    /// Runs the init function, which may look at a sample input and output and initialize the
    /// children, then allocates every parameter that isn't allocated yet. Calling it again never
    /// reallocates nor resets a parameter.
    ///
    /// # Arguments
    /// * `x` - An optional sample input.
    /// * `y` - An optional sample output.
    ///
    /// # Errors
    /// `UnresolvedDimension` if a parameter's shape still depends on an unresolved dimension,
    /// `DimensionConflict` if the samples disagree with the resolved dimensions.
    pub fn initialize(&mut self, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
        if let Some(init) = self.init {
            init(self, x, y)?;
        }

        self.allocate_params()
    }

    fn allocate_params(&mut self) -> Result<()> {
        let label = self.label();

        for i in 0..self.params.len() {
            if self.params[i].data.is_some() {
                continue;
            }

            let shape = (self.params[i].shape)(self)?;
            let value = self.params[i].init.init(self.ops.as_ref(), &shape)?;

            if value.shape() != shape.as_slice() {
                return Err(MlErr::shape(
                    label,
                    "initializer output",
                    value.len(),
                    shape.iter().product(),
                ));
            }

            debug!(
                model = label.as_str(),
                param = self.params[i].name,
                size = value.len();
                "parameter allocated"
            );
            self.params[i].data = Some(ParamData::new(value));
        }

        Ok(())
    }

    /// Runs the model on `x`.
    ///
    /// # Arguments
    /// * `x` - The input.
    /// * `is_train` - Whether a backward pass will follow. Inference calls return a `Backprop`
    ///   that can't be called and skip every training only buffer.
    pub fn forward(&self, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
        (self.forward)(self, x, is_train)
    }

    /// Training forward pass.
    pub fn begin_update(&self, x: Data) -> Result<(Data, Backprop)> {
        self.forward(x, true)
    }

    /// Inference forward pass.
    pub fn predict(&self, x: Data) -> Result<Data> {
        self.forward(x, false).map(|(y, _)| y)
    }

    /// Deep copies this model, every node of the copy gets a fresh id.
    pub fn copy(&self) -> Model {
        Model {
            name: self.name.clone(),
            id: next_id(),
            forward: self.forward,
            init: self.init,
            layers: self.layers.iter().map(Model::copy).collect(),
            dims: self.dims.clone(),
            params: self.params.clone(),
            attrs: self.attrs.clone(),
            ops: Rc::clone(&self.ops),
        }
    }

    /// Every model in this tree, in pre-order.
    pub fn walk(&self) -> Vec<&Model> {
        let mut nodes = vec![self];

        for layer in &self.layers {
            nodes.extend(layer.walk());
        }

        nodes
    }

    /// Resets every gradient of this tree to zero.
    pub fn zero_grads(&mut self) {
        for param in &mut self.params {
            if let Some(data) = &mut param.data {
                data.grad.fill(0.);
            }
        }

        for layer in &mut self.layers {
            layer.zero_grads();
        }
    }

    /// The amount of allocated scalar parameters in this tree.
    pub fn num_params(&self) -> usize {
        let own: usize = self
            .params
            .iter()
            .filter_map(|p| p.data.as_ref())
            .map(|d| d.value.len())
            .sum();

        own + self.layers.iter().map(Model::num_params).sum::<usize>()
    }

    /// Hands every allocated parameter of this tree and its gradient to the optimizer.
    ///
    /// The optimizer updates the weights in place and resets the gradients.
    pub fn finish_update<O: Optimizer + ?Sized>(&mut self, optimizer: &mut O) -> Result<()> {
        let model_id = self.id;
        let label = self.label();

        for param in &mut self.params {
            let Some(ParamData { value, grad }) = &mut param.data else {
                continue;
            };

            let (Some(weights), Some(grad)) = (value.as_slice_mut(), grad.as_slice_mut()) else {
                return Err(MlErr::invalid(
                    label,
                    format!("parameter {} isn't contiguous", param.name),
                ));
            };

            let key = ParamKey {
                model_id,
                param: param.name,
            };

            optimizer.update(key, weights, grad)?;
        }

        for layer in &mut self.layers {
            layer.finish_update(optimizer)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self
            .params
            .iter()
            .map(|p| (p.name, p.data.as_ref().map(|d| d.value.shape().to_vec())))
            .collect();

        f.debug_struct("Model")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("dims", &self.dims)
            .field("params", &params)
            .field("attrs", &self.attrs)
            .field("layers", &self.layers)
            .finish()
    }
}
