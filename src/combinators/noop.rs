use std::rc::Rc;

use crate::{
    Result,
    data::Data,
    layers::{check_input_width, init_same_width},
    model::{Backprop, Model},
    ops::Ops,
};

/// The identity. The given layers are carried along as children but never run.
pub fn noop(ops: &Rc<dyn Ops>, layers: Vec<Model>) -> Model {
    Model::new("noop", ops, forward)
        .with_init(init_same_width)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(layers)
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;

    if !is_train {
        return Ok((x, Backprop::inference(model)));
    }

    Ok((x, Backprop::new(model, |_, d_y| Ok(d_y))))
}
