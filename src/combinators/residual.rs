use crate::{
    Result,
    data::Data,
    model::{Backprop, Model},
};

/// `Y = X + f(X)`, where `f` is `layer`.
///
/// `layer` must be as wide at its output as at its input.
pub fn residual(layer: Model) -> Model {
    let ops = layer.ops().clone();

    Model::new("residual", &ops, forward)
        .with_init(init)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(vec![layer])
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    let layer = model.get_layer(0)?;
    let width = x
        .and_then(Data::sample_width)
        .or_else(|| y.and_then(Data::sample_width))
        .or_else(|| model.get_dim("nI"))
        .or_else(|| model.get_dim("nO"))
        .or_else(|| layer.get_dim("nI"))
        .or_else(|| layer.get_dim("nO"));

    if let Some(width) = width {
        model.set_dim("nI", width)?;
        model.set_dim("nO", width)?;

        let layer = model.get_layer_mut(0)?;
        layer.hint_dim("nI", width)?;
        layer.hint_dim("nO", width)?;
    }

    model.get_layer_mut(0)?.initialize(x, None)
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let layer = model.get_layer(0)?;
    let (y, backprop) = layer.forward(x.clone(), is_train)?;
    let y = y.add(&x, model)?;

    if !is_train {
        return Ok((y, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let d_x = backprop.call(model.get_layer_mut(0)?, d_y.clone())?;
        d_x.add(&d_y, model)
    });

    Ok((y, backprop))
}
