use crate::{
    Result,
    data::Data,
    model::{Backprop, Model},
};

/// Runs `layer` on a list of sequences as a single array, splitting its output back per sequence.
pub fn with_flatten(layer: Model) -> Model {
    let ops = layer.ops().clone();

    Model::new("with_flatten", &ops, forward)
        .with_init(init)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(vec![layer])
}

fn flatten_sample(model: &Model, data: Option<&Data>) -> Result<Option<Data>> {
    match data {
        Some(Data::List(xs)) if !xs.is_empty() => Ok(Some(Data::Array(model.ops().flatten(xs)?))),
        _ => Ok(None),
    }
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    let x = flatten_sample(model, x)?;
    let y = flatten_sample(model, y)?;

    let hints = (model.get_dim("nI"), model.get_dim("nO"));
    let layer = model.get_layer_mut(0)?;

    if let (Some(n_i), _) = hints {
        layer.hint_dim("nI", n_i)?;
    }

    if let (_, Some(n_o)) = hints {
        layer.hint_dim("nO", n_o)?;
    }

    layer.initialize(x.as_ref(), y.as_ref())?;

    let (n_i, n_o) = (layer.get_dim("nI"), layer.get_dim("nO"));

    if let Some(n_i) = n_i {
        model.set_dim("nI", n_i)?;
    }

    if let Some(n_o) = n_o {
        model.set_dim("nO", n_o)?;
    }

    Ok(())
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let xs = x.into_list(model)?;
    let lengths: Vec<_> = xs.iter().map(|x| x.nrows()).collect();
    let flat = model.ops().flatten(&xs)?;

    let layer = model.get_layer(0)?;
    let (y, backprop) = layer.forward(Data::Array(flat), is_train)?;
    let y = y.into_array(layer)?;
    let ys = Data::List(model.ops().unflatten(y.view(), &lengths)?);

    if !is_train {
        return Ok((ys, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let d_ys = d_y.into_list(model)?;
        let d_flat = model.ops().flatten(&d_ys)?;

        let layer = model.get_layer_mut(0)?;
        let d_x = backprop.call(layer, Data::Array(d_flat))?.into_array(layer)?;

        Ok(Data::List(model.ops().unflatten(d_x.view(), &lengths)?))
    });

    Ok((ys, backprop))
}
