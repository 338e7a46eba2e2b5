use log::trace;

use crate::{
    MlErr, Result,
    data::Data,
    layers::check_input_width,
    model::{Backprop, Model},
};

/// Runs every layer on the same input and stacks their outputs along the feature axis.
///
/// # Errors
/// `InvalidInput` if `layers` is empty.
pub fn concatenate(layers: Vec<Model>) -> Result<Model> {
    let Some(first) = layers.first() else {
        return Err(MlErr::invalid("concatenate", "needs at least one layer"));
    };

    let ops = first.ops().clone();

    Ok(Model::new("concatenate", &ops, forward)
        .with_init(init)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(layers))
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    let n_i = x
        .and_then(Data::sample_width)
        .or_else(|| model.get_dim("nI"));

    let mut n_o = Some(0);
    for layer in model.layers_mut() {
        if let Some(n_i) = n_i {
            layer.hint_dim("nI", n_i)?;
        }

        layer.initialize(x, None)?;

        let width = match x {
            Some(x) => layer.predict(x.clone())?.sample_width(),
            None => layer.get_dim("nO"),
        };

        n_o = n_o.zip(width).map(|(total, width)| total + width);
    }

    if let Some(n_i) = n_i {
        model.set_dim("nI", n_i)?;
    }

    if let Some(width) = y.and_then(Data::sample_width) {
        model.set_dim("nO", width)?;
    }

    if let Some(n_o) = n_o {
        model.set_dim("nO", n_o)?;
    }

    Ok(())
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;

    let mut outputs = Vec::with_capacity(model.layers().len());
    let mut backprops = Vec::with_capacity(model.layers().len());

    for layer in model.layers() {
        let (y, backprop) = layer.forward(x.clone(), is_train)?;
        outputs.push(y);
        backprops.push(backprop);
    }

    let widths: Vec<_> = outputs.iter().map(Data::width).collect();
    let y = Data::hstack(outputs, model)?;

    if !is_train {
        return Ok((y, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        trace!(model = model.label().as_str(); "concatenate backward");

        let d_ys = d_y.split_cols(&widths, model)?;
        let mut d_x: Option<Data> = None;

        for ((layer, backprop), d_y) in model.layers_mut().iter_mut().zip(backprops).zip(d_ys) {
            let d = backprop.call(layer, d_y)?;

            d_x = Some(match d_x {
                Some(acc) => acc.add(&d, layer)?,
                None => d,
            });
        }

        d_x.ok_or_else(|| MlErr::invalid(model.label(), "no layers to backpropagate through"))
    });

    Ok((y, backprop))
}
