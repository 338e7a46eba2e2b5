use log::trace;

use crate::{
    MlErr, Result,
    data::Data,
    model::{Backprop, Model},
};

/// Composes models in sequence, the output of each one is the input of the next.
///
/// # Errors
/// `InvalidInput` if `layers` is empty.
pub fn chain(layers: Vec<Model>) -> Result<Model> {
    let Some(first) = layers.first() else {
        return Err(MlErr::invalid("chain", "needs at least one layer"));
    };

    let ops = first.ops().clone();

    Ok(Model::new("chain", &ops, forward)
        .with_init(init)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(layers))
}

/// Threads `x` through every child, backward runs their backward passes in reverse.
pub(super) fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let mut x = x;
    let mut backprops = Vec::with_capacity(model.layers().len());

    for layer in model.layers() {
        let (y, backprop) = layer.forward(x, is_train)?;
        x = y;
        backprops.push(backprop);
    }

    if !is_train {
        return Ok((x, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        trace!(model = model.label().as_str(); "chain backward");

        let mut d = d_y;
        for (layer, backprop) in model.layers_mut().iter_mut().zip(backprops).rev() {
            d = backprop.call(layer, d)?;
        }

        Ok(d)
    });

    Ok((x, backprop))
}

/// Resolves the children's dimensions from one another.
///
/// The chain's own `nI` and `nO` go to the first and last child. Known input widths flow
/// backwards first, through the parameterless leaves too. The sample input is then threaded
/// through the children, each one initialized on the output of the previous one. Without a
/// sample, the previous child's `nO` becomes the next one's `nI`. Only the last child sees the
/// sample output.
pub(super) fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    if let Some(n_i) = model.get_dim("nI") {
        model.get_layer_mut(0)?.hint_dim("nI", n_i)?;
    }

    let n = model.layers().len();
    if let Some(n_o) = model.get_dim("nO") {
        model.get_layer_mut(n - 1)?.hint_dim("nO", n_o)?;
    }

    // Walk back from the end so widths known downstream reach the children before them.
    for i in (0..n).rev() {
        let next_n_i = model.layers().get(i + 1).and_then(|next| next.get_dim("nI"));
        let layer = model.get_layer_mut(i)?;

        if let Some(next_n_i) = next_n_i {
            if layer.has_dim("nO") && layer.get_dim("nO").is_none() {
                layer.set_dim("nO", next_n_i)?;
            }
        }

        if layer.layers().is_empty() && layer.param_names().next().is_none() {
            layer.initialize(None, if i == n - 1 { y } else { None })?;
        }
    }

    let mut x = x.cloned();
    let mut width = None;

    for i in 0..n {
        let next_n_i = model.layers().get(i + 1).and_then(|next| next.get_dim("nI"));
        let layers = model.layers_mut();
        let layer = &mut layers[i];

        if let Some(width) = width {
            layer.hint_dim("nI", width)?;
        }

        if let Some(next_n_i) = next_n_i {
            if layer.has_dim("nO") && layer.get_dim("nO").is_none() {
                layer.set_dim("nO", next_n_i)?;
            }
        }

        let y = if i == n - 1 { y } else { None };
        layer.initialize(x.as_ref(), y)?;

        width = layer.get_dim("nO");
        if let Some(sample) = x.take() {
            let output = layer.predict(sample)?;
            width = output.sample_width().or(width);
            x = Some(output);
        }
    }

    if let Some(n_i) = model.get_layer(0)?.get_dim("nI") {
        model.set_dim("nI", n_i)?;
    }

    if let Some(n_o) = width {
        model.set_dim("nO", n_o)?;
    }

    trace!(model = model.label().as_str(); "chain initialized");
    Ok(())
}
