use ndarray::{Array2, s};

use crate::{
    MlErr, Result,
    data::Data,
    model::{Backprop, Model},
};

/// Runs `l2r` over a list of sequences and `r2l` over the same sequences reversed, stacking their
/// outputs per timestep.
///
/// The output of `r2l` is reversed back before stacking, so row `t` of every output sequence
/// holds both directions' view of timestep `t`.
pub fn bidirectional(l2r: Model, r2l: Model) -> Model {
    let ops = l2r.ops().clone();

    Model::new("bidirectional", &ops, forward)
        .with_init(init)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(vec![l2r, r2l])
}

fn reverse_rows(x: &Array2<f32>) -> Array2<f32> {
    x.slice(s![..;-1, ..]).to_owned()
}

fn reverse_all(xs: &[Array2<f32>]) -> Vec<Array2<f32>> {
    xs.iter().map(reverse_rows).collect()
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    if let Some(width) = x.and_then(Data::sample_width) {
        model.set_dim("nI", width)?;
    }

    if let Some(width) = y.and_then(Data::sample_width) {
        model.set_dim("nO", width)?;
    }

    let n_o = model.get_dim("nO");
    let known = [0, 1].map(|i| model.layers()[i].get_dim("nO"));

    // Split the output width between the directions.
    let split = match (n_o, known) {
        (Some(n_o), [Some(l2r), None]) => [None, Some(n_o.saturating_sub(l2r))],
        (Some(n_o), [None, Some(r2l)]) => [Some(n_o.saturating_sub(r2l)), None],
        (Some(n_o), [None, None]) if n_o % 2 == 0 => [Some(n_o / 2), Some(n_o / 2)],
        _ => [None, None],
    };

    let n_i = model.get_dim("nI");
    for (layer, n_o) in model.layers_mut().iter_mut().zip(split) {
        if let Some(n_i) = n_i {
            layer.hint_dim("nI", n_i)?;
        }

        if let Some(n_o) = n_o {
            layer.hint_dim("nO", n_o)?;
        }

        layer.initialize(x, None)?;
    }

    let widths = [0, 1].map(|i| model.layers()[i].get_dim("nO"));
    if let [Some(l2r), Some(r2l)] = widths {
        model.set_dim("nO", l2r + r2l)?;
    }

    if let Some(n_i) = model.layers()[0].get_dim("nI") {
        model.set_dim("nI", n_i)?;
    }

    Ok(())
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let xs = x.into_list(model)?;
    let reversed = reverse_all(&xs);

    let (l2r, r2l) = (model.get_layer(0)?, model.get_layer(1)?);
    let (fwd, fwd_backprop) = l2r.forward(Data::List(xs), is_train)?;
    let (bwd, bwd_backprop) = r2l.forward(Data::List(reversed), is_train)?;
    let bwd = Data::List(reverse_all(&bwd.into_list(r2l)?));

    let widths = [fwd.width(), bwd.width()];
    let y = Data::hstack(vec![fwd, bwd], model)?;

    if !is_train {
        return Ok((y, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let mut d_ys = d_y.split_cols(&widths, model)?.into_iter();
        let (Some(d_fwd), Some(d_bwd)) = (d_ys.next(), d_ys.next()) else {
            return Err(MlErr::invalid(model.label(), "gradient split failed"));
        };

        let d_bwd = Data::List(reverse_all(&d_bwd.into_list(model)?));

        let layers = model.layers_mut();
        let d_x_fwd = fwd_backprop.call(&mut layers[0], d_fwd)?;
        let d_x_bwd = bwd_backprop.call(&mut layers[1], d_bwd)?;
        let d_x_bwd = Data::List(reverse_all(&d_x_bwd.into_list(model)?));

        d_x_fwd.add(&d_x_bwd, model)
    });

    Ok((y, backprop))
}
