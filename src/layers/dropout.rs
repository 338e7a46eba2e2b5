use std::rc::Rc;

use super::{check_input_width, init_same_width};
use crate::{
    MlErr, Result,
    data::Data,
    model::{Attr, Backprop, Model},
    ops::Ops,
};

/// Randomly zeroes a `rate` fraction of its input while training.
///
/// Kept entries are scaled by `1 / (1 - rate)` so inference can be the identity.
pub fn dropout(ops: &Rc<dyn Ops>, rate: f32) -> Model {
    Model::new("dropout", ops, forward)
        .with_init(init_same_width)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_attr("dropout_rate", Attr::Float(rate))
}

/// # Errors
/// `InvalidInput` if `rate` isn't within `[0, 1]`, NaN included.
pub(crate) fn check_rate(model: &Model, rate: f32) -> Result<()> {
    if !(0. ..=1.).contains(&rate) {
        return Err(MlErr::invalid(
            model.label(),
            format!("dropout rate {rate} is not within [0, 1]"),
        ));
    }

    Ok(())
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let rate = model.float_attr("dropout_rate")?;
    check_rate(model, rate)?;
    check_input_width(model, &x)?;

    if !is_train {
        return Ok((x, Backprop::inference(model)));
    }

    let ops = model.ops();
    let mut masks = Vec::new();
    let y = x.map_arrays(model, |x| match ops.get_dropout_mask(x.dim(), rate) {
        Some(mask) => {
            let y = x * &mask;
            masks.push(mask);
            Ok(y)
        }
        None => Ok(x),
    })?;

    let backprop = Backprop::new(model, move |model, d_y| {
        let mut masks = masks.into_iter();

        d_y.map_arrays(model, |d_y| match masks.next() {
            Some(mask) if mask.dim() == d_y.dim() => Ok(d_y * &mask),
            Some(mask) => Err(MlErr::shape(
                model.label(),
                "output gradient width",
                d_y.ncols(),
                mask.ncols(),
            )),
            None => Ok(d_y),
        })
    });

    Ok((y, backprop))
}
