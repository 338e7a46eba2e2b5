use std::rc::Rc;

use ndarray::{Array2, Axis};

use super::init_same_width;
use crate::{
    MlErr, Result,
    data::Data,
    init::ConstInit,
    model::{Backprop, Model},
    ops::Ops,
};

const EPS: f32 = 1e-8;

/// Normalizes every row to zero mean and unit variance, then scales it by a learned gain `G` and
/// shifts it by a learned bias `b`.
pub fn layer_norm(ops: &Rc<dyn Ops>, n_i: Option<usize>) -> Model {
    Model::new("layer_norm", ops, forward)
        .with_init(init_same_width)
        .with_dim("nO", n_i)
        .with_dim("nI", n_i)
        .with_param("G", vector_shape, Rc::new(ConstInit::new(1.)))
        .with_param("b", vector_shape, Rc::new(ConstInit::zeros()))
}

fn vector_shape(model: &Model) -> Result<Vec<usize>> {
    Ok(vec![model.require_dim("nI")?])
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let x = x.into_array(model)?;
    let n_i = model.require_dim("nI")?;

    if x.ncols() != n_i {
        return Err(MlErr::shape(model.label(), "input width", x.ncols(), n_i));
    }

    let mean = x.sum_axis(Axis(1)).insert_axis(Axis(1)) / n_i as f32;
    let centered = &x - &mean;
    let var = centered.mapv(|v| v * v).sum_axis(Axis(1)).insert_axis(Axis(1)) / n_i as f32;
    let inv_std = var.mapv(|v| 1. / (v + EPS).sqrt());
    let x_hat = centered * &inv_std;

    let y = &x_hat * &model.param1("G")? + &model.param1("b")?;

    if !is_train {
        return Ok((Data::Array(y), Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let d_y = d_y.into_array(model)?;

        if d_y.dim() != x_hat.dim() {
            return Err(MlErr::shape(model.label(), "output gradient width", d_y.ncols(), n_i));
        }

        let d_x_hat: Array2<f32> = &d_y * &model.param1("G")?;
        let sum_d = d_x_hat.sum_axis(Axis(1)).insert_axis(Axis(1));
        let sum_d_xhat = (&d_x_hat * &x_hat).sum_axis(Axis(1)).insert_axis(Axis(1));
        let n = n_i as f32;
        let d_x = (d_x_hat * n - &sum_d - &(&x_hat * &sum_d_xhat)) * &(inv_std / n);

        let mut grad_g = model.grad1_mut("G")?;
        grad_g += &(&d_y * &x_hat).sum_axis(Axis(0));

        let mut grad_b = model.grad1_mut("b")?;
        grad_b += &d_y.sum_axis(Axis(0));

        Ok(Data::Array(d_x))
    });

    Ok((Data::Array(y), backprop))
}
