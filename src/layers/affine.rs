use std::rc::Rc;

use ndarray::Axis;

use crate::{
    MlErr, Result,
    data::Data,
    init::{ConstInit, Initializer, RandInit},
    model::{Backprop, Model},
    ops::Ops,
};

/// A fully connected layer, `Y = X·Wᵗ + b`.
///
/// Weights are Xavier uniform initialized, biases start at zero.
///
/// # Arguments
/// * `ops` - The numeric backend.
/// * `n_out` - The amount of output units, inferred from the sample output if `None`.
/// * `n_in` - The amount of input units, inferred from the sample input if `None`.
pub fn affine(ops: &Rc<dyn Ops>, n_out: Option<usize>, n_in: Option<usize>) -> Model {
    affine_with(
        ops,
        n_out,
        n_in,
        Rc::new(RandInit::xavier_uniform()),
        Rc::new(ConstInit::zeros()),
    )
}

/// Like `affine`, with custom initializers for the weights and biases.
pub fn affine_with(
    ops: &Rc<dyn Ops>,
    n_out: Option<usize>,
    n_in: Option<usize>,
    init_w: Rc<dyn Initializer>,
    init_b: Rc<dyn Initializer>,
) -> Model {
    Model::new("affine", ops, forward)
        .with_init(init)
        .with_dim("nO", n_out)
        .with_dim("nI", n_in)
        .with_param("W", w_shape, init_w)
        .with_param("b", b_shape, init_b)
}

fn w_shape(model: &Model) -> Result<Vec<usize>> {
    Ok(vec![model.require_dim("nO")?, model.require_dim("nI")?])
}

fn b_shape(model: &Model) -> Result<Vec<usize>> {
    Ok(vec![model.require_dim("nO")?])
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    if let Some(width) = x.and_then(Data::sample_width) {
        model.set_dim("nI", width)?;
    }

    if let Some(width) = y.and_then(Data::sample_width) {
        model.set_dim("nO", width)?;
    }

    Ok(())
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let x = x.into_array(model)?;
    let n_i = model.require_dim("nI")?;
    let n_o = model.require_dim("nO")?;

    if x.ncols() != n_i {
        return Err(MlErr::shape(model.label(), "input width", x.ncols(), n_i));
    }

    let y = model.ops().gemm(x.view(), model.param2("W")?, false, true)? + &model.param1("b")?;

    if !is_train {
        return Ok((Data::Array(y), Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let d_y = d_y.into_array(model)?;

        if d_y.dim() != (x.nrows(), n_o) {
            return Err(MlErr::shape(model.label(), "output gradient width", d_y.ncols(), n_o));
        }

        let ops = model.ops();
        let d_x = ops.gemm(d_y.view(), model.param2("W")?, false, false)?;
        let d_w = ops.gemm(d_y.view(), x.view(), true, false)?;

        let mut grad_w = model.grad2_mut("W")?;
        grad_w += &d_w;

        let mut grad_b = model.grad1_mut("b")?;
        grad_b += &d_y.sum_axis(Axis(0));

        Ok(Data::Array(d_x))
    });

    Ok((Data::Array(y), backprop))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;
    use crate::{
        layers::testing::{assert_close, numeric_input_grad, numeric_param_grad},
        ops::NdOps,
    };

    #[test]
    fn infers_dims_from_samples() {
        let ops = NdOps::shared(Some(0));
        let mut model = affine(&ops, None, None);

        let x = Data::Array(Array2::zeros((128, 16)));
        let y = Data::Array(Array2::zeros((128, 10)));
        model.initialize(Some(&x), Some(&y)).unwrap();

        assert_eq!(model.get_dim("nI"), Some(16));
        assert_eq!(model.get_dim("nO"), Some(10));
        assert_eq!(model.get_param("W").unwrap().shape(), &[10, 16]);
        assert_eq!(model.get_param("b").unwrap().shape(), &[10]);
    }

    #[test]
    fn forward_computes_xwt_plus_b() {
        let ops = NdOps::shared(Some(0));
        let mut model = affine(&ops, Some(2), Some(3));
        model.initialize(None, None).unwrap();
        model
            .set_param("W", array![[1., 0., 1.], [0., 2., 0.]].into_dyn())
            .unwrap();
        model.set_param("b", array![0.5, -1.].into_dyn()).unwrap();

        let y = model.predict(Data::Array(array![[1., 2., 3.]])).unwrap();
        assert_eq!(y, Data::Array(array![[4.5, 3.]]));
    }

    #[test]
    fn rejects_wrong_input_width() {
        let ops = NdOps::shared(Some(0));
        let mut model = affine(&ops, Some(2), Some(3));
        model.initialize(None, None).unwrap();

        assert!(matches!(
            model.predict(Data::Array(Array2::zeros((4, 5)))),
            Err(MlErr::ShapeMismatch { got: 5, expected: 3, .. })
        ));
    }

    #[test]
    fn gradients_match_finite_differences() {
        let ops = NdOps::shared(Some(42));
        let mut model = affine(&ops, Some(3), Some(4));
        model.initialize(None, None).unwrap();

        let x = ops.random_normal(&[5, 4], 0., 1.).unwrap();
        let x: Array2<f32> = x.into_dimensionality().unwrap();
        let d_y = array![
            [1., 0., -1.],
            [0.5, 0.5, 0.5],
            [0., 2., 0.],
            [-1., 1., 0.],
            [0.3, -0.2, 0.1]
        ];

        let (_, backprop) = model.begin_update(Data::Array(x.clone())).unwrap();
        let d_x = backprop
            .call(&mut model, Data::Array(d_y.clone()))
            .unwrap()
            .into_array(&model)
            .unwrap();

        assert_close(&numeric_input_grad(&model, &x, &d_y), &d_x);

        let d_w = model.get_grad("W").unwrap().clone();
        assert_close(
            &d_w.into_dimensionality().unwrap(),
            &d_y.t().dot(&x),
        );
        assert_eq!(
            model.get_grad("b").unwrap().view(),
            d_y.sum_axis(Axis(0)).into_dyn().view()
        );
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let ops = NdOps::shared(Some(7));
        let mut model = affine(&ops, Some(3), Some(4));
        model.initialize(None, None).unwrap();

        let x: Array2<f32> = ops
            .random_normal(&[5, 4], 0., 1.)
            .unwrap()
            .into_dimensionality()
            .unwrap();
        let d_y = Array2::from_shape_fn((5, 3), |(i, j)| (i as f32 - j as f32) * 0.25);

        let (_, backprop) = model.begin_update(Data::Array(x.clone())).unwrap();
        backprop.call(&mut model, Data::Array(d_y.clone())).unwrap();
        let analytic = model.get_grad("W").unwrap().clone();

        // The objective is linear in W, so a wide step keeps rounding error small.
        let numeric = numeric_param_grad(&mut model, "W", &x, &d_y, 0.5);

        assert_eq!(numeric.shape(), &[3, 4]);
        for (n, a) in numeric.iter().zip(&analytic) {
            assert!((n - a).abs() <= 1e-3 * (1. + a.abs()), "numeric {n} vs analytic {a}");
        }
    }

    #[test]
    fn gradients_accumulate() {
        let ops = NdOps::shared(Some(0));
        let mut model = affine(&ops, Some(1), Some(1));
        model.initialize(None, None).unwrap();

        for _ in 0..2 {
            let (_, backprop) = model.begin_update(Data::Array(array![[2.]])).unwrap();
            backprop.call(&mut model, Data::Array(array![[1.]])).unwrap();
        }

        assert_eq!(model.get_grad("W").unwrap().as_slice().unwrap(), &[4.]);
        assert_eq!(model.get_grad("b").unwrap().as_slice().unwrap(), &[2.]);
    }
}
