use std::rc::Rc;

use ndarray::{Array2, Axis};

use super::{check_input_width, init_same_width};
use crate::{
    Result,
    data::Data,
    model::{Backprop, ForwardFn, Model},
    ops::Ops,
};

/// An elementwise activation function.
///
/// The derivative is expressed in terms of the function's output, so the backward pass only
/// needs to keep the forward output around.
trait ActFn: 'static {
    fn f(x: f32) -> f32;
    fn df(y: f32) -> f32;
}

struct Relu;

impl ActFn for Relu {
    fn f(x: f32) -> f32 {
        x.max(0.)
    }

    fn df(y: f32) -> f32 {
        if y > 0. { 1. } else { 0. }
    }
}

struct Sigmoid;

impl ActFn for Sigmoid {
    fn f(x: f32) -> f32 {
        1. / (1. + (-x).exp())
    }

    fn df(y: f32) -> f32 {
        y * (1. - y)
    }
}

struct Tanh;

impl ActFn for Tanh {
    fn f(x: f32) -> f32 {
        x.tanh()
    }

    fn df(y: f32) -> f32 {
        1. - y * y
    }
}

fn activation(name: &str, ops: &Rc<dyn Ops>, forward: ForwardFn) -> Model {
    Model::new(name, ops, forward)
        .with_init(init_same_width)
        .with_dim("nO", None)
        .with_dim("nI", None)
}

/// Rectified linear unit, `max(x, 0)`.
pub fn relu(ops: &Rc<dyn Ops>) -> Model {
    activation("relu", ops, forward_elementwise::<Relu>)
}

/// Logistic sigmoid.
pub fn sigmoid(ops: &Rc<dyn Ops>) -> Model {
    activation("sigmoid", ops, forward_elementwise::<Sigmoid>)
}

/// Hyperbolic tangent.
pub fn tanh(ops: &Rc<dyn Ops>) -> Model {
    activation("tanh", ops, forward_elementwise::<Tanh>)
}

/// Row-wise softmax.
pub fn softmax(ops: &Rc<dyn Ops>) -> Model {
    activation("softmax", ops, forward_softmax)
}

fn forward_elementwise<A: ActFn>(
    model: &Model,
    x: Data,
    is_train: bool,
) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;
    let y = x.map_arrays(model, |x| Ok(x.mapv(A::f)))?;

    if !is_train {
        return Ok((y, Backprop::inference(model)));
    }

    let cached = y.clone();
    let backprop = Backprop::new(model, move |model, d_y| {
        d_y.zip_map(&cached, model, |d_y, y| Ok(d_y * &y.mapv(A::df)))
    });

    Ok((y, backprop))
}

fn softmax_rows(x: Array2<f32>) -> Array2<f32> {
    let mut y = x;

    for mut row in y.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());

        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }

    y
}

fn forward_softmax(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;
    let y = x.map_arrays(model, |x| Ok(softmax_rows(x)))?;

    if !is_train {
        return Ok((y, Backprop::inference(model)));
    }

    let cached = y.clone();
    let backprop = Backprop::new(model, move |model, d_y| {
        d_y.zip_map(&cached, model, |d_y, y| {
            let dot = (&d_y * y).sum_axis(Axis(1)).insert_axis(Axis(1));
            Ok(y * &(d_y - &dot))
        })
    });

    Ok((y, backprop))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;
    use crate::{
        MlErr,
        data::Ragged,
        layers::testing::{assert_close, numeric_input_grad},
        ops::NdOps,
    };

    fn check_gradient(mut model: Model) {
        let x = array![[0.5, -1.2, 2.], [-0.3, 0.8, 0.1]];
        let d_y = array![[1., -2., 0.5], [0.2, 0.3, -1.]];

        let (_, backprop) = model.begin_update(Data::Array(x.clone())).unwrap();
        let d_x = backprop
            .call(&mut model, Data::Array(d_y.clone()))
            .unwrap()
            .into_array(&model)
            .unwrap();

        assert_close(&numeric_input_grad(&model, &x, &d_y), &d_x);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let ops = NdOps::shared(Some(0));

        for model in [sigmoid(&ops), tanh(&ops), softmax(&ops)] {
            check_gradient(model);
        }
    }

    #[test]
    fn relu_clips_and_masks() {
        let ops = NdOps::shared(Some(0));
        let mut model = relu(&ops);

        let (y, backprop) = model
            .begin_update(Data::Array(array![[-1., 2.], [3., -4.]]))
            .unwrap();
        assert_eq!(y, Data::Array(array![[0., 2.], [3., 0.]]));

        let d_x = backprop
            .call(&mut model, Data::Array(array![[5., 5.], [5., 5.]]))
            .unwrap();
        assert_eq!(d_x, Data::Array(array![[0., 5.], [5., 0.]]));
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let ops = NdOps::shared(Some(0));
        let model = softmax(&ops);

        let y = model
            .predict(Data::Array(array![[1., 2., 3.], [1000., 1000., 1000.]]))
            .unwrap()
            .into_array(&model)
            .unwrap();

        for row in y.rows() {
            assert!((row.sum() - 1.).abs() < 1e-6);
        }
    }

    #[test]
    fn works_on_ragged_and_lists() {
        let ops = NdOps::shared(Some(0));
        let model = tanh(&ops);

        let ragged = Ragged::new(array![[0.], [1.], [2.]], vec![1, 2]).unwrap();
        let Data::Ragged(y) = model.predict(Data::Ragged(ragged)).unwrap() else {
            panic!("expected ragged output");
        };
        assert_eq!(y.lengths(), &[1, 2]);

        let y = model
            .predict(Data::List(vec![array![[0.]], array![[0.], [0.]]]))
            .unwrap();
        assert_eq!(y, Data::List(vec![array![[0.]], array![[0.], [0.]]]));
    }

    #[test]
    fn infers_equal_widths() {
        let ops = NdOps::shared(Some(0));
        let mut model = relu(&ops);

        model
            .initialize(Some(&Data::Array(Array2::zeros((2, 7)))), None)
            .unwrap();
        assert_eq!(model.get_dim("nI"), Some(7));
        assert_eq!(model.get_dim("nO"), Some(7));
    }

    #[test]
    fn rejects_inputs_of_another_width() {
        let ops = NdOps::shared(Some(0));
        let mut model = relu(&ops);
        model
            .initialize(Some(&Data::Array(Array2::zeros((2, 4)))), None)
            .unwrap();

        assert!(matches!(
            model.predict(Data::Array(Array2::zeros((2, 7)))),
            Err(MlErr::ShapeMismatch { got: 7, expected: 4, .. })
        ));

        let mut model = softmax(&ops);
        model
            .initialize(Some(&Data::Array(Array2::zeros((2, 4)))), None)
            .unwrap();
        let xs = Data::List(vec![Array2::zeros((3, 4)), Array2::zeros((1, 5))]);

        assert!(matches!(
            model.begin_update(xs),
            Err(MlErr::ShapeMismatch { got: 5, expected: 4, .. })
        ));
    }
}
