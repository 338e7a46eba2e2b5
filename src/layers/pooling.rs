use std::rc::Rc;

use super::{check_input_width, init_same_width};
use crate::{
    Result,
    data::{Data, Ragged},
    model::{Backprop, ForwardFn, Model},
    ops::Ops,
};

/// Reduces every sequence of a ragged batch to its elementwise maximum.
pub fn max_pool(ops: &Rc<dyn Ops>) -> Model {
    pooling("max_pool", ops, forward_max)
}

/// Reduces every sequence of a ragged batch to its mean.
pub fn mean_pool(ops: &Rc<dyn Ops>) -> Model {
    pooling("mean_pool", ops, forward_mean)
}

fn pooling(name: &str, ops: &Rc<dyn Ops>, forward: ForwardFn) -> Model {
    Model::new(name, ops, forward)
        .with_init(init_same_width)
        .with_dim("nO", None)
        .with_dim("nI", None)
}

fn forward_max(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;
    let (x, lengths) = x.into_ragged(model)?.into_parts();
    let (pooled, which) = model.ops().max_pool(x.view(), &lengths)?;

    if !is_train {
        return Ok((Data::Array(pooled), Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let d_y = d_y.into_array(model)?;
        let d_x = model
            .ops()
            .backprop_max_pool(d_y.view(), which.view(), &lengths)?;

        Ok(Data::Ragged(Ragged::new(d_x, lengths)?))
    });

    Ok((Data::Array(pooled), backprop))
}

fn forward_mean(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;
    let (x, lengths) = x.into_ragged(model)?.into_parts();
    let pooled = model.ops().mean_pool(x.view(), &lengths)?;

    if !is_train {
        return Ok((Data::Array(pooled), Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let d_y = d_y.into_array(model)?;
        let d_x = model.ops().backprop_mean_pool(d_y.view(), &lengths)?;

        Ok(Data::Ragged(Ragged::new(d_x, lengths)?))
    });

    Ok((Data::Array(pooled), backprop))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array, s};

    use super::*;
    use crate::{MlErr, ops::NdOps};

    #[test]
    fn max_pool_over_ragged_lengths() {
        let ops = NdOps::shared(Some(0));
        let mut model = max_pool(&ops);

        let x = Array2::from_shape_fn((11, 3), |(i, j)| ((i * 7 + j * 5) % 11) as f32);
        let lengths = vec![4, 2, 5];
        let ragged = Ragged::new(x.clone(), lengths.clone()).unwrap();

        let (y, backprop) = model.begin_update(Data::Ragged(ragged)).unwrap();
        let y = y.into_array(&model).unwrap();
        assert_eq!(y.dim(), (3, 3));

        let mut start = 0;
        for (i, &len) in lengths.iter().enumerate() {
            let seq = x.slice(s![start..start + len, ..]);
            for j in 0..3 {
                let max = seq.column(j).fold(f32::NEG_INFINITY, |m, &v| m.max(v));
                assert_eq!(y[[i, j]], max);
            }
            start += len;
        }

        let d_y = Array2::from_elem((3, 3), 1.);
        let d_x = backprop
            .call(&mut model, Data::Array(d_y))
            .unwrap()
            .into_ragged(&model)
            .unwrap();
        assert_eq!(d_x.lengths(), lengths.as_slice());

        let mut start = 0;
        for (i, &len) in lengths.iter().enumerate() {
            for j in 0..3 {
                let column = d_x.data().slice(s![start..start + len, j]);
                assert_eq!(column.sum(), 1.);

                let argmax = column.iter().position(|&v| v == 1.).unwrap();
                assert_eq!(x[[start + argmax, j]], y[[i, j]]);
            }
            start += len;
        }
    }

    #[test]
    fn mean_pool_averages_sequences() {
        let ops = NdOps::shared(Some(0));
        let model = mean_pool(&ops);
        let ragged = Ragged::new(array![[1., 0.], [3., 2.], [5., 5.]], vec![2, 1]).unwrap();

        let y = model.predict(Data::Ragged(ragged)).unwrap();
        assert_eq!(y, Data::Array(array![[2., 1.], [5., 5.]]));
    }

    #[test]
    fn rejects_inputs_of_another_width() {
        let ops = NdOps::shared(Some(0));
        let sample = Ragged::new(Array2::zeros((3, 4)), vec![2, 1]).unwrap();
        let ragged = Ragged::new(Array2::zeros((3, 7)), vec![2, 1]).unwrap();

        for mut model in [max_pool(&ops), mean_pool(&ops)] {
            model
                .initialize(Some(&Data::Ragged(sample.clone())), None)
                .unwrap();

            assert!(matches!(
                model.predict(Data::Ragged(ragged.clone())),
                Err(MlErr::ShapeMismatch { got: 7, expected: 4, .. })
            ));
        }
    }
}
