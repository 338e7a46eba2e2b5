use std::rc::Rc;

use ndarray::Array2;

use super::{check_input_width, init_same_width};
use crate::{
    Result,
    data::{Data, Ragged},
    model::{Backprop, ForwardFn, Model},
    ops::Ops,
};

fn conversion(name: &str, ops: &Rc<dyn Ops>, forward: ForwardFn) -> Model {
    Model::new(name, ops, forward)
        .with_init(init_same_width)
        .with_dim("nO", None)
        .with_dim("nI", None)
}

/// Concatenates a list of sequences into a single array.
pub fn list2array(ops: &Rc<dyn Ops>) -> Model {
    conversion("list2array", ops, forward_list2array)
}

/// Turns a list of sequences into a ragged array.
pub fn list2ragged(ops: &Rc<dyn Ops>) -> Model {
    conversion("list2ragged", ops, forward_list2ragged)
}

/// Turns a ragged array into a list of sequences.
pub fn ragged2list(ops: &Rc<dyn Ops>) -> Model {
    conversion("ragged2list", ops, forward_ragged2list)
}

fn flatten_list(model: &Model, xs: Vec<Array2<f32>>) -> Result<Ragged> {
    let lengths = xs.iter().map(|x| x.nrows()).collect();
    let data = model.ops().flatten(&xs)?;
    Ragged::new(data, lengths)
}

fn forward_list2array(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;
    let (y, lengths) = flatten_list(model, x.into_list(model)?)?.into_parts();

    if !is_train {
        return Ok((Data::Array(y), Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let d_y = d_y.into_array(model)?;
        Ok(Data::List(model.ops().unflatten(d_y.view(), &lengths)?))
    });

    Ok((Data::Array(y), backprop))
}

fn forward_list2ragged(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;
    let y = flatten_list(model, x.into_list(model)?)?;

    if !is_train {
        return Ok((Data::Ragged(y), Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, |model, d_y| {
        let (d_y, lengths) = d_y.into_ragged(model)?.into_parts();
        Ok(Data::List(model.ops().unflatten(d_y.view(), &lengths)?))
    });

    Ok((Data::Ragged(y), backprop))
}

fn forward_ragged2list(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;
    let (x, lengths) = x.into_ragged(model)?.into_parts();
    let y = model.ops().unflatten(x.view(), &lengths)?;

    if !is_train {
        return Ok((Data::List(y), Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, |model, d_y| {
        let d_y = d_y.into_list(model)?;
        Ok(Data::Ragged(flatten_list(model, d_y)?))
    });

    Ok((Data::List(y), backprop))
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{MlErr, ops::NdOps};

    fn seqs() -> Vec<Array2<f32>> {
        vec![array![[1., 2.], [3., 4.]], array![[5., 6.]]]
    }

    #[test]
    fn list2array_flattens_and_backward_splits() {
        let ops = NdOps::shared(Some(0));
        let mut model = list2array(&ops);

        let (y, backprop) = model.begin_update(Data::List(seqs())).unwrap();
        assert_eq!(y, Data::Array(array![[1., 2.], [3., 4.], [5., 6.]]));

        let d_x = backprop.call(&mut model, y).unwrap();
        assert_eq!(d_x, Data::List(seqs()));
    }

    #[test]
    fn ragged_and_list_convert_both_ways() {
        let ops = NdOps::shared(Some(0));
        let to_ragged = list2ragged(&ops);
        let to_list = ragged2list(&ops);

        let ragged = to_ragged.predict(Data::List(seqs())).unwrap();
        let Data::Ragged(r) = &ragged else {
            panic!("expected ragged output");
        };
        assert_eq!(r.lengths(), &[2, 1]);

        assert_eq!(to_list.predict(ragged).unwrap(), Data::List(seqs()));
    }

    #[test]
    fn rejects_sequences_of_another_width() {
        let ops = NdOps::shared(Some(0));
        let xs = Data::List(vec![array![[1., 2., 3.]], array![[4., 5., 6.]]]);

        for mut model in [list2array(&ops), list2ragged(&ops)] {
            model.initialize(Some(&Data::List(seqs())), None).unwrap();

            assert!(matches!(
                model.predict(xs.clone()),
                Err(MlErr::ShapeMismatch { got: 3, expected: 2, .. })
            ));
        }

        let mut model = ragged2list(&ops);
        let sample = Ragged::new(array![[1., 2.], [3., 4.]], vec![1, 1]).unwrap();
        model.initialize(Some(&Data::Ragged(sample)), None).unwrap();
        let ragged = Ragged::new(array![[1., 2., 3.]], vec![1]).unwrap();

        assert!(matches!(
            model.predict(Data::Ragged(ragged)),
            Err(MlErr::ShapeMismatch { got: 3, expected: 2, .. })
        ));
    }
}
