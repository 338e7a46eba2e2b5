use crate::{
    MlErr, Result,
    data::Data,
    layers::check_input_width,
    model::{Backprop, Model},
};

/// Runs every layer on the same input and sums their outputs.
///
/// # Errors
/// `InvalidInput` if `layers` is empty.
pub fn add(layers: Vec<Model>) -> Result<Model> {
    let Some(first) = layers.first() else {
        return Err(MlErr::invalid("add", "needs at least one layer"));
    };

    let ops = first.ops().clone();

    Ok(Model::new("add", &ops, forward)
        .with_init(init)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(layers))
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    let n_i = x
        .and_then(Data::sample_width)
        .or_else(|| model.get_dim("nI"));

    let n_o = y
        .and_then(Data::sample_width)
        .or_else(|| model.get_dim("nO"))
        .or_else(|| model.layers().iter().find_map(|layer| layer.get_dim("nO")));

    for layer in model.layers_mut() {
        if let Some(n_i) = n_i {
            layer.hint_dim("nI", n_i)?;
        }

        if let Some(n_o) = n_o {
            layer.hint_dim("nO", n_o)?;
        }

        layer.initialize(x, None)?;
    }

    if let Some(n_i) = n_i {
        model.set_dim("nI", n_i)?;
    }

    if let Some(n_o) = n_o {
        model.set_dim("nO", n_o)?;
    }

    Ok(())
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    check_input_width(model, &x)?;

    let mut y: Option<Data> = None;
    let mut backprops = Vec::with_capacity(model.layers().len());

    for layer in model.layers() {
        let (out, backprop) = layer.forward(x.clone(), is_train)?;
        backprops.push(backprop);

        y = Some(match y {
            Some(acc) => acc.add(&out, model)?,
            None => out,
        });
    }

    let y = y.ok_or_else(|| MlErr::invalid(model.label(), "no layers to run"))?;

    if !is_train {
        return Ok((y, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let mut d_x: Option<Data> = None;

        for (layer, backprop) in model.layers_mut().iter_mut().zip(backprops) {
            let d = backprop.call(layer, d_y.clone())?;

            d_x = Some(match d_x {
                Some(acc) => acc.add(&d, layer)?,
                None => d,
            });
        }

        d_x.ok_or_else(|| MlErr::invalid(model.label(), "no layers to backpropagate through"))
    });

    Ok((y, backprop))
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;
    use crate::{
        layers::{affine, relu},
        ops::NdOps,
    };

    #[test]
    fn shares_the_output_width() {
        let ops = NdOps::shared(Some(0));
        let mut model = add(vec![affine(&ops, Some(6), None), affine(&ops, None, None)]).unwrap();

        model
            .initialize(Some(&Data::Array(Array2::zeros((2, 3)))), None)
            .unwrap();
        assert_eq!(model.get_layer(1).unwrap().get_dim("nO"), Some(6));
        assert_eq!(model.get_dim("nO"), Some(6));
    }

    #[test]
    fn sums_outputs_and_input_gradients() {
        let ops = NdOps::shared(Some(0));
        let mut model = add(vec![relu(&ops), relu(&ops)]).unwrap();

        let (y, backprop) = model
            .begin_update(Data::Array(array![[1., -1.]]))
            .unwrap();
        assert_eq!(y, Data::Array(array![[2., 0.]]));

        let d_x = backprop
            .call(&mut model, Data::Array(array![[1., 1.]]))
            .unwrap();
        assert_eq!(d_x, Data::Array(array![[2., 0.]]));
    }

    #[test]
    fn rejects_inputs_of_another_width() {
        let ops = NdOps::shared(Some(0));
        let mut model = add(vec![relu(&ops), relu(&ops)]).unwrap();
        model
            .initialize(Some(&Data::Array(Array2::zeros((2, 4)))), None)
            .unwrap();

        assert!(matches!(
            model.predict(Data::Array(Array2::zeros((2, 7)))),
            Err(MlErr::ShapeMismatch { got: 7, expected: 4, .. })
        ));
    }
}
