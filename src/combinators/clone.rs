use super::{chain, noop};
use crate::{Result, data::Data, model::Model};

/// Chains `n` copies of `layer`, each one with its own parameters.
///
/// The last copy's `nO` comes from the clone's own `nO` or the sample output. Any copy whose `nO`
/// is still unresolved, the last one included, takes the width of the first resolved copy before
/// the last, falling back to the last copy's. With `n == 0` this is a `noop`.
pub fn clone(layer: Model, n: usize) -> Model {
    if n == 0 {
        let ops = layer.ops().clone();
        return noop(&ops, vec![]);
    }

    let mut layers = Vec::with_capacity(n);
    for _ in 1..n {
        layers.push(layer.copy());
    }
    layers.insert(0, layer);

    let ops = layers[0].ops().clone();

    Model::new("clone", &ops, chain::forward)
        .with_init(init)
        .with_dim("nO", None)
        .with_dim("nI", None)
        .with_layers(layers)
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    let n = model.layers().len();

    if let Some(n_o) = model.get_dim("nO") {
        model.get_layer_mut(n - 1)?.hint_dim("nO", n_o)?;
    }

    if let Some(width) = y.and_then(Data::sample_width) {
        model.get_layer_mut(n - 1)?.hint_dim("nO", width)?;
    }

    let (hidden, last) = model.layers().split_at(n - 1);
    let width = hidden
        .iter()
        .find_map(|layer| layer.get_dim("nO"))
        .or_else(|| last[0].get_dim("nO"));

    if let Some(width) = width {
        for layer in model.layers_mut() {
            if layer.has_dim("nO") && layer.get_dim("nO").is_none() {
                layer.set_dim("nO", width)?;
            }
        }
    }

    chain::init(model, x, y)
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;
    use crate::{MlErr, layers::affine, ops::NdOps};

    #[test]
    fn zero_copies_is_a_noop() {
        let ops = NdOps::shared(Some(0));
        let model = clone(affine(&ops, None, None), 0);
        let x = Data::Array(Array2::ones((2, 3)));

        assert_eq!(model.name(), "noop");
        assert_eq!(model.predict(x.clone()).unwrap(), x);
    }

    #[test]
    fn intermediate_copies_follow_the_first_output_width() {
        let ops = NdOps::shared(Some(0));
        let mut model = clone(affine(&ops, None, None), 5);
        model.get_layer_mut(0).unwrap().set_dim("nO", 128).unwrap();

        let x = Data::Array(Array2::zeros((4, 16)));
        model.initialize(Some(&x), None).unwrap();

        for layer in model.layers() {
            assert_eq!(layer.get_dim("nO"), Some(128));
        }
        assert_eq!(model.get_layer(0).unwrap().get_dim("nI"), Some(16));
        assert_eq!(model.get_layer(4).unwrap().get_dim("nI"), Some(128));
    }

    #[test]
    fn sample_output_sizes_the_last_copy() {
        let ops = NdOps::shared(Some(0));
        let mut model = clone(affine(&ops, None, None), 3);
        model.get_layer_mut(0).unwrap().set_dim("nO", 32).unwrap();

        let x = Data::Array(Array2::zeros((4, 16)));
        let y = Data::Array(Array2::zeros((4, 10)));
        model.initialize(Some(&x), Some(&y)).unwrap();

        let widths: Vec<_> = model.layers().iter().map(|l| l.get_dim("nO")).collect();
        assert_eq!(widths, vec![Some(32), Some(32), Some(10)]);
        assert_eq!(model.get_dim("nO"), Some(10));
    }

    #[test]
    fn copies_are_independent() {
        let ops = NdOps::shared(Some(0));
        let model = clone(affine(&ops, Some(3), Some(3)), 3);

        let ids: Vec<_> = model.layers().iter().map(Model::id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids[0] != ids[1] && ids[1] != ids[2] && ids[0] != ids[2]);
    }

    #[test]
    fn unresolved_width_fails() {
        let ops = NdOps::shared(Some(0));
        let mut model = clone(affine(&ops, None, None), 3);
        let x = Data::Array(Array2::zeros((4, 16)));

        assert!(matches!(
            model.initialize(Some(&x), None),
            Err(MlErr::UnresolvedDimension { ref dim, .. }) if dim == "nO"
        ));
    }
}
