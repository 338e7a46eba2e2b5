use ndarray::{Array2, array};

use neural_combinators::{
    MlErr,
    combinators::{bilstm, chain, clone, concatenate, residual},
    data::{Data, Ragged},
    layers::{affine, embed, layer_norm, list2ragged, max_pool, relu, softmax},
    ops::NdOps,
};

fn seq(len: usize, width: usize, offset: usize) -> Array2<f32> {
    Array2::from_shape_fn((len, width), |(i, j)| ((i * width + j + offset) as f32 * 0.37).sin())
}

#[test]
fn affine_infers_both_widths_from_samples() {
    let ops = NdOps::shared(Some(0));
    let mut model = affine(&ops, None, None);

    let x = Data::Array(Array2::zeros((128, 16)));
    let y = Data::Array(Array2::zeros((128, 10)));
    model.initialize(Some(&x), Some(&y)).unwrap();

    assert_eq!(model.get_dim("nI"), Some(16));
    assert_eq!(model.get_dim("nO"), Some(10));
    assert_eq!(model.get_param("W").unwrap().shape(), &[10, 16]);

    // A second call changes nothing.
    let w = model.get_param("W").unwrap().clone();
    model.initialize(Some(&x), Some(&y)).unwrap();
    assert_eq!(model.get_param("W").unwrap(), &w);
}

#[test]
fn cloned_stack_resolves_every_hidden_width() {
    let ops = NdOps::shared(Some(0));
    let mut model = clone(affine(&ops, None, None), 5);
    model.get_layer_mut(0).unwrap().set_dim("nO", 128).unwrap();

    model
        .initialize(Some(&Data::Array(Array2::zeros((2, 16)))), None)
        .unwrap();

    let dims: Vec<_> = model
        .layers()
        .iter()
        .map(|l| (l.get_dim("nI").unwrap(), l.get_dim("nO").unwrap()))
        .collect();
    assert_eq!(dims, vec![(16, 128), (128, 128), (128, 128), (128, 128), (128, 128)]);

    let mut unresolved = clone(affine(&ops, None, None), 5);
    assert!(matches!(
        unresolved.initialize(Some(&Data::Array(Array2::zeros((2, 16)))), None),
        Err(MlErr::UnresolvedDimension { .. })
    ));
}

#[test]
fn concatenated_heads_split_the_gradient() {
    let ops = NdOps::shared(Some(1));
    let mut model = concatenate(vec![
        affine(&ops, Some(2), None),
        chain(vec![affine(&ops, Some(3), None), relu(&ops)]).unwrap(),
    ])
    .unwrap();

    let x = array![[0.5, -1., 2.], [1., 0., -0.5]];
    model.initialize(Some(&Data::Array(x.clone())), None).unwrap();
    assert_eq!(model.get_dim("nO"), Some(5));

    let (y, backprop) = model.begin_update(Data::Array(x)).unwrap();
    assert_eq!(y.width(), 5);

    // Only the first head receives a gradient.
    let mut d_y = Array2::zeros((2, 5));
    d_y.column_mut(0).fill(1.);
    backprop.call(&mut model, Data::Array(d_y)).unwrap();

    let first = model.get_layer(0).unwrap();
    assert!(first.get_grad("b").unwrap().iter().any(|&g| g != 0.));

    let second = model.get_layer(1).unwrap().get_layer(0).unwrap();
    assert!(second.get_grad("W").unwrap().iter().all(|&g| g == 0.));
}

#[test]
fn residual_block_over_embeddings() {
    let ops = NdOps::shared(Some(2));
    let mut model = chain(vec![
        embed(&ops, Some(8), Some(10), 0),
        residual(
            chain(vec![
                layer_norm(&ops, None),
                affine(&ops, None, None),
                relu(&ops),
            ])
            .unwrap(),
        ),
        affine(&ops, Some(2), None),
    ])
    .unwrap();

    let ids = Data::Array(array![[1.], [4.], [9.], [4.]]);
    model.initialize(Some(&ids), None).unwrap();

    let block = model.get_layer(1).unwrap().get_layer(0).unwrap();
    assert_eq!(block.get_layer(1).unwrap().get_dim("nI"), Some(8));
    assert_eq!(block.get_layer(1).unwrap().get_dim("nO"), Some(8));

    let y = model.predict(ids).unwrap().into_array(&model).unwrap();
    assert_eq!(y.dim(), (4, 2));
    for (a, b) in y.row(1).iter().zip(y.row(3)) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn sequence_classifier_end_to_end() {
    let ops = NdOps::shared(Some(3));
    let mut model = chain(vec![
        bilstm(&ops, Some(8), None, 0.),
        list2ragged(&ops),
        max_pool(&ops),
        affine(&ops, None, None),
        softmax(&ops),
    ])
    .unwrap();

    let lengths = [4, 2, 5];
    let xs: Vec<_> = lengths
        .iter()
        .enumerate()
        .map(|(i, &len)| seq(len, 4, 10 * i))
        .collect();
    let x = Data::List(xs);
    let y = Data::Array(Array2::zeros((3, 3)));

    model.initialize(Some(&x), Some(&y)).unwrap();
    assert_eq!(model.get_dim("nI"), Some(4));
    assert_eq!(model.get_dim("nO"), Some(3));

    let (probs, backprop) = model.begin_update(x).unwrap();
    let probs = probs.into_array(&model).unwrap();
    assert_eq!(probs.dim(), (3, 3));
    for row in probs.rows() {
        assert!((row.sum() - 1.).abs() < 1e-5);
    }

    let d_x = backprop
        .call(&mut model, Data::Array(probs - 1. / 3.))
        .unwrap()
        .into_list(&model)
        .unwrap();
    let dims: Vec<_> = d_x.iter().map(Array2::dim).collect();
    assert_eq!(dims, vec![(4, 4), (2, 4), (5, 4)]);
}

#[test]
fn max_pool_routes_to_the_argmax() {
    let ops = NdOps::shared(Some(0));
    let model = max_pool(&ops);

    let data = Array2::from_shape_fn((11, 2), |(i, j)| if j == 0 { i as f32 } else { -(i as f32) });
    let x = Ragged::new(data, vec![4, 2, 5]).unwrap();

    let (y, backprop) = model.forward(Data::Ragged(x), true).unwrap();
    assert_eq!(y, Data::Array(array![[3., 0.], [5., -4.], [10., -6.]]));

    let mut model = model;
    let d_x = backprop
        .call(&mut model, Data::Array(Array2::ones((3, 2))))
        .unwrap()
        .into_ragged(&model)
        .unwrap();

    let column_sums = d_x.data().sum_axis(ndarray::Axis(0));
    assert_eq!(column_sums, array![3., 3.]);
    assert_eq!(d_x.data()[[3, 0]], 1.);
    assert_eq!(d_x.data()[[0, 1]], 1.);
    assert_eq!(d_x.data()[[10, 0]], 1.);
    assert_eq!(d_x.data()[[6, 1]], 1.);
}
