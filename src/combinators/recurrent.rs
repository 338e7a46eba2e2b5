use std::rc::Rc;

use log::trace;
use ndarray::{Array2, Array3, Axis, s};

use super::bidirectional;
use crate::{
    MlErr, Result,
    data::{Data, State},
    init::ConstInit,
    layers::{check_rate, lstm_step},
    model::{Attr, Backprop, Model},
    ops::Ops,
};

/// Pads a batch of sequences into a time-major tensor of shape `(nS, nB, nF)`, where `nS` is the
/// length of the longest sequence.
///
/// # Errors
/// `ShapeMismatch` if the sequences differ in width.
pub fn pad_batch(ops: &dyn Ops, seqs: &[Array2<f32>]) -> Result<Array3<f32>> {
    let n_f = seqs.first().map(|x| x.ncols()).unwrap_or(0);

    if let Some(x) = seqs.iter().find(|x| x.ncols() != n_f) {
        return Err(MlErr::shape("pad_batch", "sequence width", x.ncols(), n_f));
    }

    let n_s = seqs.iter().map(|x| x.nrows()).max().unwrap_or(0);
    let mut padded = ops.allocate3((n_s, seqs.len(), n_f));

    for (b, x) in seqs.iter().enumerate() {
        padded.slice_mut(s![..x.nrows(), b, ..]).assign(x);
    }

    Ok(padded)
}

/// Inverse of `pad_batch`, cuts every sequence back to its length.
///
/// # Errors
/// `ShapeMismatch` if there isn't one length per sequence or a length exceeds the padding.
pub fn unpad_batch(
    ops: &dyn Ops,
    padded: &Array3<f32>,
    lengths: &[usize],
) -> Result<Vec<Array2<f32>>> {
    let (n_s, n_b, n_f) = padded.dim();

    if lengths.len() != n_b {
        return Err(MlErr::shape("unpad_batch", "batch size", lengths.len(), n_b));
    }

    lengths
        .iter()
        .enumerate()
        .map(|(b, &len)| {
            if len > n_s {
                return Err(MlErr::shape("unpad_batch", "sequence length", len, n_s));
            }

            let mut seq = ops.allocate2((len, n_f));
            seq.assign(&padded.slice(s![..len, b, ..]));
            Ok(seq)
        })
        .collect()
}

/// Runs a step model over every timestep of a batch of sequences.
///
/// The state starts from the learned `initial_cells` and `initial_hiddens` parameters. While
/// training with a positive `dropout`, the state entering every step (the initial one included)
/// and the outputs are masked. Cells, hiddens and outputs each get a single mask shared by every
/// timestep of the call.
pub fn recurrent(step: Model, dropout: f32) -> Model {
    let ops = step.ops().clone();
    let (n_o, n_i) = (step.get_dim("nO"), step.get_dim("nI"));

    Model::new("recurrent", &ops, forward)
        .with_init(init)
        .with_dim("nO", n_o)
        .with_dim("nI", n_i)
        .with_attr("dropout", Attr::Float(dropout))
        .with_param("initial_cells", state_shape, Rc::new(ConstInit::zeros()))
        .with_param("initial_hiddens", state_shape, Rc::new(ConstInit::zeros()))
        .with_layers(vec![step])
}

/// An LSTM over a batch of sequences.
pub fn lstm(ops: &Rc<dyn Ops>, n_out: Option<usize>, n_in: Option<usize>, dropout: f32) -> Model {
    recurrent(lstm_step(ops, n_out, n_in), dropout)
}

/// A bidirectional LSTM, each direction gets half of `n_out`.
pub fn bilstm(
    ops: &Rc<dyn Ops>,
    n_out: Option<usize>,
    n_in: Option<usize>,
    dropout: f32,
) -> Model {
    let l2r = n_out.map(|n| n / 2);
    let r2l = n_out.map(|n| n - n / 2);

    bidirectional(lstm(ops, l2r, n_in, dropout), lstm(ops, r2l, n_in, dropout))
}

fn state_shape(model: &Model) -> Result<Vec<usize>> {
    Ok(vec![model.require_dim("nO")?])
}

fn init(model: &mut Model, x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    if let Some(width) = x.and_then(Data::sample_width) {
        model.set_dim("nI", width)?;
    }

    if let Some(width) = y.and_then(Data::sample_width) {
        model.set_dim("nO", width)?;
    }

    let hints = (model.get_dim("nI"), model.get_dim("nO"));
    let step = model.get_layer_mut(0)?;

    if let (Some(n_i), _) = hints {
        step.set_dim("nI", n_i)?;
    }

    if let (_, Some(n_o)) = hints {
        step.set_dim("nO", n_o)?;
    }

    step.initialize(None, None)?;

    let dims = (step.get_dim("nI"), step.get_dim("nO"));
    if let (Some(n_i), _) = dims {
        model.set_dim("nI", n_i)?;
    }

    if let (_, Some(n_o)) = dims {
        model.set_dim("nO", n_o)?;
    }

    Ok(())
}

fn initial_state(model: &Model, n_b: usize, n_o: usize) -> Result<State> {
    let broadcast = |name: &str| -> Result<Array2<f32>> {
        let state = model.param1(name)?;

        state
            .broadcast((n_b, n_o))
            .map(|state| state.to_owned())
            .ok_or_else(|| MlErr::shape(model.label(), "initial state", state.len(), n_o))
    };

    Ok(State {
        cells: broadcast("initial_cells")?,
        hiddens: broadcast("initial_hiddens")?,
    })
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let xs = x.into_list(model)?;
    let n_i = model.require_dim("nI")?;
    let n_o = model.require_dim("nO")?;

    if let Some(x) = xs.iter().find(|x| x.ncols() != n_i) {
        return Err(MlErr::shape(model.label(), "input width", x.ncols(), n_i));
    }

    let ops = model.ops();
    let lengths: Vec<_> = xs.iter().map(|x| x.nrows()).collect();
    let n_b = xs.len();
    let padded = pad_batch(&**ops, &xs)?;
    let n_s = padded.len_of(Axis(0));

    let rate = model.float_attr("dropout")?;
    check_rate(model, rate)?;

    let [cell_mask, hidden_mask, out_mask]: [Option<Array2<f32>>; 3] = if is_train {
        std::array::from_fn(|_| ops.get_dropout_mask((n_b, n_o), rate))
    } else {
        [None, None, None]
    };

    let step = model.get_layer(0)?;
    let mut state = initial_state(model, n_b, n_o)?;
    let mut outputs = ops.allocate3((n_s, n_b, n_o));
    let mut backprops = Vec::with_capacity(n_s);

    for t in 0..n_s {
        if let Some(mask) = &cell_mask {
            state.cells *= mask;
        }

        if let Some(mask) = &hidden_mask {
            state.hiddens *= mask;
        }

        let x = padded.index_axis(Axis(0), t).to_owned();
        let (out, backprop) = step.forward(Data::Step { state, x }, is_train)?;
        let (next, mut h) = out.into_step(step)?;

        if let Some(mask) = &out_mask {
            h *= mask;
        }

        outputs.index_axis_mut(Axis(0), t).assign(&h);
        state = next;
        backprops.push(backprop);
    }

    let ys = Data::List(unpad_batch(&**ops, &outputs, &lengths)?);

    if !is_train {
        return Ok((ys, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        trace!(model = model.label().as_str(), steps = n_s; "recurrent backward");

        let d_ys = d_y.into_list(model)?;
        if d_ys.len() != n_b {
            return Err(MlErr::shape(model.label(), "batch size", d_ys.len(), n_b));
        }

        for (d_y, &len) in d_ys.iter().zip(&lengths) {
            if d_y.nrows() != len {
                return Err(MlErr::shape(model.label(), "sequence length", d_y.nrows(), len));
            }

            if d_y.ncols() != n_o {
                return Err(MlErr::shape(model.label(), "output width", d_y.ncols(), n_o));
            }
        }

        let ops = Rc::clone(model.ops());
        let d_padded = pad_batch(&*ops, &d_ys)?;
        let mut d_x = ops.allocate3((n_s, n_b, n_i));
        let mut d_state = State {
            cells: ops.allocate2((n_b, n_o)),
            hiddens: ops.allocate2((n_b, n_o)),
        };

        let step = model.get_layer_mut(0)?;
        for (t, backprop) in backprops.into_iter().enumerate().rev() {
            let mut d_h = d_padded.index_axis(Axis(0), t).to_owned();

            if let Some(mask) = &out_mask {
                d_h *= mask;
            }

            let d = backprop.call(step, Data::Step { state: d_state, x: d_h })?;
            let (mut d_prev, d_x_t) = d.into_step(step)?;

            if let Some(mask) = &cell_mask {
                d_prev.cells *= mask;
            }

            if let Some(mask) = &hidden_mask {
                d_prev.hiddens *= mask;
            }

            d_x.index_axis_mut(Axis(0), t).assign(&d_x_t);
            d_state = d_prev;
        }

        let mut grad_cells = model.grad1_mut("initial_cells")?;
        grad_cells += &d_state.cells.sum_axis(Axis(0));

        let mut grad_hiddens = model.grad1_mut("initial_hiddens")?;
        grad_hiddens += &d_state.hiddens.sum_axis(Axis(0));

        Ok(Data::List(unpad_batch(&*ops, &d_x, &lengths)?))
    });

    Ok((ys, backprop))
}
