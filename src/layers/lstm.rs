use std::rc::Rc;

use ndarray::{Axis, concatenate, s};

use crate::{
    MlErr, Result,
    data::{Data, State},
    init::{ConstInit, Orthonormal},
    model::{Backprop, Model},
    ops::Ops,
};

/// A single timestep of an LSTM.
///
/// Takes a `Data::Step` holding the previous state and the current input, returns the new state
/// along with the new hiddens as output. Meant to be wrapped by `recurrent`.
///
/// # Arguments
/// * `ops` - The numeric backend.
/// * `n_out` - The width of the cells and hiddens.
/// * `n_in` - The width of the input.
pub fn lstm_step(ops: &Rc<dyn Ops>, n_out: Option<usize>, n_in: Option<usize>) -> Model {
    Model::new("lstm_step", ops, forward)
        .with_init(init)
        .with_dim("nO", n_out)
        .with_dim("nI", n_in)
        .with_param("W", w_shape, Rc::new(Orthonormal))
        .with_param("b", b_shape, Rc::new(ConstInit::zeros()))
        .with_param("forget_bias", forget_bias_shape, Rc::new(ConstInit::zeros()))
}

fn w_shape(model: &Model) -> Result<Vec<usize>> {
    let n_o = model.require_dim("nO")?;
    Ok(vec![4 * n_o, model.require_dim("nI")? + n_o])
}

fn b_shape(model: &Model) -> Result<Vec<usize>> {
    Ok(vec![4 * model.require_dim("nO")?])
}

fn forget_bias_shape(model: &Model) -> Result<Vec<usize>> {
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
    let (prev, x) = x.into_step(model)?;
    let n_i = model.require_dim("nI")?;
    let n_o = model.require_dim("nO")?;
    let n_b = x.nrows();

    if x.ncols() != n_i {
        return Err(MlErr::shape(model.label(), "input width", x.ncols(), n_i));
    }

    for state in [&prev.cells, &prev.hiddens] {
        if state.dim() != (n_b, n_o) {
            return Err(MlErr::shape(model.label(), "state width", state.ncols(), n_o));
        }
    }

    let ops = model.ops();
    let inputs = concatenate(Axis(1), &[x.view(), prev.hiddens.view()])
        .map_err(|e| MlErr::invalid(model.label(), e.to_string()))?;
    let mut acts = ops.gemm(inputs.view(), model.param2("W")?, false, true)? + &model.param1("b")?;

    // The forget gate takes the first nO columns.
    let mut forget = acts.slice_mut(s![.., ..n_o]);
    forget -= &model.param1("forget_bias")?;

    let (cells, hiddens, gates) = ops.lstm(acts.view(), prev.cells.view())?;

    let output = Data::Step {
        state: State {
            cells: cells.clone(),
            hiddens: hiddens.clone(),
        },
        x: hiddens,
    };

    if !is_train {
        return Ok((output, Backprop::inference(model)));
    }

    let backprop = Backprop::new(model, move |model, d_y| {
        let (d_state, d_out) = d_y.into_step(model)?;

        for grad in [&d_state.cells, &d_state.hiddens, &d_out] {
            if grad.dim() != (n_b, n_o) {
                return Err(MlErr::shape(model.label(), "output gradient width", grad.ncols(), n_o));
            }
        }

        let ops = model.ops();
        let d_hiddens = d_state.hiddens + &d_out;
        let (d_acts, d_prev_cells) = ops.backprop_lstm(
            d_state.cells.view(),
            d_hiddens.view(),
            gates.view(),
            cells.view(),
            prev.cells.view(),
        )?;

        let d_inputs = ops.gemm(d_acts.view(), model.param2("W")?, false, false)?;
        let d_w = ops.gemm(d_acts.view(), inputs.view(), true, false)?;

        let mut grad_w = model.grad2_mut("W")?;
        grad_w += &d_w;

        let mut grad_b = model.grad1_mut("b")?;
        grad_b += &d_acts.sum_axis(Axis(0));

        let mut grad_forget = model.grad1_mut("forget_bias")?;
        grad_forget -= &d_acts.slice(s![.., ..n_o]).sum_axis(Axis(0));

        Ok(Data::Step {
            state: State {
                cells: d_prev_cells,
                hiddens: d_inputs.slice(s![.., n_i..]).to_owned(),
            },
            x: d_inputs.slice(s![.., ..n_i]).to_owned(),
        })
    });

    Ok((output, backprop))
}
