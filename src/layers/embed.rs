use std::rc::Rc;

use log::warn;
use ndarray::{Array2, Axis};

use crate::{
    MlErr, Result,
    data::Data,
    init::RandInit,
    model::{Attr, Backprop, Model},
    ops::Ops,
};

/// Maps integer ids to learned vectors.
///
/// Ids are read from column `column` of the input. Ids that don't fall within the vocabulary map
/// to the first row of the table.
///
/// # Arguments
/// * `ops` - The numeric backend.
/// * `n_out` - The width of each vector.
/// * `n_vocab` - The amount of rows in the table.
/// * `column` - The input column holding the ids.
pub fn embed(
    ops: &Rc<dyn Ops>,
    n_out: Option<usize>,
    n_vocab: Option<usize>,
    column: usize,
) -> Model {
    Model::new("embed", ops, forward)
        .with_init(init)
        .with_dim("nO", n_out)
        .with_dim("nV", n_vocab)
        .with_attr("column", Attr::Int(column))
        .with_param("E", table_shape, Rc::new(RandInit::uniform(-0.1, 0.1)))
}

fn table_shape(model: &Model) -> Result<Vec<usize>> {
    Ok(vec![model.require_dim("nV")?, model.require_dim("nO")?])
}

fn init(model: &mut Model, _x: Option<&Data>, y: Option<&Data>) -> Result<()> {
    if let Some(width) = y.and_then(Data::sample_width) {
        model.set_dim("nO", width)?;
    }

    Ok(())
}

/// Reads the ids of a batch, mapping the out of vocabulary ones to zero.
fn ids(model: &Model, x: &Array2<f32>, column: usize, n_v: usize) -> Result<Vec<usize>> {
    if column >= x.ncols() {
        return Err(MlErr::shape(model.label(), "id column", column, x.ncols()));
    }

    let ids = x
        .column(column)
        .iter()
        .map(|&id| {
            if id.is_finite() && id >= 0. && (id as usize) < n_v {
                id as usize
            } else {
                warn!(model = model.label().as_str(), id = id; "id out of vocabulary");
                0
            }
        })
        .collect();

    Ok(ids)
}

fn forward(model: &Model, x: Data, is_train: bool) -> Result<(Data, Backprop)> {
    let x = x.into_array(model)?;
    let column = model.int_attr("column")?;
    let n_v = model.require_dim("nV")?;
    let n_o = model.require_dim("nO")?;

    let ids = ids(model, &x, column, n_v)?;
    let table = model.param2("E")?;
    let y = table.select(Axis(0), &ids);

    if !is_train {
        return Ok((Data::Array(y), Backprop::inference(model)));
    }

    let shape = x.dim();
    let backprop = Backprop::new(model, move |model, d_y| {
        let d_y = d_y.into_array(model)?;

        if d_y.dim() != (ids.len(), n_o) {
            return Err(MlErr::shape(model.label(), "output gradient width", d_y.ncols(), n_o));
        }

        let mut grad = model.grad2_mut("E")?;
        for (&id, row) in ids.iter().zip(d_y.rows()) {
            let mut grad_row = grad.row_mut(id);
            grad_row += &row;
        }

        Ok(Data::Array(Array2::zeros(shape)))
    });

    Ok((Data::Array(y), backprop))
}
