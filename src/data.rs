use ndarray::{Axis, concatenate, prelude::*};

use crate::{MlErr, Result, model::Model};

/// A batch of variable length sequences stored contiguously.
///
/// The rows of `data` hold every sequence one after the other, `lengths` tells where each one
/// ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Ragged {
    data: Array2<f32>,
    lengths: Vec<usize>,
}

impl Ragged {
    /// Creates a new `Ragged` array.
    ///
    /// # Errors
    /// `ShapeMismatch` if the lengths don't add up to the amount of rows in `data`.
    pub fn new(data: Array2<f32>, lengths: Vec<usize>) -> Result<Self> {
        let total: usize = lengths.iter().sum();

        if total != data.nrows() {
            return Err(MlErr::shape("ragged", "sum of lengths", total, data.nrows()));
        }

        Ok(Self { data, lengths })
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn into_parts(self) -> (Array2<f32>, Vec<usize>) {
        (self.data, self.lengths)
    }
}

/// The working state of a recurrent layer at a given timestep.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub cells: Array2<f32>,
    pub hiddens: Array2<f32>,
}

/// The values flowing between models.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// A dense batch, one row per item.
    Array(Array2<f32>),
    /// A batch of sequences stored contiguously.
    Ragged(Ragged),
    /// A batch of sequences, one matrix each.
    List(Vec<Array2<f32>>),
    /// One timestep of a recurrent computation.
    Step { state: State, x: Array2<f32> },
}

impl From<Array2<f32>> for Data {
    fn from(value: Array2<f32>) -> Self {
        Self::Array(value)
    }
}

impl From<Ragged> for Data {
    fn from(value: Ragged) -> Self {
        Self::Ragged(value)
    }
}

impl From<Vec<Array2<f32>>> for Data {
    fn from(value: Vec<Array2<f32>>) -> Self {
        Self::List(value)
    }
}

impl Data {
    /// The size of the feature axis.
    ///
    /// An empty list has width zero.
    pub fn width(&self) -> usize {
        match self {
            Data::Array(x) => x.ncols(),
            Data::Ragged(r) => r.data.ncols(),
            Data::List(xs) => xs.first().map(|x| x.ncols()).unwrap_or(0),
            Data::Step { x, .. } => x.ncols(),
        }
    }

    /// The width of a sample used to infer dimensions, `None` if there's nothing to look at.
    pub(crate) fn sample_width(&self) -> Option<usize> {
        match self {
            Data::List(xs) if xs.is_empty() => None,
            other => Some(other.width()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Data::Array(_) => "array",
            Data::Ragged(_) => "ragged",
            Data::List(_) => "list",
            Data::Step { .. } => "step",
        }
    }

    fn unexpected(&self, model: &Model, expected: &str) -> MlErr {
        MlErr::invalid(
            model.label(),
            format!("expected {expected} data, got {}", self.kind()),
        )
    }

    pub fn into_array(self, model: &Model) -> Result<Array2<f32>> {
        match self {
            Data::Array(x) => Ok(x),
            other => Err(other.unexpected(model, "array")),
        }
    }

    pub fn as_array(&self, model: &Model) -> Result<&Array2<f32>> {
        match self {
            Data::Array(x) => Ok(x),
            other => Err(other.unexpected(model, "array")),
        }
    }

    pub fn into_ragged(self, model: &Model) -> Result<Ragged> {
        match self {
            Data::Ragged(r) => Ok(r),
            other => Err(other.unexpected(model, "ragged")),
        }
    }

    pub fn into_list(self, model: &Model) -> Result<Vec<Array2<f32>>> {
        match self {
            Data::List(xs) => Ok(xs),
            other => Err(other.unexpected(model, "list")),
        }
    }

    pub fn into_step(self, model: &Model) -> Result<(State, Array2<f32>)> {
        match self {
            Data::Step { state, x } => Ok((state, x)),
            other => Err(other.unexpected(model, "step")),
        }
    }

    /// Applies `f` to every matrix this data holds, keeping its structure.
    ///
    /// Ragged arrays must keep their amount of rows. Recurrent steps are rejected.
    pub fn map_arrays<F>(self, model: &Model, mut f: F) -> Result<Data>
    where
        F: FnMut(Array2<f32>) -> Result<Array2<f32>>,
    {
        match self {
            Data::Array(x) => Ok(Data::Array(f(x)?)),
            Data::Ragged(r) => {
                let (data, lengths) = r.into_parts();
                Ok(Data::Ragged(Ragged::new(f(data)?, lengths)?))
            }
            Data::List(xs) => Ok(Data::List(xs.into_iter().map(f).collect::<Result<_>>()?)),
            step @ Data::Step { .. } => Err(step.unexpected(model, "array, ragged or list")),
        }
    }

    /// Like `map_arrays`, pairing every matrix with its counterpart in `other`.
    ///
    /// # Errors
    /// `InvalidInput` if the variants differ, `ShapeMismatch` if any pair of matrices differs in
    /// shape.
    pub fn zip_map<F>(self, other: &Data, model: &Model, mut f: F) -> Result<Data>
    where
        F: FnMut(Array2<f32>, &Array2<f32>) -> Result<Array2<f32>>,
    {
        let check = |a: &Array2<f32>, b: &Array2<f32>| {
            if a.nrows() != b.nrows() {
                return Err(MlErr::shape(model.label(), "rows", b.nrows(), a.nrows()));
            }

            if a.ncols() != b.ncols() {
                return Err(MlErr::shape(model.label(), "columns", b.ncols(), a.ncols()));
            }

            Ok(())
        };

        match (self, other) {
            (Data::Array(a), Data::Array(b)) => {
                check(&a, b)?;
                Ok(Data::Array(f(a, b)?))
            }
            (Data::Ragged(a), Data::Ragged(b)) => {
                let (data, lengths) = a.into_parts();
                check(&data, &b.data)?;
                Ok(Data::Ragged(Ragged::new(f(data, &b.data)?, lengths)?))
            }
            (Data::List(a), Data::List(b)) => {
                if a.len() != b.len() {
                    return Err(MlErr::shape(model.label(), "sequences", b.len(), a.len()));
                }

                let zipped = a
                    .into_iter()
                    .zip(b)
                    .map(|(a, b)| {
                        check(&a, b)?;
                        f(a, b)
                    })
                    .collect::<Result<_>>()?;

                Ok(Data::List(zipped))
            }
            (a, b) => Err(b.unexpected(model, a.kind())),
        }
    }

    /// Elementwise sum of two values of the same structure.
    pub fn add(self, other: &Data, model: &Model) -> Result<Data> {
        self.zip_map(other, model, |a, b| Ok(a + b))
    }

    /// Stacks values of the same structure along the feature axis.
    pub fn hstack(parts: Vec<Data>, model: &Model) -> Result<Data> {
        let Some(first) = parts.first() else {
            return Err(MlErr::invalid(model.label(), "nothing to stack"));
        };

        match first {
            Data::Array(_) => {
                let arrays = parts
                    .into_iter()
                    .map(|p| p.into_array(model))
                    .collect::<Result<Vec<_>>>()?;

                Ok(Data::Array(hstack_arrays(&arrays, model)?))
            }
            Data::Ragged(r) => {
                let lengths = r.lengths.clone();
                let mut arrays = Vec::with_capacity(parts.len());

                for part in parts {
                    let r = part.into_ragged(model)?;
                    if r.lengths != lengths {
                        return Err(MlErr::invalid(model.label(), "ragged lengths differ"));
                    }

                    arrays.push(r.data);
                }

                Ok(Data::Ragged(Ragged::new(
                    hstack_arrays(&arrays, model)?,
                    lengths,
                )?))
            }
            Data::List(xs) => {
                let n = xs.len();
                let lists = parts
                    .into_iter()
                    .map(|p| p.into_list(model))
                    .collect::<Result<Vec<_>>>()?;

                if let Some(list) = lists.iter().find(|list| list.len() != n) {
                    return Err(MlErr::shape(model.label(), "sequences", list.len(), n));
                }

                let stacked = (0..n)
                    .map(|i| {
                        let arrays: Vec<_> = lists.iter().map(|list| list[i].clone()).collect();
                        hstack_arrays(&arrays, model)
                    })
                    .collect::<Result<_>>()?;

                Ok(Data::List(stacked))
            }
            step @ Data::Step { .. } => Err(step.unexpected(model, "array, ragged or list")),
        }
    }

    /// Splits the feature axis into consecutive blocks of the given widths.
    ///
    /// # Errors
    /// `ShapeMismatch` if the widths don't add up to this data's width.
    pub fn split_cols(self, widths: &[usize], model: &Model) -> Result<Vec<Data>> {
        let total: usize = widths.iter().sum();
        if total != self.width() {
            return Err(MlErr::shape(model.label(), "split width", total, self.width()));
        }

        match self {
            Data::Array(x) => Ok(split_array(&x, widths)
                .into_iter()
                .map(Data::Array)
                .collect()),
            Data::Ragged(r) => split_array(&r.data, widths)
                .into_iter()
                .map(|data| Ragged::new(data, r.lengths.clone()).map(Data::Ragged))
                .collect(),
            Data::List(xs) => {
                let mut lists = vec![Vec::with_capacity(xs.len()); widths.len()];

                for x in &xs {
                    for (list, block) in lists.iter_mut().zip(split_array(x, widths)) {
                        list.push(block);
                    }
                }

                Ok(lists.into_iter().map(Data::List).collect())
            }
            step @ Data::Step { .. } => Err(step.unexpected(model, "array, ragged or list")),
        }
    }
}

fn hstack_arrays(arrays: &[Array2<f32>], model: &Model) -> Result<Array2<f32>> {
    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    concatenate(Axis(1), &views).map_err(|e| MlErr::invalid(model.label(), e.to_string()))
}

fn split_array(x: &Array2<f32>, widths: &[usize]) -> Vec<Array2<f32>> {
    let mut start = 0;

    widths
        .iter()
        .map(|&w| {
            let block = x.slice(s![.., start..start + w]).to_owned();
            start += w;
            block
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{layers::relu, ops::NdOps};

    #[test]
    fn ragged_checks_lengths() {
        assert!(Ragged::new(Array2::zeros((5, 2)), vec![2, 3]).is_ok());
        assert!(matches!(
            Ragged::new(Array2::zeros((5, 2)), vec![2, 2]),
            Err(MlErr::ShapeMismatch { got: 4, expected: 5, .. })
        ));
    }

    #[test]
    fn hstack_then_split() {
        let model = relu(&NdOps::shared(Some(0)));
        let a = Data::List(vec![array![[1., 2.]], array![[3., 4.], [5., 6.]]]);
        let b = Data::List(vec![array![[7.]], array![[8.], [9.]]]);

        let stacked = Data::hstack(vec![a.clone(), b.clone()], &model).unwrap();
        assert_eq!(stacked.width(), 3);

        let parts = stacked.split_cols(&[2, 1], &model).unwrap();
        assert_eq!(parts, vec![a, b]);
    }

    #[test]
    fn mismatched_variants_are_rejected() {
        let model = relu(&NdOps::shared(Some(0)));
        let a = Data::Array(array![[1., 2.]]);
        let b = Data::List(vec![array![[1., 2.]]]);

        assert!(matches!(
            a.clone().add(&b, &model),
            Err(MlErr::InvalidInput { .. })
        ));
        assert!(matches!(
            a.add(&Data::Array(array![[1.]]), &model),
            Err(MlErr::ShapeMismatch { .. })
        ));
    }
}
