use super::LossFn;
use crate::{Result, data::Data, model::Model};

/// Mean squared error, averaged over every entry of every matrix in the batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl LossFn for Mse {
    fn score(&self, model: &Model, y_pred: Data, y: &Data) -> Result<(f32, Data)> {
        let mut total = 0.;
        let mut count = 0;

        let diff = y_pred.zip_map(y, model, |pred, target| {
            let diff = pred - target;
            total += diff.iter().map(|d| d * d).sum::<f32>();
            count += diff.len();
            Ok(diff)
        })?;

        if count == 0 {
            return Ok((0., diff));
        }

        let scale = 2. / count as f32;
        let d_y = diff.map_arrays(model, |diff| Ok(diff * scale))?;

        Ok((total / count as f32, d_y))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;
    use crate::{MlErr, layers::relu, ops::NdOps};

    #[test]
    fn scores_arrays() {
        let ops = NdOps::shared(Some(0));
        let model = relu(&ops);
        let y_pred = Data::Array(array![[1., 2.], [3., 4.]]);
        let y = Data::Array(array![[1., 0.], [3., 6.]]);

        let (loss, d_y) = Mse.score(&model, y_pred, &y).unwrap();
        assert_eq!(loss, 2.);
        assert_eq!(d_y, Data::Array(array![[0., 1.], [0., -1.]]));
    }

    #[test]
    fn averages_over_every_sequence() {
        let ops = NdOps::shared(Some(0));
        let model = relu(&ops);
        let y_pred = Data::List(vec![array![[1.], [2.], [3.]], array![[4.]]]);
        let y = Data::List(vec![array![[1.], [0.], [3.]], array![[6.]]]);

        let (loss, d_y) = Mse.score(&model, y_pred, &y).unwrap();
        assert_eq!(loss, 2.);
        assert_eq!(
            d_y,
            Data::List(vec![array![[0.], [1.], [0.]], array![[-1.]]])
        );
    }

    #[test]
    fn rejects_mismatched_targets() {
        let ops = NdOps::shared(Some(0));
        let model = relu(&ops);
        let y_pred = Data::Array(Array2::zeros((2, 3)));

        assert!(matches!(
            Mse.score(&model, y_pred.clone(), &Data::Array(Array2::zeros((2, 4)))),
            Err(MlErr::ShapeMismatch { .. })
        ));
        assert!(matches!(
            Mse.score(&model, y_pred, &Data::List(vec![])),
            Err(MlErr::InvalidInput { .. })
        ));
    }
}
