use ndarray::ArrayD;

use super::{Initializer, initializer::fans};
use crate::{Result, ops::Ops};

/// An initializer that samples from a probabilistic distribution.
///
/// The scaled variants compute their range or standard deviation from the fans of the parameter
/// they initialize, so they can be declared before its shape is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandInit {
    Uniform { low: f32, high: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform,
    Xavier,
    Kaiming,
    Lecun,
    LecunUniform,
}

impl RandInit {
    /// Samples from `U(low, high)`.
    ///
    /// # Arguments
    /// * `low` - The inclusive lower limit.
    /// * `high` - The exclusive upper limit.
    pub fn uniform(low: f32, high: f32) -> Self {
        Self::Uniform { low, high }
    }

    /// Samples from `N(mean, std_dev)`.
    pub fn normal(mean: f32, std_dev: f32) -> Self {
        Self::Normal { mean, std_dev }
    }

    /// Samples from `U(-r, r)` with `r = sqrt(6 / (fan_in + fan_out))`.
    pub fn xavier_uniform() -> Self {
        Self::XavierUniform
    }

    /// Samples from `N(0, sqrt(2 / (fan_in + fan_out)))`.
    pub fn xavier() -> Self {
        Self::Xavier
    }

    /// Samples from `N(0, sqrt(2 / fan_in))`.
    pub fn kaiming() -> Self {
        Self::Kaiming
    }

    /// Samples from `N(0, sqrt(1 / fan_in))`.
    pub fn lecun() -> Self {
        Self::Lecun
    }

    /// Samples from `U(-r, r)` with `r = sqrt(3 / fan_in)`.
    pub fn lecun_uniform() -> Self {
        Self::LecunUniform
    }
}

impl Initializer for RandInit {
    fn init(&self, ops: &dyn Ops, shape: &[usize]) -> Result<ArrayD<f32>> {
        let (fan_in, fan_out) = fans(shape);

        match *self {
            RandInit::Uniform { low, high } => ops.random_uniform(shape, low, high),
            RandInit::Normal { mean, std_dev } => ops.random_normal(shape, mean, std_dev),
            RandInit::XavierUniform => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                ops.random_uniform(shape, -range, range)
            }
            RandInit::Xavier => {
                let std_dev = (2. / (fan_in + fan_out) as f32).sqrt();
                ops.random_normal(shape, 0., std_dev)
            }
            RandInit::Kaiming => {
                let std_dev = (2. / fan_in as f32).sqrt();
                ops.random_normal(shape, 0., std_dev)
            }
            RandInit::Lecun => {
                let std_dev = (1. / fan_in as f32).sqrt();
                ops.random_normal(shape, 0., std_dev)
            }
            RandInit::LecunUniform => {
                let range = (3. / fan_in as f32).sqrt();
                ops.random_uniform(shape, -range, range)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MlErr, ops::NdOps};

    #[test]
    fn xavier_uniform_stays_in_range() {
        let ops = NdOps::new(Some(42));
        let value = RandInit::xavier_uniform().init(&ops, &[10, 20]).unwrap();
        let range = (6f32 / 30.).sqrt();

        assert_eq!(value.shape(), &[10, 20]);
        assert!(value.iter().all(|&v| v.abs() <= range));
    }

    #[test]
    fn seeded_samples_repeat() {
        let init = RandInit::kaiming();
        let a = init.init(&NdOps::new(Some(7)), &[4, 4]).unwrap();
        let b = init.init(&NdOps::new(Some(7)), &[4, 4]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn normal_moments() {
        let ops = NdOps::new(Some(42));
        let value = RandInit::normal(1., 2.).init(&ops, &[100, 100]).unwrap();

        let n = value.len() as f32;
        let mean = value.sum() / n;
        let var = value.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;

        assert!((mean - 1.).abs() < 0.1, "mean {mean}");
        assert!((var.sqrt() - 2.).abs() < 0.1, "std dev {}", var.sqrt());
    }

    #[test]
    fn invalid_range() {
        let ops = NdOps::new(Some(0));

        assert!(matches!(
            RandInit::uniform(1., -1.).init(&ops, &[3]),
            Err(MlErr::Initializer(_))
        ));
        assert!(matches!(
            RandInit::normal(0., f32::INFINITY).init(&ops, &[3]),
            Err(MlErr::Initializer(_))
        ));
    }
}
