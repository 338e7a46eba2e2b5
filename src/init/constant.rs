use ndarray::{ArrayD, IxDyn};

use super::Initializer;
use crate::{Result, ops::Ops};

/// An initializer that fills every entry with the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstInit {
    value: f32,
}

impl ConstInit {
    /// Creates a new `ConstInit` initializer.
    ///
    /// # Arguments
    /// * `value` - The value to fill parameters with.
    pub fn new(value: f32) -> Self {
        Self { value }
    }

    pub fn zeros() -> Self {
        Self::new(0.)
    }
}

impl Initializer for ConstInit {
    fn init(&self, _ops: &dyn Ops, shape: &[usize]) -> Result<ArrayD<f32>> {
        Ok(ArrayD::from_elem(IxDyn(shape), self.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::NdOps;

    #[test]
    fn empty() {
        let ops = NdOps::new(Some(0));
        let value = ConstInit::new(1.).init(&ops, &[0, 3]).unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn exact() {
        let ops = NdOps::new(Some(0));
        let value = ConstInit::new(1.5).init(&ops, &[2, 5]).unwrap();

        assert_eq!(value.shape(), &[2, 5]);
        assert!(value.iter().all(|&v| v == 1.5));
    }
}
