pub mod combinators;
pub mod data;
pub mod error;
pub mod init;
pub mod layers;
pub mod loss;
pub mod model;
pub mod ops;
pub mod optimization;
pub mod spec;

pub use error::{MlErr, Result};
