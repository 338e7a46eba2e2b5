mod backend;
mod nd_ops;

pub use backend::Ops;
pub use nd_ops::NdOps;
