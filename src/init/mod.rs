mod constant;
mod initializer;
mod orthonormal;
mod random;

pub use constant::ConstInit;
pub use initializer::Initializer;
pub use orthonormal::Orthonormal;
pub use random::RandInit;
