mod add;
mod bidirectional;
mod chain;
mod clone;
mod concatenate;
mod noop;
mod recurrent;
mod residual;
mod with_flatten;

pub use add::add;
pub use bidirectional::bidirectional;
pub use chain::chain;
pub use clone::clone;
pub use concatenate::concatenate;
pub use noop::noop;
pub use recurrent::{bilstm, lstm, pad_batch, recurrent, unpad_batch};
pub use residual::residual;
pub use with_flatten::with_flatten;
