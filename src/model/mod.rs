mod backprop;
mod model;
mod param;

pub use backprop::Backprop;
pub use model::{ForwardFn, InitFn, Model};
pub use param::{Attr, ParamKey, ShapeFn};
