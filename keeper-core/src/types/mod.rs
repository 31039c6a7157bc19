pub use call::*;
pub use gas::*;

mod call;
mod gas;
