pub use pool::*;

mod pool;
