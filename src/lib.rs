pub mod error;
pub mod math;
pub mod ml;

pub use error::{DegenerateState, Error, Pass, Result, StateComponent};
pub use ml::hmm;
