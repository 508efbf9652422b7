pub mod classic;
pub mod hmm;

pub use classic::*;
pub use hmm::*;
