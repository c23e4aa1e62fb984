pub mod engine;
pub mod regression;
pub mod smoothing;

pub use engine::*;
pub use regression::*;
pub use smoothing::*;
