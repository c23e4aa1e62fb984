pub mod load;
pub mod reading;
pub mod snapshot;

pub use load::*;
pub use reading::*;
pub use snapshot::*;
