pub mod executor;
pub mod persistence;
pub mod progress;

pub use executor::*;
pub use persistence::*;
pub use progress::*;
