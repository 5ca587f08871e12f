pub mod analyzer;
pub mod indicators;
pub mod series;
pub mod snapshot;


pub use analyzer::*;
pub use indicators::*;
pub use series::*;
pub use snapshot::*;
