pub mod insights;
pub mod live;

pub use insights::*;
pub use live::*;
