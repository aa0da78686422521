pub mod baseline;
pub mod defs;

pub use defs::*;
