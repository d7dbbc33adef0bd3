//! Small helpers shared across the crate.

pub mod datetime;
pub mod locks;

pub use datetime::*;
pub use locks::KeyedLocks;
