//! Storage backends for snapshot logs and id counters.
//!
//! [`RecordBackend`] is the seam: the versioned store above it only ever
//! reads whole logs and writes single snapshots into numbered slots.

pub mod backend;
pub mod file_store;

#[cfg(feature = "sled")]
pub mod sled_store;

pub use backend::{RecordBackend, SlotWrite};
pub use file_store::FileStore;

#[cfg(feature = "sled")]
pub use sled_store::SledStore;
