//! Schema catalog and the definitions it owns.
//!
//! Each node type has an ordered chain of [`SchemaVersion`]s and, between
//! consecutive versions, an [`UpgradeStrategy`] describing the field-level
//! migration. Strategies are addressed by the version they upgrade *from*.
//!
//! Catalogs are explicit values passed to whatever needs them; there is no
//! process-wide registry.

mod catalog;
mod document;
mod field;
mod strategy;
mod validation;
mod version;

pub use catalog::*;
pub use document::*;
pub use field::*;
pub use strategy::*;
pub use validation::*;
pub use version::*;
