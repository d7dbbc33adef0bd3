//! Moving stored records forward through schema versions.
//!
//! [`UpgradeEngine`] applies the catalog's [`UpgradeStrategy`] chain to a
//! record, one version edge at a time, and appends the result as a single
//! snapshot. Named transforms referenced by strategies are looked up in a
//! [`TransformRegistry`].
//!
//! [`UpgradeStrategy`]: crate::schema::UpgradeStrategy

mod engine;
mod result;
mod transform;

pub use engine::*;
pub use result::*;
pub use transform::*;
