//! Published-version cursor boundary.
//!
//! For each `(processor, aggregate root)` pair the store records the highest
//! aggregate version the processor has applied. Writes follow a strict protocol:
//!
//! - version 1 is an **insert**; a duplicate insert is absorbed as success
//! - version `v >= 2` is an **update** conditioned on the stored version being `v - 1`
//!
//! Every backend funnels its raw outcome through [`classify`], so callers only
//! ever see a [`PublishedVersionError`].

pub mod classify;
pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use classify::PersistenceFailure;
pub use in_memory::InMemoryPublishedVersionStore;
pub use postgres::PostgresPublishedVersionStore;
pub use r#trait::{
    PublishedVersionError, PublishedVersionErrorKind, PublishedVersionStore, diagnose_conflict,
};
