//! Projection store: entity conventions and the per-block change set.
//!
//! Every projected row implements [`Entity`]: a deterministic id built with
//! [`compose_id`], a [`Provenance`] pair, and a JSON document body. Handlers
//! never write to storage directly; they read and write through the
//! block's [`BlockChangeSet`], which is committed atomically with the block.

mod changeset;
mod entity;
mod memory;

pub use changeset::{BlockChangeSet, DEFAULT_MAX_CHANGES, EntityWrite};
pub use entity::{Entity, Provenance, amount, compose_id};
pub use memory::MemoryEntityStore;
