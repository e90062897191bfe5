//! Tiered key/value persistence
//!
//! The store writes serialized entries to one of two retention mediums
//! (durable or session-scoped) behind the [`StorageMedium`] seam, with
//! per-entry TTL, schema-version tagging and optional compression.

pub mod compression;
pub mod medium;
pub mod tiered;

pub use medium::{FileMedium, MemoryMedium, StorageMedium};
pub use tiered::{ClassStats, StoreCounters, StoreStats, TieredStore};
