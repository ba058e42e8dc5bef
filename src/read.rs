//! Batch reads.
//!
//! [`batch_get_item`] carries the `BatchGetItem` wire schema and its typed
//! builder; [`common`] holds per-table read settings.

/// Batch get of any number of keys.
pub mod batch_get_item;

/// Per-table read settings.
pub mod common;
