//! Batch writes.

/// Batch write of any number of puts and deletes.
pub mod batch_write_item;
