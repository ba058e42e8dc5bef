#![deny(warnings)]
#![deny(missing_docs)]

//! # DynamoDB Direct
//!
//! A DynamoDB client that speaks the HTTP+JSON API itself: it signs every
//! request with Signature Version 4, retries transient failures with
//! exponential jitter, and runs batch operations of any size.
//!
//! ## Overview
//!
//! - [`mod@signer`] turns a payload, a target and a credential snapshot into
//!   the `Authorization` header
//! - [`mod@dispatch`] sends one envelope, classifies each attempt and retries
//!   throttling, throughput and server errors up to seven attempts
//! - [`mod@batch`] splits oversized batches at the service limits (100 keys
//!   per get, 25 writes per write), runs the partitions concurrently,
//!   resubmits unprocessed items and merges everything into one output
//! - [`mod@config`] provides immutable credential snapshots, including role
//!   credentials read from files and rotated at runtime
//!
//! ## Quick Example
//!
//! ```no_run
//! use dynamodb_direct::{
//!     client::Client,
//!     config::{
//!         settings::HttpSettings,
//!         snapshot::{Credentials, Endpoint, Snapshot, StaticConfig},
//!     },
//!     write::batch_write_item::{BatchWriteItem, BatchWriteItemRequest, BatchWriteItemRequestPutItem},
//! };
//! use std::{collections::HashMap, sync::Arc};
//!
//! # async fn example() -> dynamodb_direct::error::Result<()> {
//! let provider = Arc::new(StaticConfig::new(Snapshot {
//!     credentials: Credentials::new("AKID", "secret"),
//!     endpoint: Endpoint::for_region("eu-west-1"),
//! }));
//! let client = Client::new(provider, &HttpSettings::default())?;
//!
//! // 1000 puts become 40 concurrent calls; unprocessed writes are resubmitted
//! let puts = (0..1000)
//!     .map(|id| {
//!         BatchWriteItemRequest::PutItem(BatchWriteItemRequestPutItem {
//!             item: serde_json::json!({"id": id}),
//!         })
//!     })
//!     .collect();
//! let output = BatchWriteItem {
//!     request_items: HashMap::from([("events".to_string(), puts)]),
//!     ..Default::default()
//! }
//! .send(&client)
//! .await?;
//! assert!(output.unprocessed_items.is_empty());
//! # Ok(())
//! # }
//! ```

/// Splitting, fan-out and unprocessed-item resolution for batch operations.
pub mod batch;

/// External cancellation of in-flight requests.
pub mod cancel;

/// Client façade over the dispatcher and the batch engine.
pub mod client;

/// Typed helpers for keys, projections and attribute values.
pub mod common;

/// Credentials, endpoints and settings.
pub mod config;

/// Signed, retrying dispatch of one request.
pub mod dispatch;

/// Error types.
pub mod error;

/// Batch read schema.
pub mod read;

/// Signature Version 4 request signing.
pub mod signer;

/// The HTTP transport seam.
pub mod transport;

/// Batch write schema.
pub mod write;

#[cfg(test)]
mod testing;
