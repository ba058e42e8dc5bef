use crate::{
    batch::{self, BatchOperation, ConsumedCapacity, ItemCollectionMetrics},
    client::Client,
    common::{
        self,
        attribute_value::{self, Item},
    },
    error::Result,
    transport::Transport,
};

use aws_sdk_dynamodb::types;
use serde::{Deserialize, Serialize};
use serde_dynamo::to_item;
use std::{collections, mem};

/// One put or delete inside a batch write.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum WriteRequest {
    /// Create or replace an item.
    PutRequest {
        /// The full item.
        #[serde(rename = "Item", with = "attribute_value::item")]
        item: Item,
    },
    /// Remove an item.
    DeleteRequest {
        /// Primary key of the item.
        #[serde(rename = "Key", with = "attribute_value::item")]
        key: Item,
    },
}

/// `BatchWriteItem` request body.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemInput {
    /// Writes to perform, per table.
    pub request_items: collections::HashMap<String, Vec<WriteRequest>>,
    /// `INDEXES`, `TOTAL` or `NONE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_consumed_capacity: Option<String>,
    /// `SIZE` or `NONE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_item_collection_metrics: Option<String>,
}

/// `BatchWriteItem` response body.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemOutput {
    /// Capacity consumed, one entry per table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
    /// Item collections touched, per table.
    #[serde(default, skip_serializing_if = "collections::HashMap::is_empty")]
    pub item_collection_metrics: collections::HashMap<String, Vec<ItemCollectionMetrics>>,
    /// Writes the service did not get to.
    #[serde(default)]
    pub unprocessed_items: collections::HashMap<String, Vec<WriteRequest>>,
}

impl BatchOperation for BatchWriteItemInput {
    const OPERATION: &'static str = "BatchWriteItem";
    const PER_CALL_LIMIT: usize = 25;
    type Output = BatchWriteItemOutput;

    fn item_count(&self) -> usize {
        batch::count_items(&self.request_items)
    }

    fn split(self, limit: usize) -> Vec<Self> {
        let Self {
            request_items,
            return_consumed_capacity,
            return_item_collection_metrics,
        } = self;
        batch::split_tables(request_items, limit)
            .into_iter()
            .map(|request_items| Self {
                request_items,
                return_consumed_capacity: return_consumed_capacity.clone(),
                return_item_collection_metrics: return_item_collection_metrics.clone(),
            })
            .collect()
    }

    fn take_unprocessed(&self, output: &mut BatchWriteItemOutput) -> Option<Self> {
        let mut request_items = mem::take(&mut output.unprocessed_items);
        request_items.retain(|_, requests| !requests.is_empty());
        if request_items.is_empty() {
            return None;
        }
        Some(Self {
            request_items,
            return_consumed_capacity: self.return_consumed_capacity.clone(),
            return_item_collection_metrics: self.return_item_collection_metrics.clone(),
        })
    }

    fn merge(into: &mut BatchWriteItemOutput, other: BatchWriteItemOutput) {
        ConsumedCapacity::merge(&mut into.consumed_capacity, other.consumed_capacity);
        batch::concat_tables(&mut into.item_collection_metrics, other.item_collection_metrics);
        batch::concat_tables(&mut into.unprocessed_items, other.unprocessed_items);
    }
}

/// A put item request within a batch write operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchWriteItemRequestPutItem<T> {
    /// The item to put into the table.
    pub item: T,
}

/// A delete item request within a batch write operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchWriteItemRequestDeleteItem<T> {
    /// The primary key of the item to delete.
    pub keys: common::key::Keys<T>,
}

/// A typed put or delete.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchWriteItemRequest<T> {
    /// Creates or replaces an item.
    PutItem(BatchWriteItemRequestPutItem<T>),
    /// Removes an item by its primary key.
    DeleteItem(BatchWriteItemRequestDeleteItem<T>),
}

impl<T: Serialize> TryFrom<BatchWriteItemRequest<T>> for WriteRequest {
    type Error = serde_dynamo::Error;

    fn try_from(write_request: BatchWriteItemRequest<T>) -> serde_dynamo::Result<Self> {
        let request = match write_request {
            BatchWriteItemRequest::PutItem(put_item) => Self::PutRequest {
                item: to_item(put_item.item)?,
            },
            BatchWriteItemRequest::DeleteItem(delete_item) => Self::DeleteRequest {
                key: delete_item.keys.try_into()?,
            },
        };
        Ok(request)
    }
}

/// Typed batch write of any size.
///
/// ```rust,no_run
/// use dynamodb_direct::{client::Client, write};
/// use std::collections::HashMap;
///
/// # async fn example(client: &Client) -> dynamodb_direct::error::Result<()> {
/// let puts: Vec<_> = (0..60)
///     .map(|id| {
///         write::batch_write_item::BatchWriteItemRequest::PutItem(
///             write::batch_write_item::BatchWriteItemRequestPutItem {
///                 item: serde_json::json!({"id": id, "name": "John"}),
///             },
///         )
///     })
///     .collect();
/// let batch_write = write::batch_write_item::BatchWriteItem {
///     request_items: HashMap::from([("users".to_string(), puts)]),
///     ..Default::default()
/// };
/// let output = batch_write.send(client).await?;
/// assert!(output.unprocessed_items.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchWriteItem<T> {
    /// Writes to perform, per table.
    pub request_items: collections::HashMap<String, Vec<BatchWriteItemRequest<T>>>,
    /// Whether to return the consumed capacity information.
    pub return_consumed_capacity: Option<types::ReturnConsumedCapacity>,
    /// Whether to return item collection metrics.
    pub return_item_collection_metrics: Option<types::ReturnItemCollectionMetrics>,
}

impl<T: Serialize> TryFrom<BatchWriteItem<T>> for BatchWriteItemInput {
    type Error = serde_dynamo::Error;

    fn try_from(batch_write_item: BatchWriteItem<T>) -> serde_dynamo::Result<Self> {
        let mut request_items =
            collections::HashMap::with_capacity(batch_write_item.request_items.len());
        for (table_name, table_requests) in batch_write_item.request_items {
            let table_requests = table_requests
                .into_iter()
                .map(WriteRequest::try_from)
                .collect::<serde_dynamo::Result<_>>()?;
            request_items.insert(table_name, table_requests);
        }
        Ok(Self {
            request_items,
            return_consumed_capacity: batch_write_item
                .return_consumed_capacity
                .map(|value| value.as_str().to_string()),
            return_item_collection_metrics: batch_write_item
                .return_item_collection_metrics
                .map(|value| value.as_str().to_string()),
        })
    }
}

impl<T: Serialize> BatchWriteItem<T> {
    /// Convert and run the batch write, however many requests it holds.
    pub async fn send<Tr: Transport>(self, client: &Client<Tr>) -> Result<BatchWriteItemOutput> {
        let input: BatchWriteItemInput = self.try_into()?;
        client.batch_write_item(input).await
    }
}
