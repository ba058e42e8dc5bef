use crate::{
    batch::{self, BatchOperation, ConsumedCapacity, TableEntry},
    client::Client,
    common::{
        self,
        attribute_value::{self, Item},
    },
    error::{Error, Result},
    read,
    transport::Transport,
};

use aws_sdk_dynamodb::types;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{collections, mem};

/// Keys to read from one table and how to read them.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    /// Legacy attribute list, superseded by the projection expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_to_get: Option<Vec<String>>,
    /// Whether to use a strongly consistent read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
    /// Placeholders used by the projection expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression_attribute_names: Option<collections::HashMap<String, String>>,
    /// Primary keys of the items to read.
    #[serde(default, with = "attribute_value::items")]
    pub keys: Vec<Item>,
    /// Attributes to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
}

impl TableEntry for KeysAndAttributes {
    type Item = Item;

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn take_items(&mut self) -> Vec<Item> {
        mem::take(&mut self.keys)
    }

    fn with_items(&self, keys: Vec<Item>) -> Self {
        Self {
            attributes_to_get: self.attributes_to_get.clone(),
            consistent_read: self.consistent_read,
            expression_attribute_names: self.expression_attribute_names.clone(),
            keys,
            projection_expression: self.projection_expression.clone(),
        }
    }
}

/// `BatchGetItem` request body.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemInput {
    /// Keys to read, per table.
    pub request_items: collections::HashMap<String, KeysAndAttributes>,
    /// `INDEXES`, `TOTAL` or `NONE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_consumed_capacity: Option<String>,
}

/// `BatchGetItem` response body.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemOutput {
    /// Capacity consumed, one entry per table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
    /// Items read, per table.
    #[serde(default, with = "attribute_value::table_items")]
    pub responses: collections::HashMap<String, Vec<Item>>,
    /// Keys the service did not get to.
    #[serde(default)]
    pub unprocessed_keys: collections::HashMap<String, KeysAndAttributes>,
}

impl BatchOperation for BatchGetItemInput {
    const OPERATION: &'static str = "BatchGetItem";
    const PER_CALL_LIMIT: usize = 100;
    type Output = BatchGetItemOutput;

    fn item_count(&self) -> usize {
        batch::count_items(&self.request_items)
    }

    fn split(self, limit: usize) -> Vec<Self> {
        let Self {
            request_items,
            return_consumed_capacity,
        } = self;
        batch::split_tables(request_items, limit)
            .into_iter()
            .map(|request_items| Self {
                request_items,
                return_consumed_capacity: return_consumed_capacity.clone(),
            })
            .collect()
    }

    fn take_unprocessed(&self, output: &mut BatchGetItemOutput) -> Option<Self> {
        let mut request_items = mem::take(&mut output.unprocessed_keys);
        request_items.retain(|_, keys| !keys.is_empty());
        if request_items.is_empty() {
            return None;
        }
        Some(Self {
            request_items,
            return_consumed_capacity: self.return_consumed_capacity.clone(),
        })
    }

    fn merge(into: &mut BatchGetItemOutput, other: BatchGetItemOutput) {
        ConsumedCapacity::merge(&mut into.consumed_capacity, other.consumed_capacity);
        batch::concat_tables(&mut into.responses, other.responses);
        for (table, keys) in other.unprocessed_keys {
            match into.unprocessed_keys.entry(table) {
                collections::hash_map::Entry::Occupied(mut entry) => {
                    entry.get_mut().keys.extend(keys.keys)
                }
                collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(keys);
                }
            }
        }
    }
}

/// Typed batch get: keys grouped by per-table read settings.
///
/// ```rust,no_run
/// use dynamodb_direct::{client::Client, common, read};
/// use indexmap::IndexMap;
///
/// # async fn example(client: &Client) -> dynamodb_direct::error::Result<()> {
/// let batch_get = read::batch_get_item::BatchGetItem {
///     items: IndexMap::from([(
///         read::common::SingleReadArgs {
///             table_name: "users".to_string(),
///             ..Default::default()
///         },
///         (0..250)
///             .map(|id| common::key::Keys::<i32>::partition("id", id))
///             .collect(),
///     )]),
///     ..Default::default()
/// };
/// let output = batch_get.send(client).await?;
/// assert!(output.unprocessed_keys.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default, PartialEq)]
pub struct BatchGetItem<T> {
    /// Keys to read, grouped by table and read settings.
    pub items: IndexMap<read::common::SingleReadArgs, Vec<common::key::Keys<T>>>,
    /// Whether to return the consumed capacity information.
    pub return_consumed_capacity: Option<types::ReturnConsumedCapacity>,
}

/// Join `entry` into the read of `table_name`. The keys of two reads of one
/// table are joined when their settings match; otherwise it is an error.
fn add_table_read(
    request_items: &mut collections::HashMap<String, KeysAndAttributes>,
    table_name: String,
    mut entry: KeysAndAttributes,
) -> Result<()> {
    match request_items.entry(table_name) {
        collections::hash_map::Entry::Occupied(mut existing) => {
            let keys = entry.take_items();
            if existing.get().with_items(Vec::new()) != entry {
                return Err(Error::ConflictingReads {
                    table: existing.key().clone(),
                });
            }
            existing.get_mut().keys.extend(keys);
        }
        collections::hash_map::Entry::Vacant(vacant) => {
            vacant.insert(entry);
        }
    }
    Ok(())
}

impl<T: Serialize> TryFrom<BatchGetItem<T>> for BatchGetItemInput {
    type Error = Error;

    fn try_from(batch_get_item: BatchGetItem<T>) -> Result<Self> {
        let mut request_items: collections::HashMap<String, KeysAndAttributes> =
            collections::HashMap::with_capacity(batch_get_item.items.len());
        for (args, keys) in batch_get_item.items {
            let single_read: read::common::SingleReadInput = args.into();
            let keys = keys
                .into_iter()
                .map(Item::try_from)
                .collect::<serde_dynamo::Result<Vec<_>>>()?;
            let entry = KeysAndAttributes {
                consistent_read: single_read.consistent_read,
                expression_attribute_names: single_read.expression_attribute_names,
                keys,
                projection_expression: single_read.projection_expression,
                ..Default::default()
            };
            add_table_read(&mut request_items, single_read.table_name, entry)?;
        }
        Ok(Self {
            request_items,
            return_consumed_capacity: batch_get_item
                .return_consumed_capacity
                .map(|value| value.as_str().to_string()),
        })
    }
}

impl<T: Serialize> BatchGetItem<T> {
    /// Convert and run the batch get, however many keys it holds.
    pub async fn send<Tr: Transport>(self, client: &Client<Tr>) -> Result<BatchGetItemOutput> {
        let input: BatchGetItemInput = self.try_into()?;
        client.batch_get_item(input).await
    }
}
