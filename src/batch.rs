//! Splitting, fan-out and unprocessed-item resolution for batch operations.
//!
//! A logical batch request of any size is split into service-sized
//! partitions. Each partition runs on its own task and is resubmitted with
//! whatever the service reports as unprocessed until nothing is left, or the
//! depth limit is hit. Every partition's responses are merged into one output.
//!
//! Partitions are carved out in table iteration order, which follows the
//! request's hash map and is not deterministic.

use crate::{
    cancel::Cancellation,
    common::attribute_value::{self, Item},
    dispatch::{self, Dispatcher, RequestEnvelope},
    error::{Error, Result},
    transport::Transport,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{collections, mem};
use tokio::sync::mpsc;

/// A batch request the engine can split, resubmit and merge.
pub trait BatchOperation: Serialize + Send + Sized + 'static {
    /// Operation name, e.g. `BatchGetItem`.
    const OPERATION: &'static str;

    /// Most items the service accepts in one call.
    const PER_CALL_LIMIT: usize;

    /// The response body.
    type Output: DeserializeOwned + Default + Send + 'static;

    /// Number of work items across every table.
    fn item_count(&self) -> usize;

    /// Split into requests of at most `limit` items each, keeping every
    /// request-level and table-level setting.
    fn split(self, limit: usize) -> Vec<Self>;

    /// Move the unprocessed work out of `output` into a follow-up request.
    ///
    /// Returns `None` when nothing is left to do.
    fn take_unprocessed(&self, output: &mut Self::Output) -> Option<Self>;

    /// Fold `other` into `into`.
    fn merge(into: &mut Self::Output, other: Self::Output);
}

/// Per-table request entry whose work items can be split across partitions.
pub trait TableEntry: Sized {
    /// One unit of work: a key to read or a request to write.
    type Item;

    /// Number of work items.
    fn len(&self) -> usize;

    /// Whether there is no work.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Move the work items out, leaving the rest of the entry in place.
    fn take_items(&mut self) -> Vec<Self::Item>;

    /// A copy of this entry's settings carrying `items` as its work.
    fn with_items(&self, items: Vec<Self::Item>) -> Self;
}

/// Split a table map into maps of at most `limit` items each.
///
/// Items keep their relative order within a table; a table may straddle two
/// consecutive partitions. Tables without items are dropped. A `limit` of zero
/// is treated as one.
pub fn split_tables<E: TableEntry>(
    tables: collections::HashMap<String, E>,
    limit: usize,
) -> Vec<collections::HashMap<String, E>> {
    let limit = limit.max(1);
    let mut partitions = Vec::new();
    let mut current = collections::HashMap::new();
    let mut current_len = 0;
    for (table, mut entry) in tables {
        let mut items = entry.take_items();
        while !items.is_empty() {
            let room = (limit - current_len).min(items.len());
            let rest = items.split_off(room);
            let chunk = mem::replace(&mut items, rest);
            current_len += chunk.len();
            current.insert(table.clone(), entry.with_items(chunk));
            if current_len == limit {
                partitions.push(mem::take(&mut current));
                current_len = 0;
            }
        }
    }
    if current_len > 0 {
        partitions.push(current);
    }
    partitions
}

/// Total items across every table.
pub fn count_items<E: TableEntry>(tables: &collections::HashMap<String, E>) -> usize {
    tables.values().map(TableEntry::len).sum()
}

impl<T> TableEntry for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn take_items(&mut self) -> Vec<T> {
        mem::take(self)
    }

    fn with_items(&self, items: Vec<T>) -> Self {
        items
    }
}

/// Append per-table lists of `other` to those of `into`.
pub fn concat_tables<V>(
    into: &mut collections::HashMap<String, Vec<V>>,
    other: collections::HashMap<String, Vec<V>>,
) {
    for (table, values) in other {
        into.entry(table).or_default().extend(values);
    }
}

/// Capacity consumed by one table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumedCapacity {
    /// The table the capacity was spent on.
    #[serde(default)]
    pub table_name: String,
    /// Total capacity units.
    #[serde(default)]
    pub capacity_units: f64,
    /// Read capacity units, when reported separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_capacity_units: Option<f64>,
    /// Write capacity units, when reported separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_capacity_units: Option<f64>,
}

fn add_units(left: Option<f64>, right: Option<f64>) -> Option<f64> {
    match (left, right) {
        (Some(left), Some(right)) => Some(left + right),
        (left, right) => left.or(right),
    }
}

impl ConsumedCapacity {
    /// Sum `other` into `into` table by table, keeping first-seen table order.
    pub fn merge(into: &mut Vec<Self>, other: Vec<Self>) {
        for capacity in other {
            match into
                .iter_mut()
                .find(|existing| existing.table_name == capacity.table_name)
            {
                Some(existing) => {
                    existing.capacity_units += capacity.capacity_units;
                    existing.read_capacity_units =
                        add_units(existing.read_capacity_units, capacity.read_capacity_units);
                    existing.write_capacity_units =
                        add_units(existing.write_capacity_units, capacity.write_capacity_units);
                }
                None => into.push(capacity),
            }
        }
    }
}

/// Size estimate of an item collection touched by a write.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemCollectionMetrics {
    /// Partition key of the item collection.
    #[serde(default, with = "attribute_value::item")]
    pub item_collection_key: Item,
    /// Lower and upper bound of the collection size, in gigabytes.
    #[serde(default, rename = "SizeEstimateRangeGB")]
    pub size_estimate_range_gb: Vec<f64>,
}

/// Bounds of unprocessed-item resubmission.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BatchPolicy {
    /// Deepest resubmission allowed; the first call is depth zero.
    pub recursion_limit: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            recursion_limit: 50,
        }
    }
}

/// Runs batch operations over a [`Dispatcher`].
pub struct BatchEngine<T> {
    dispatcher: Dispatcher<T>,
    policy: BatchPolicy,
}

impl<T> Clone for BatchEngine<T> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            policy: self.policy,
        }
    }
}

impl<T> std::fmt::Debug for BatchEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("dispatcher", &self.dispatcher)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T: Transport> BatchEngine<T> {
    /// Run batches over `dispatcher`.
    pub fn new(dispatcher: Dispatcher<T>, policy: BatchPolicy) -> Self {
        Self { dispatcher, policy }
    }

    /// The dispatcher every partition is sent through.
    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    /// The resubmission bounds.
    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }

    /// Send one partition, then keep resubmitting its unprocessed items until
    /// none are left.
    ///
    /// A non-2xx response or a dispatch error stops the loop immediately.
    /// Exceeding the depth limit is an error, never a partial result.
    pub async fn resolve<O: BatchOperation>(
        &self,
        partition: O,
        cancellation: &Cancellation,
    ) -> Result<O::Output> {
        let target = dispatch::target(O::OPERATION);
        let mut merged = O::Output::default();
        let mut pending = Some(partition);
        let mut depth = 0;
        while let Some(request) = pending.take() {
            if depth > self.policy.recursion_limit {
                tracing::error!(
                    target = %target,
                    depth,
                    remaining = request.item_count(),
                    "unprocessed items past the resubmission limit"
                );
                return Err(Error::RecursionLimitExceeded {
                    target,
                    limit: self.policy.recursion_limit,
                });
            }
            let payload = serde_json::to_vec(&request)
                .map_err(|error| Error::serialization(&target, error))?;
            let envelope = RequestEnvelope::new(target.clone(), payload);
            let response = self
                .dispatcher
                .send(&envelope, cancellation)
                .await?
                .error_for_status(&target)?;
            let mut output: O::Output = serde_json::from_slice(&response.body)
                .map_err(|error| Error::merge(&target, error))?;
            pending = request.take_unprocessed(&mut output);
            if let Some(next) = &pending {
                tracing::debug!(
                    target = %target,
                    depth,
                    unprocessed = next.item_count(),
                    "resubmitting unprocessed items"
                );
            }
            O::merge(&mut merged, output);
            depth += 1;
        }
        Ok(merged)
    }

    /// Split `request` at `per_call_limit`, resolve every partition on its own
    /// task and merge all outputs.
    ///
    /// Every partition is awaited even after a failure; the first failure to
    /// arrive is returned. An empty request returns an empty output without
    /// calling the service.
    pub async fn run<O: BatchOperation>(
        &self,
        request: O,
        per_call_limit: usize,
        cancellation: &Cancellation,
    ) -> Result<O::Output> {
        let target = dispatch::target(O::OPERATION);
        let partitions = request.split(per_call_limit);
        if partitions.is_empty() {
            return Ok(O::Output::default());
        }
        let expected = partitions.len();
        tracing::debug!(target = %target, partitions = expected, "dispatching batch");

        let (sender, mut receiver) = mpsc::channel(expected);
        for partition in partitions {
            let engine = self.clone();
            let sender = sender.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                let result = engine.resolve(partition, &cancellation).await;
                // the receiver is drained until every sender is gone
                let _ = sender.send(result).await;
            });
        }
        drop(sender);

        let mut merged = O::Output::default();
        let mut failure = None;
        let mut received = 0;
        while let Some(result) = receiver.recv().await {
            received += 1;
            match result {
                Ok(output) => O::merge(&mut merged, output),
                Err(error) if failure.is_none() => failure = Some(error),
                Err(error) => tracing::warn!(target = %target, %error, "further partition failed"),
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }
        if received < expected {
            return Err(Error::merge(
                &target,
                format!("{} of {expected} partitions never reported", expected - received),
            ));
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Entry {
        setting: &'static str,
        items: Vec<u32>,
    }

    impl TableEntry for Entry {
        type Item = u32;

        fn len(&self) -> usize {
            self.items.len()
        }

        fn take_items(&mut self) -> Vec<u32> {
            mem::take(&mut self.items)
        }

        fn with_items(&self, items: Vec<u32>) -> Self {
            Self {
                setting: self.setting,
                items,
            }
        }
    }

    fn tables(sizes: &[(&str, u32)]) -> collections::HashMap<String, Entry> {
        let mut next = 0;
        sizes
            .iter()
            .map(|(table, size)| {
                let items = (next..next + size).collect();
                next += size;
                (
                    table.to_string(),
                    Entry {
                        setting: "consistent",
                        items,
                    },
                )
            })
            .collect()
    }

    #[rstest]
    #[case::four_full_partitions(&[("a", 400)], 100, 4)]
    #[case::single_partial_partition(&[("a", 23)], 25, 1)]
    #[case::exact_fit(&[("a", 25)], 25, 1)]
    #[case::one_over(&[("a", 26)], 25, 2)]
    #[case::tables_share_partitions(&[("a", 30), ("b", 30), ("c", 30)], 25, 4)]
    #[case::empty_tables_dropped(&[("a", 0), ("b", 3)], 25, 1)]
    #[case::nothing(&[], 25, 0)]
    #[case::zero_limit_is_one(&[("a", 3)], 0, 3)]
    fn test_split_tables(
        #[case] sizes: &[(&str, u32)],
        #[case] limit: usize,
        #[case] expected_partitions: usize,
    ) {
        let original = tables(sizes);
        let partitions = split_tables(original.clone(), limit);
        assert_eq!(partitions.len(), expected_partitions);

        let mut union: collections::HashMap<String, Vec<u32>> = collections::HashMap::new();
        for partition in &partitions {
            assert!(count_items(partition) <= limit.max(1));
            for (table, entry) in partition {
                assert_eq!(entry.setting, "consistent");
                assert!(!entry.is_empty());
                union
                    .entry(table.clone())
                    .or_default()
                    .extend(&entry.items);
            }
        }
        let expected: collections::HashMap<String, Vec<u32>> = original
            .into_iter()
            .filter(|(_, entry)| !entry.is_empty())
            .map(|(table, entry)| (table, entry.items))
            .collect();
        assert_eq!(union, expected);
    }

    #[test]
    fn test_split_fills_partitions_before_closing() {
        let partitions = split_tables(tables(&[("a", 400)]), 100);
        for partition in partitions {
            assert_eq!(count_items(&partition), 100);
        }
    }

    #[test]
    fn test_consumed_capacity_sums_per_table() {
        let mut merged = vec![ConsumedCapacity {
            table_name: "a".to_string(),
            capacity_units: 1.0,
            read_capacity_units: Some(1.0),
            ..Default::default()
        }];
        ConsumedCapacity::merge(
            &mut merged,
            vec![
                ConsumedCapacity {
                    table_name: "b".to_string(),
                    capacity_units: 2.0,
                    ..Default::default()
                },
                ConsumedCapacity {
                    table_name: "a".to_string(),
                    capacity_units: 3.0,
                    read_capacity_units: Some(0.5),
                    write_capacity_units: Some(2.0),
                },
            ],
        );
        assert_eq!(
            merged,
            vec![
                ConsumedCapacity {
                    table_name: "a".to_string(),
                    capacity_units: 4.0,
                    read_capacity_units: Some(1.5),
                    write_capacity_units: Some(2.0),
                },
                ConsumedCapacity {
                    table_name: "b".to_string(),
                    capacity_units: 2.0,
                    ..Default::default()
                },
            ]
        );
    }

    #[test]
    fn test_concat_tables() {
        let mut into = collections::HashMap::from([("a".to_string(), vec![1, 2])]);
        concat_tables(
            &mut into,
            collections::HashMap::from([
                ("a".to_string(), vec![3]),
                ("b".to_string(), vec![4]),
            ]),
        );
        assert_eq!(into["a"], vec![1, 2, 3]);
        assert_eq!(into["b"], vec![4]);
    }

    #[test]
    fn test_item_collection_metrics_wire_names() {
        let metrics: ItemCollectionMetrics = serde_json::from_value(serde_json::json!({
            "ItemCollectionKey": {"id": {"S": "1"}},
            "SizeEstimateRangeGB": [0.5, 1.0]
        }))
        .unwrap();
        assert_eq!(metrics.item_collection_key.len(), 1);
        assert_eq!(metrics.size_estimate_range_gb, vec![0.5, 1.0]);
    }
}
