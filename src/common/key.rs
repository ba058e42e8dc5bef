use crate::common::attribute_value::Item;

use serde::Serialize;
use serde_dynamo::{Error, Result, to_attribute_value};

/// One key attribute.
///
/// ```rust
/// use dynamodb_direct::common::key;
///
/// let key = key::Key {
///     name: "id".to_string(),
///     value: "1".to_string(),
/// };
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Key<T> {
    /// The attribute name of the key.
    pub name: String,
    /// The value of the key.
    pub value: T,
}

/// Primary key: a partition key and an optional sort key.
///
/// ```rust
/// use dynamodb_direct::common::key::Keys;
///
/// let keys = Keys::<String>::partition("id", "1").with_sort("version", "2");
/// assert_eq!(keys.sort_key.unwrap().name, "version");
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Keys<T> {
    /// The partition key.
    pub partition_key: Key<T>,
    /// The sort key of tables with a composite primary key.
    pub sort_key: Option<Key<T>>,
}

impl<T> Keys<T> {
    /// A key made of a partition key only.
    pub fn partition(name: impl Into<String>, value: impl Into<T>) -> Self {
        Self {
            partition_key: Key {
                name: name.into(),
                value: value.into(),
            },
            sort_key: None,
        }
    }

    /// Add a sort key.
    pub fn with_sort(mut self, name: impl Into<String>, value: impl Into<T>) -> Self {
        self.sort_key = Some(Key {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

impl<T: Serialize> TryFrom<Keys<T>> for Item {
    type Error = Error;

    fn try_from(keys: Keys<T>) -> Result<Self> {
        let partition_key_value = to_attribute_value(keys.partition_key.value)?;
        let mut item = Self::from([(keys.partition_key.name, partition_key_value)]);
        if let Some(sort_key) = keys.sort_key {
            let sort_key_value = to_attribute_value(sort_key.value)?;
            item.insert(sort_key.name, sort_key_value);
        }
        Ok(item)
    }
}
