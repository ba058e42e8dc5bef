//! DynamoDB JSON encoding of [`types::AttributeValue`].
//!
//! Every value is a single-entry object keyed by its type descriptor, e.g.
//! `{"S": "a"}`, `{"N": "1"}` or `{"B": "<base64>"}`. The modules below are
//! meant for `#[serde(with = "...")]` on request and response fields.

use aws_sdk_dynamodb::{primitives::Blob, types};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de, ser::SerializeMap};
use std::collections;

/// An item or key: attribute name to value.
pub type Item = collections::HashMap<String, types::AttributeValue>;

struct Encode<'a>(&'a types::AttributeValue);

impl Serialize for Encode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self.0 {
            types::AttributeValue::S(value) => map.serialize_entry("S", value)?,
            types::AttributeValue::N(value) => map.serialize_entry("N", value)?,
            types::AttributeValue::B(value) => map.serialize_entry("B", &STANDARD.encode(value))?,
            types::AttributeValue::Ss(values) => map.serialize_entry("SS", values)?,
            types::AttributeValue::Ns(values) => map.serialize_entry("NS", values)?,
            types::AttributeValue::Bs(values) => {
                let values: Vec<_> = values.iter().map(|value| STANDARD.encode(value)).collect();
                map.serialize_entry("BS", &values)?
            }
            types::AttributeValue::M(value) => map.serialize_entry("M", &EncodeItem(value))?,
            types::AttributeValue::L(values) => {
                let values: Vec<_> = values.iter().map(Encode).collect();
                map.serialize_entry("L", &values)?
            }
            types::AttributeValue::Null(value) => map.serialize_entry("NULL", value)?,
            types::AttributeValue::Bool(value) => map.serialize_entry("BOOL", value)?,
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "unsupported attribute value: {other:?}"
                )));
            }
        }
        map.end()
    }
}

struct EncodeItem<'a>(&'a Item);

impl Serialize for EncodeItem<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, value)| (name, Encode(value))))
    }
}

#[derive(Deserialize)]
enum Decode {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "B")]
    B(String),
    #[serde(rename = "SS")]
    Ss(Vec<String>),
    #[serde(rename = "NS")]
    Ns(Vec<String>),
    #[serde(rename = "BS")]
    Bs(Vec<String>),
    #[serde(rename = "M")]
    M(collections::HashMap<String, Decode>),
    #[serde(rename = "L")]
    L(Vec<Decode>),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "BOOL")]
    Bool(bool),
}

fn blob(encoded: &str) -> Result<Blob, base64::DecodeError> {
    STANDARD.decode(encoded).map(Blob::new)
}

impl TryFrom<Decode> for types::AttributeValue {
    type Error = base64::DecodeError;

    fn try_from(value: Decode) -> Result<Self, Self::Error> {
        let value = match value {
            Decode::S(value) => Self::S(value),
            Decode::N(value) => Self::N(value),
            Decode::B(value) => Self::B(blob(&value)?),
            Decode::Ss(values) => Self::Ss(values),
            Decode::Ns(values) => Self::Ns(values),
            Decode::Bs(values) => Self::Bs(
                values
                    .iter()
                    .map(|value| blob(value))
                    .collect::<Result<_, _>>()?,
            ),
            Decode::M(value) => Self::M(decode_item(value)?),
            Decode::L(values) => Self::L(
                values
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Decode::Null(value) => Self::Null(value),
            Decode::Bool(value) => Self::Bool(value),
        };
        Ok(value)
    }
}

fn decode_item(
    item: collections::HashMap<String, Decode>,
) -> Result<Item, base64::DecodeError> {
    item.into_iter()
        .map(|(name, value)| types::AttributeValue::try_from(value).map(|value| (name, value)))
        .collect()
}

/// `with` module for a single item or key.
pub mod item {
    use super::*;

    /// Encode an item.
    pub fn serialize<S: Serializer>(item: &Item, serializer: S) -> Result<S::Ok, S::Error> {
        EncodeItem(item).serialize(serializer)
    }

    /// Decode an item.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Item, D::Error> {
        let item = collections::HashMap::<String, Decode>::deserialize(deserializer)?;
        decode_item(item).map_err(de::Error::custom)
    }
}

/// `with` module for a list of items or keys.
pub mod items {
    use super::*;

    /// Encode a list of items.
    pub fn serialize<S: Serializer>(items: &[Item], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(EncodeItem))
    }

    /// Decode a list of items.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Item>, D::Error> {
        Vec::<collections::HashMap<String, Decode>>::deserialize(deserializer)?
            .into_iter()
            .map(decode_item)
            .collect::<Result<_, _>>()
            .map_err(de::Error::custom)
    }
}

/// `with` module for item lists keyed by table name.
pub mod table_items {
    use super::*;

    /// Encode item lists per table.
    pub fn serialize<S: Serializer>(
        tables: &collections::HashMap<String, Vec<Item>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(tables.len()))?;
        for (table, items) in tables {
            let items: Vec<_> = items.iter().map(EncodeItem).collect();
            map.serialize_entry(table, &items)?;
        }
        map.end()
    }

    /// Decode item lists per table.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<collections::HashMap<String, Vec<Item>>, D::Error> {
        collections::HashMap::<String, Vec<collections::HashMap<String, Decode>>>::deserialize(
            deserializer,
        )?
        .into_iter()
        .map(|(table, items)| {
            items
                .into_iter()
                .map(decode_item)
                .collect::<Result<Vec<_>, _>>()
                .map(|items| (table, items))
        })
        .collect::<Result<_, _>>()
        .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use serde_json::{Value, json};

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Wrapper {
        #[serde(with = "item")]
        item: Item,
    }

    fn encode(value: types::AttributeValue) -> Value {
        serde_json::to_value(Encode(&value)).unwrap()
    }

    #[rstest]
    #[case::string(types::AttributeValue::S("a".to_string()), json!({"S": "a"}))]
    #[case::number(types::AttributeValue::N("1.5".to_string()), json!({"N": "1.5"}))]
    #[case::binary(types::AttributeValue::B(Blob::new(b"abc".to_vec())), json!({"B": "YWJj"}))]
    #[case::string_set(
        types::AttributeValue::Ss(vec!["a".to_string(), "b".to_string()]),
        json!({"SS": ["a", "b"]})
    )]
    #[case::number_set(types::AttributeValue::Ns(vec!["1".to_string()]), json!({"NS": ["1"]}))]
    #[case::binary_set(
        types::AttributeValue::Bs(vec![Blob::new(b"abc".to_vec())]),
        json!({"BS": ["YWJj"]})
    )]
    #[case::null(types::AttributeValue::Null(true), json!({"NULL": true}))]
    #[case::bool(types::AttributeValue::Bool(false), json!({"BOOL": false}))]
    #[case::list(
        types::AttributeValue::L(vec![
            types::AttributeValue::S("a".to_string()),
            types::AttributeValue::N("2".to_string()),
        ]),
        json!({"L": [{"S": "a"}, {"N": "2"}]})
    )]
    #[case::map(
        types::AttributeValue::M(collections::HashMap::from([(
            "a".to_string(),
            types::AttributeValue::M(collections::HashMap::from([(
                "b".to_string(),
                types::AttributeValue::Bool(true),
            )])),
        )])),
        json!({"M": {"a": {"M": {"b": {"BOOL": true}}}}})
    )]
    fn test_encode(#[case] value: types::AttributeValue, #[case] expected: Value) {
        assert_eq!(encode(value), expected);
    }

    #[test]
    fn test_decode_nested_item() {
        let wrapper: Wrapper = serde_json::from_value(json!({
            "item": {
                "id": {"S": "1"},
                "blob": {"B": "YWJj"},
                "tags": {"L": [{"SS": ["x"]}, {"NULL": true}]}
            }
        }))
        .unwrap();
        assert_eq!(
            wrapper.item,
            collections::HashMap::from([
                ("id".to_string(), types::AttributeValue::S("1".to_string())),
                (
                    "blob".to_string(),
                    types::AttributeValue::B(Blob::new(b"abc".to_vec()))
                ),
                (
                    "tags".to_string(),
                    types::AttributeValue::L(vec![
                        types::AttributeValue::Ss(vec!["x".to_string()]),
                        types::AttributeValue::Null(true),
                    ])
                ),
            ])
        );
    }

    #[rstest]
    #[case::unknown_descriptor(json!({"item": {"a": {"X": "1"}}}))]
    #[case::bad_base64(json!({"item": {"a": {"B": "***"}}}))]
    #[case::not_an_object(json!({"item": {"a": "plain"}}))]
    fn test_decode_rejects(#[case] input: Value) {
        assert!(serde_json::from_value::<Wrapper>(input).is_err());
    }

    #[test]
    fn test_table_items() {
        #[derive(Debug, Deserialize, Serialize)]
        struct Tables {
            #[serde(with = "table_items")]
            tables: collections::HashMap<String, Vec<Item>>,
        }
        let input = json!({"tables": {"t": [{"id": {"N": "1"}}, {"id": {"N": "2"}}]}});
        let tables: Tables = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(tables.tables["t"].len(), 2);
        assert_eq!(serde_json::to_value(&tables).unwrap(), input);
    }
}
