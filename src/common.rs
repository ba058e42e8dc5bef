//! Shared typed helpers for building batch requests.
//!
//! Attribute values travel as DynamoDB JSON, keys are built from typed
//! partition/sort pairs, and projections from nested attribute selections.

/// DynamoDB JSON encoding of attribute values.
pub mod attribute_value;

/// Key types for identifying items in DynamoDB tables.
pub mod key;

/// Attribute selection for projection expressions.
pub mod selection;

use std::collections;

pub(crate) fn add_placeholder(keys: &[String], identifier: &str) -> (String, Vec<String>) {
    let placeholder = format!("#{identifier}");
    let mut new_keys = Vec::with_capacity(keys.len() + 1);
    new_keys.extend_from_slice(keys);
    new_keys.push(placeholder.clone());
    (placeholder, new_keys)
}

/// A projection expression and the attribute names it refers to.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ExpressionInput {
    pub(crate) expression: String,
    pub(crate) expression_attribute_names: collections::HashMap<String, String>,
}

impl ExpressionInput {
    pub(crate) fn merge(separator: &str, items: Vec<Self>) -> Self {
        let mut merged = Self::default();
        for item in items {
            merged
                .expression_attribute_names
                .extend(item.expression_attribute_names);
            if item.expression.is_empty() {
                continue;
            }
            if !merged.expression.is_empty() {
                merged.expression.push_str(separator);
            }
            merged.expression.push_str(&item.expression);
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case::root(&[], "a", "#a", vec!["#a"])]
    #[case::nested(&["#a".to_string()], "b", "#b", vec!["#a", "#b"])]
    fn test_add_placeholder(
        #[case] keys: &[String],
        #[case] identifier: &str,
        #[case] placeholder: &str,
        #[case] path: Vec<&str>,
    ) {
        let (actual_placeholder, actual_path) = add_placeholder(keys, identifier);
        assert_eq!(actual_placeholder, placeholder);
        assert_eq!(actual_path, path);
    }

    #[test]
    fn test_merge_skips_empty_expressions() {
        let merged = ExpressionInput::merge(
            ", ",
            vec![
                ExpressionInput {
                    expression: "#a".to_string(),
                    expression_attribute_names: collections::HashMap::from([(
                        "#a".to_string(),
                        "a".to_string(),
                    )]),
                },
                ExpressionInput::default(),
                ExpressionInput {
                    expression: "#b".to_string(),
                    ..Default::default()
                },
            ],
        );
        assert_eq!(merged.expression, "#a, #b");
        assert_eq!(merged.expression_attribute_names.len(), 1);
    }
}
