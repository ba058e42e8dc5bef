use crate::common;

use indexmap::IndexMap;
use std::{
    collections,
    hash::{self, Hasher},
    mem,
};

/// Attributes to project, possibly nested.
///
/// ```rust
/// use dynamodb_direct::common::selection::SelectionMap;
/// use indexmap::IndexMap;
///
/// let selection = SelectionMap::Node(IndexMap::from([(
///     "profile".to_string(),
///     SelectionMap::Leaves(vec!["name".to_string(), "email".to_string()]),
/// )]));
/// let (expression, names) = selection.projection();
/// assert_eq!(expression, "#profile.#name, #profile.#email");
/// assert_eq!(names.len(), 3);
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SelectionMap {
    /// A flat list of attribute names.
    Leaves(Vec<String>),
    /// Nested selections under each attribute name.
    Node(IndexMap<String, SelectionMap>),
}

impl hash::Hash for SelectionMap {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        mem::discriminant(self).hash(state);
        match self {
            Self::Leaves(leaves) => leaves.hash(state),
            Self::Node(map) => {
                // nodes compare equal regardless of entry order
                let entries = map.iter().fold(0u64, |entries, entry| {
                    let mut hasher = hash::DefaultHasher::new();
                    entry.hash(&mut hasher);
                    entries ^ hasher.finish()
                });
                map.len().hash(state);
                entries.hash(state);
            }
        }
    }
}

impl From<SelectionMap> for common::ExpressionInput {
    fn from(selection_map: SelectionMap) -> Self {
        selection_map.expression_under(&[])
    }
}

impl SelectionMap {
    /// The projection expression and its attribute name placeholders.
    pub fn projection(self) -> (String, collections::HashMap<String, String>) {
        let input: common::ExpressionInput = self.into();
        (input.expression, input.expression_attribute_names)
    }

    fn expression_under(self, path: &[String]) -> common::ExpressionInput {
        let inputs: Vec<_> = match self {
            Self::Leaves(leaves) => leaves
                .into_iter()
                .map(|leaf| {
                    let (placeholder, leaf_path) = common::add_placeholder(path, &leaf);
                    common::ExpressionInput {
                        expression: leaf_path.join("."),
                        expression_attribute_names: collections::HashMap::from([(
                            placeholder,
                            leaf,
                        )]),
                    }
                })
                .collect(),
            Self::Node(map) => map
                .into_iter()
                .map(|(key, value)| {
                    let (placeholder, node_path) = common::add_placeholder(path, &key);
                    let mut input = value.expression_under(&node_path);
                    input.expression_attribute_names.insert(placeholder, key);
                    input
                })
                .collect(),
        };
        common::ExpressionInput::merge(", ", inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use std::hash::Hash;

    fn leaves(names: &[&str]) -> SelectionMap {
        SelectionMap::Leaves(names.iter().map(|name| name.to_string()).collect())
    }

    fn names(names: &[&str]) -> collections::HashMap<String, String> {
        names
            .iter()
            .map(|name| (format!("#{name}"), name.to_string()))
            .collect()
    }

    #[test]
    fn test_node_hash_ignores_entry_order() {
        let node = |order: [&str; 2]| {
            SelectionMap::Node(
                order
                    .iter()
                    .map(|key| (key.to_string(), leaves(&[*key])))
                    .collect(),
            )
        };
        let hash_of = |selection: &SelectionMap| {
            let mut hasher = hash::DefaultHasher::new();
            selection.hash(&mut hasher);
            hasher.finish()
        };
        let (first, second) = (node(["a", "b"]), node(["b", "a"]));
        assert_eq!(first, second);
        assert_eq!(hash_of(&first), hash_of(&second));
    }

    #[rstest]
    #[case::single_leaf(leaves(&["a"]), "#a", names(&["a"]))]
    #[case::leaves(leaves(&["a", "b"]), "#a, #b", names(&["a", "b"]))]
    #[case::node(
        SelectionMap::Node(IndexMap::from([
            ("a".to_string(), leaves(&["b", "c"])),
            ("d".to_string(), leaves(&["e", "f"])),
        ])),
        "#a.#b, #a.#c, #d.#e, #d.#f",
        names(&["a", "b", "c", "d", "e", "f"])
    )]
    #[case::nested_node(
        SelectionMap::Node(IndexMap::from([
            (
                "a".to_string(),
                SelectionMap::Node(IndexMap::from([("b".to_string(), leaves(&["c", "d"]))])),
            ),
            ("b".to_string(), leaves(&["e", "f"])),
        ])),
        "#a.#b.#c, #a.#b.#d, #b.#e, #b.#f",
        names(&["a", "b", "c", "d", "e", "f"])
    )]
    fn test_projection(
        #[case] selection: SelectionMap,
        #[case] expression: &str,
        #[case] expected_names: collections::HashMap<String, String>,
    ) {
        let (actual_expression, actual_names) = selection.projection();
        assert_eq!(actual_expression, expression);
        assert_eq!(actual_names, expected_names);
    }
}
