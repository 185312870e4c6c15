use crate::path::{flatten, key_hierarchy, unflatten, validate_key};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z0-9]{0,8}".prop_map(Value::from),
    ]
}

fn arb_tree() -> impl Strategy<Value = Map<String, Value>> {
    let node = arb_scalar().prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
            .prop_map(|map| Value::Object(map.into_iter().collect()))
    });
    prop::collection::btree_map("[a-z]{1,4}", node, 0..4)
        .prop_map(|map| map.into_iter().collect())
}

fn arb_path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,4}", 1..5)
}

/// Drops empty sub-mappings, which are not representable as stored leaves.
fn prune_empty(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .iter()
                .filter_map(|(key, value)| prune_empty(value).map(|value| (key.clone(), value)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        other => Some(other.clone()),
    }
}

proptest! {
    #[test]
    fn flatten_unflatten_roundtrip(tree in arb_tree()) {
        let mut rebuilt = Map::new();
        for (leaf, scalar) in flatten(&tree, "") {
            unflatten(&mut rebuilt, &leaf, scalar.clone());
        }
        let expected = prune_empty(&Value::Object(tree))
            .unwrap_or_else(|| Value::Object(Map::new()));
        prop_assert_eq!(Value::Object(rebuilt), expected);
    }

    #[test]
    fn flattened_leaves_are_valid_keys(tree in arb_tree()) {
        for (leaf, _) in flatten(&tree, "") {
            prop_assert!(validate_key(&leaf).is_ok());
        }
    }

    #[test]
    fn hierarchy_walks_to_the_first_element(elements in arb_path()) {
        let key = elements.join(".");
        let chain = key_hierarchy(&key);
        prop_assert_eq!(chain.len(), elements.len());
        prop_assert_eq!(chain.first().map(String::as_str), Some(key.as_str()));
        prop_assert_eq!(
            chain.last().map(String::as_str),
            Some(elements[0].as_str())
        );
        for pair in chain.windows(2) {
            prop_assert!(pair[0].starts_with(pair[1].as_str()));
        }
    }
}
