//! Local application of operations to cached record values.
//!
//! Runs right after a successful remote commit so the cache reflects the
//! just-written state without waiting for the next fetch. Only the commands
//! the client understands are applied; anything else fails loudly, because a
//! silently skipped command means the cache has diverged from the authority.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::record::{OpCommand, Operation};

/// Reject a batch up front if it contains any command local application does
/// not understand, so a commit never half-applies to the cache.
pub(crate) fn ensure_supported(operations: &[Operation]) -> Result<()> {
    for op in operations {
        if let OpCommand::Other(command) = &op.command {
            return Err(Error::unsupported_operation(command.clone()));
        }
    }
    Ok(())
}

/// Apply one operation to a cached record value in place.
pub(crate) fn apply(value: &mut Value, op: &Operation) -> Result<()> {
    match &op.command {
        OpCommand::Set => {
            *target_mut(value, &op.path) = op.args.clone();
            Ok(())
        }
        OpCommand::Update => {
            apply_update(value, op);
            Ok(())
        }
        OpCommand::ListAfter => {
            apply_list_insert(value, op, ListAnchor::After);
            Ok(())
        }
        OpCommand::ListBefore => {
            apply_list_insert(value, op, ListAnchor::Before);
            Ok(())
        }
        OpCommand::ListRemove => {
            apply_list_remove(value, op);
            Ok(())
        }
        OpCommand::Other(command) => Err(Error::unsupported_operation(command.clone())),
    }
}

enum ListAnchor {
    After,
    Before,
}

fn apply_update(value: &mut Value, op: &Operation) {
    let target = target_mut(value, &op.path);
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    let (Value::Object(target), Value::Object(args)) = (target, &op.args) else {
        warn!(key = %op.key(), "update operation with non-object args; skipping");
        return;
    };
    for (field, incoming) in args {
        target.insert(field.clone(), incoming.clone());
    }
}

fn apply_list_insert(value: &mut Value, op: &Operation, anchor: ListAnchor) {
    let Some(child) = op.args.get("id").cloned() else {
        warn!(key = %op.key(), command = %op.command, "list insert without `id` argument; skipping");
        return;
    };

    let anchor_id = match anchor {
        ListAnchor::After => op.args.get("after"),
        ListAnchor::Before => op.args.get("before"),
    };

    let target = target_mut(value, &op.path);
    if !target.is_array() {
        *target = Value::Array(Vec::new());
    }
    let Value::Array(items) = target else {
        unreachable!("list target was just coerced to an array");
    };

    // re-inserting an existing child moves it rather than duplicating it
    items.retain(|item| item != &child);

    let position = anchor_id.and_then(|wanted| items.iter().position(|item| item == wanted));
    let index = match (position, anchor) {
        (Some(found), ListAnchor::After) => found + 1,
        (Some(found), ListAnchor::Before) => found,
        (None, ListAnchor::After) => items.len(),
        (None, ListAnchor::Before) => 0,
    };
    items.insert(index, child);
}

fn apply_list_remove(value: &mut Value, op: &Operation) {
    let Some(child) = op.args.get("id") else {
        warn!(key = %op.key(), "listRemove without `id` argument; skipping");
        return;
    };
    let target = target_mut(value, &op.path);
    if let Value::Array(items) = target {
        items.retain(|item| item != child);
    }
}

/// Walk `path` down from `root`, coercing intermediate nodes to objects and
/// creating missing steps, and return the node the path names.
fn target_mut<'a>(root: &'a mut Value, path: &[String]) -> &'a mut Value {
    let mut node = root;
    for step in path {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map.entry(step.clone()).or_insert(Value::Null),
            _ => unreachable!("path step parent was just coerced to an object"),
        };
    }
    node
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn set_replaces_subtree_at_path() {
        let mut value = json!({ "properties": { "title": "old" } });
        let op = Operation::set(
            "block",
            "b1",
            vec!["properties".to_string(), "title".to_string()],
            json!("new"),
        );

        apply(&mut value, &op).expect("set applies");
        assert_eq!(value["properties"]["title"], "new");
    }

    #[test]
    fn set_with_empty_path_replaces_whole_value() {
        let mut value = json!({ "old": true });
        let op = Operation::set("block", "b1", Vec::new(), json!({ "fresh": 1 }));

        apply(&mut value, &op).expect("set applies");
        assert_eq!(value, json!({ "fresh": 1 }));
    }

    #[test]
    fn set_creates_missing_intermediate_objects() {
        let mut value = json!({});
        let op = Operation::set(
            "block",
            "b1",
            vec!["format".to_string(), "color".to_string()],
            json!("red"),
        );

        apply(&mut value, &op).expect("set applies");
        assert_eq!(value["format"]["color"], "red");
    }

    #[test]
    fn update_merges_shallowly() {
        let mut value = json!({ "alive": true, "type": "text" });
        let op = Operation::update(
            "block",
            "b1",
            Vec::new(),
            json!({ "type": "page", "version": 2 }),
        );

        apply(&mut value, &op).expect("update applies");
        assert_eq!(value["alive"], true);
        assert_eq!(value["type"], "page");
        assert_eq!(value["version"], 2);
    }

    #[test]
    fn list_after_inserts_relative_to_anchor() {
        let mut value = json!({ "content": ["a", "c"] });
        let op = Operation::list_after(
            "block",
            "b1",
            vec!["content".to_string()],
            "b",
            Some("a"),
        );

        apply(&mut value, &op).expect("listAfter applies");
        assert_eq!(value["content"], json!(["a", "b", "c"]));
    }

    #[test]
    fn list_after_without_anchor_appends() {
        let mut value = json!({ "content": ["a"] });
        let op = Operation::list_after("block", "b1", vec!["content".to_string()], "z", None);

        apply(&mut value, &op).expect("listAfter applies");
        assert_eq!(value["content"], json!(["a", "z"]));
    }

    #[test]
    fn list_before_without_anchor_prepends() {
        let mut value = json!({ "content": ["a"] });
        let op = Operation::list_before("block", "b1", vec!["content".to_string()], "z", None);

        apply(&mut value, &op).expect("listBefore applies");
        assert_eq!(value["content"], json!(["z", "a"]));
    }

    #[test]
    fn list_insert_moves_existing_child() {
        let mut value = json!({ "content": ["a", "b", "c"] });
        let op = Operation::list_after(
            "block",
            "b1",
            vec!["content".to_string()],
            "a",
            Some("c"),
        );

        apply(&mut value, &op).expect("listAfter applies");
        assert_eq!(value["content"], json!(["b", "c", "a"]));
    }

    #[test]
    fn list_remove_drops_child() {
        let mut value = json!({ "content": ["a", "b"] });
        let op = Operation::list_remove("block", "b1", vec!["content".to_string()], "a");

        apply(&mut value, &op).expect("listRemove applies");
        assert_eq!(value["content"], json!(["b"]));
    }

    #[test]
    fn list_insert_into_missing_list_creates_it() {
        let mut value = json!({});
        let op = Operation::list_after("block", "b1", vec!["content".to_string()], "a", None);

        apply(&mut value, &op).expect("listAfter applies");
        assert_eq!(value["content"], json!(["a"]));
    }

    #[test]
    fn unknown_command_fails_loudly() {
        let mut value = json!({});
        let op = Operation::new(
            "block",
            "b1",
            Vec::new(),
            OpCommand::Other("keyedObjectListAfter".to_string()),
            json!({}),
        );

        let err = apply(&mut value, &op).unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn ensure_supported_rejects_mixed_batches() {
        let ops = vec![
            Operation::set("block", "b1", Vec::new(), json!({})),
            Operation::new(
                "block",
                "b2",
                Vec::new(),
                OpCommand::Other("mystery".to_string()),
                json!({}),
            ),
        ];
        assert!(ensure_supported(&ops).is_err());
        assert!(ensure_supported(&ops[..1]).is_ok());
    }
}
