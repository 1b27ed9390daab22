// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Discovery of tagged objects inside arbitrary state documents.
//!
//! Snapshots and partial updates arrive as nested JSON. Any object carrying an
//! `htMeta` field is a reconciled object; everything else is structure.
//!
//! ```
//! use hashtree_sync::discovery::discover;
//! use serde_json::json;
//!
//! let state = json!({
//!     "participants": [
//!         {"htMeta": {"elementId": {"type": "participant", "id": 4, "version": 2},
//!                     "dataSetNames": ["main"]},
//!          "name": "alice"}
//!     ]
//! });
//! let found = discover(&state);
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].item().id, 4);
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::item::Item;
use crate::message::{HtMeta, TaggedObject};

/// Marker field identifying a reconciled object.
pub const TAG_FIELD: &str = "htMeta";

/// Field of the self object listing the data sets it mirrors.
pub const VISIBLE_DATA_SETS_FIELD: &str = "visibleDataSets";

/// Walk `state` and return every tagged object, outermost first.
///
/// The returned payload is the whole tagged node, nested objects included.
pub fn discover(state: &Value) -> Vec<TaggedObject> {
    let mut found = Vec::new();
    walk(state, &mut found);
    found
}

fn walk(value: &Value, found: &mut Vec<TaggedObject>) {
    match value {
        Value::Object(map) => {
            if let Some(tag) = map.get(TAG_FIELD) {
                match HtMeta::deserialize(tag) {
                    Ok(meta) => found.push(TaggedObject {
                        meta,
                        data: Some(value.clone()),
                    }),
                    Err(e) => debug!(error = %e, "Ignoring malformed hash tree tag"),
                }
            }
            for (key, child) in map {
                if key != TAG_FIELD {
                    walk(child, found);
                }
            }
        }
        Value::Array(items) => {
            for child in items {
                walk(child, found);
            }
        }
        _ => {}
    }
}

/// Group discovered items by the data sets they are tagged with.
pub fn group_by_data_set(objects: &[TaggedObject]) -> BTreeMap<String, Vec<Item>> {
    let mut grouped: BTreeMap<String, Vec<Item>> = BTreeMap::new();
    for object in objects {
        for name in &object.meta.data_set_names {
            grouped.entry(name.clone()).or_default().push(*object.item());
        }
    }
    grouped
}

/// Visibility list carried by a self object's payload.
///
/// Entries may be plain names or objects with a `name` field. `None` when the
/// payload carries no list at all.
pub fn visible_data_sets(data: &Value) -> Option<Vec<String>> {
    let entries = data.get(VISIBLE_DATA_SETS_FIELD)?.as_array()?;
    Some(
        entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(name) => Some(name.clone()),
                Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ObjectType;
    use serde_json::json;

    fn tag(kind: &str, id: u64, version: u64, sets: &[&str]) -> Value {
        json!({"elementId": {"type": kind, "id": id, "version": version}, "dataSetNames": sets})
    }

    #[test]
    fn test_discovers_nested_objects() {
        let state = json!({
            "htMeta": tag("locus", 0, 5, &["main"]),
            "self": {"htMeta": tag("self", 1, 2, &["self"]), "visibleDataSets": ["main"]},
            "participants": [
                {"htMeta": tag("participant", 10, 1, &["main", "atd"])},
                {"htMeta": tag("participant", 11, 4, &["atd"]), "devices": [{"id": "x"}]},
                {"name": "untagged"}
            ],
            "count": 3
        });

        let found = discover(&state);
        assert_eq!(found.len(), 4);
        assert_eq!(found[0].item().object_type, ObjectType::Locus);

        let grouped = group_by_data_set(&found);
        assert_eq!(grouped["main"].len(), 2);
        assert_eq!(grouped["atd"].len(), 2);
        assert_eq!(grouped["self"], vec![Item::new(ObjectType::SelfState, 1, 2)]);
    }

    #[test]
    fn test_payload_is_whole_node() {
        let node = json!({"htMeta": tag("info", 2, 1, &["main"]), "topic": "standup"});
        let found = discover(&json!({"info": node.clone()}));
        assert_eq!(found[0].data.as_ref(), Some(&node));
    }

    #[test]
    fn test_malformed_tags_skipped() {
        let state = json!([
            {"htMeta": {"elementId": {"type": "bogus", "id": 1, "version": 1}}},
            {"htMeta": "nope"},
            {"htMeta": tag("participant", 3, 1, &["main"])},
            42, null, "text"
        ]);
        let found = discover(&state);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].item().id, 3);
    }

    #[test]
    fn test_visible_data_sets_formats() {
        let names = visible_data_sets(&json!({"visibleDataSets": ["main", {"name": "atd", "url": "u"}, 5]}));
        assert_eq!(names, Some(vec!["main".to_string(), "atd".to_string()]));
        assert_eq!(visible_data_sets(&json!({"other": 1})), None);
        assert_eq!(visible_data_sets(&json!({"visibleDataSets": []})), Some(vec![]));
    }
}
