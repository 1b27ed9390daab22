// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire types exchanged with the remote authority.
//!
//! All field names are camelCase on the wire.
//!
//! ```text
//! Remote ──► Local    HashTreeMessage { dataSets, visibleDataSetsUrl?, locusStateElements? }
//! Local  ──► Remote   GET  <dataSet.url>/hashtree  → HashesResponse { hashes, dataSet }
//! Local  ──► Remote   POST <dataSet.url>/sync      ← SyncRequest { dataSet, leafDataEntries }
//! Local  ──► Remote   GET  <visibleDataSetsUrl>    → DataSetsResponse { dataSets }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::hash_tree::{validate_leaf_count, LeafHash};
use crate::item::{Item, ObjectType};

/// Jitter parameters for the verification timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    #[serde(default)]
    pub max_ms: u64,
    /// Larger exponents skew the jitter toward short delays
    #[serde(default = "default_exponent")]
    pub exponent: f64,
}

fn default_exponent() -> f64 { 1.0 }

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_ms: 0,
            exponent: default_exponent(),
        }
    }
}

/// Data set metadata as reported by the remote authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetMeta {
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub leaf_count: usize,
    #[serde(default)]
    pub version: u64,
    /// Remote root hash
    #[serde(default)]
    pub root: LeafHash,
    #[serde(default)]
    pub idle_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

impl DataSetMeta {
    pub fn new(name: impl Into<String>, url: impl Into<String>, leaf_count: usize) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            leaf_count,
            version: 0,
            root: LeafHash::default(),
            idle_ms: 0,
            backoff: Backoff::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_leaf_count(self.leaf_count)
    }
}

/// Hash tree tag carried by every reconciled object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtMeta {
    pub element_id: Item,
    #[serde(default)]
    pub data_set_names: Vec<String>,
}

/// An object update: tag plus payload. No payload means removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedObject {
    #[serde(rename = "htMeta", alias = "meta")]
    pub meta: HtMeta,
    #[serde(default)]
    pub data: Option<Value>,
}

impl TaggedObject {
    /// Tombstone for an item held in one data set.
    pub fn removal(item: Item, data_set: &str) -> Self {
        Self {
            meta: HtMeta {
                element_id: item,
                data_set_names: vec![data_set.to_string()],
            },
            data: None,
        }
    }

    #[inline]
    pub fn item(&self) -> &Item {
        &self.meta.element_id
    }

    #[inline]
    pub fn is_removal(&self) -> bool {
        self.data.is_none()
    }

    #[inline]
    pub fn is_self(&self) -> bool {
        self.meta.element_id.object_type == ObjectType::SelfState
    }
}

/// Heartbeat or full update from the remote authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashTreeMessage {
    #[serde(default)]
    pub data_sets: Vec<DataSetMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_data_sets_url: Option<String>,
    /// Elements that fail to parse (unknown type, missing tag) are dropped
    /// individually; the rest of the message still applies.
    #[serde(
        default,
        deserialize_with = "skip_unparseable",
        skip_serializing_if = "Option::is_none"
    )]
    pub locus_state_elements: Option<Vec<TaggedObject>>,
}

fn skip_unparseable<'de, D>(deserializer: D) -> std::result::Result<Option<Vec<TaggedObject>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|elements| {
        elements
            .into_iter()
            .filter_map(|element| match serde_json::from_value::<TaggedObject>(element) {
                Ok(object) => Some(object),
                Err(e) => {
                    warn!(error = %e, "Dropping unparseable element");
                    None
                }
            })
            .collect()
    }))
}

impl HashTreeMessage {
    /// Heartbeats carry metadata only, no item payload.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.locus_state_elements.is_none()
    }
}

/// Partial state delta: a nested document with tagged objects somewhere inside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    #[serde(default)]
    pub data_sets: Vec<DataSetMeta>,
    #[serde(default, alias = "locus")]
    pub state: Value,
}

/// Data set reference inside a sync request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDataSet {
    pub name: String,
    pub leaf_count: usize,
    /// Local root at the time of the request
    pub root: LeafHash,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafDataEntry {
    pub leaf_index: usize,
    pub element_ids: Vec<Item>,
}

/// Body of `POST <dataSet.url>/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub data_set: SyncDataSet,
    pub leaf_data_entries: Vec<LeafDataEntry>,
}

/// Body of `GET <dataSet.url>/hashtree`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashesResponse {
    #[serde(default)]
    pub hashes: Option<Vec<LeafHash>>,
    #[serde(default)]
    pub data_set: Option<DataSetMeta>,
}

/// Body of the visible data sets metadata endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSetsResponse {
    #[serde(default)]
    pub data_sets: Vec<DataSetMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash_tree::EMPTY_HASH;
    use serde_json::json;

    #[test]
    fn test_data_set_meta_defaults() {
        let meta: DataSetMeta = serde_json::from_value(json!({
            "name": "main",
            "leafCount": 16,
        }))
        .unwrap();
        assert_eq!(meta.leaf_count, 16);
        assert_eq!(meta.root, EMPTY_HASH);
        assert_eq!(meta.backoff, Backoff::default());
        assert!(meta.validate().is_ok());

        let bad = DataSetMeta::new("main", "", 12);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_full_message_parse() {
        let msg: HashTreeMessage = serde_json::from_value(json!({
            "dataSets": [{
                "name": "main", "url": "https://x/main", "leafCount": 4, "version": 3,
                "root": "00000000000000000000000000000001", "idleMs": 1000,
                "backoff": {"maxMs": 500, "exponent": 2.0}
            }],
            "visibleDataSetsUrl": "https://x/visible",
            "locusStateElements": [
                {"htMeta": {"elementId": {"type": "participant", "id": 7, "version": 2},
                            "dataSetNames": ["main"]},
                 "data": {"name": "p7"}},
                {"htMeta": {"elementId": {"type": "participant", "id": 8, "version": 3},
                            "dataSetNames": ["main"]},
                 "data": null}
            ]
        }))
        .unwrap();

        assert!(!msg.is_heartbeat());
        assert_eq!(msg.data_sets[0].backoff.max_ms, 500);
        let elements = msg.locus_state_elements.unwrap();
        assert!(!elements[0].is_removal());
        assert!(elements[1].is_removal());
        assert_eq!(elements[1].item().id, 8);
    }

    #[test]
    fn test_unknown_element_type_dropped_alone() {
        let msg: HashTreeMessage = serde_json::from_value(json!({
            "dataSets": [{"name": "main", "leafCount": 4, "version": 2}],
            "locusStateElements": [
                {"htMeta": {"elementId": {"type": "whiteboard", "id": 1, "version": 1},
                            "dataSetNames": ["main"]},
                 "data": {}},
                {"htMeta": {"elementId": {"type": "participant", "id": 2, "version": 1},
                            "dataSetNames": ["main"]},
                 "data": {}},
                {"data": {}}
            ]
        }))
        .unwrap();

        assert_eq!(msg.data_sets[0].version, 2);
        let elements = msg.locus_state_elements.unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].item(), &Item::new(ObjectType::Participant, 2, 1));

        let empty: HashTreeMessage =
            serde_json::from_value(json!({"locusStateElements": [{"htMeta": 5}]})).unwrap();
        assert_eq!(empty.locus_state_elements, Some(vec![]));
        assert!(!empty.is_heartbeat());
    }

    #[test]
    fn test_meta_alias_accepted() {
        let obj: TaggedObject = serde_json::from_value(json!({
            "meta": {"elementId": {"type": "self", "id": 1, "version": 1}, "dataSetNames": ["self"]},
            "data": {}
        }))
        .unwrap();
        assert!(obj.is_self());
    }

    #[test]
    fn test_heartbeat_has_no_elements() {
        let msg: HashTreeMessage =
            serde_json::from_value(json!({"dataSets": [{"name": "main", "leafCount": 1}]})).unwrap();
        assert!(msg.is_heartbeat());
    }

    #[test]
    fn test_sync_request_wire_shape() {
        let req = SyncRequest {
            data_set: SyncDataSet {
                name: "main".into(),
                leaf_count: 2,
                root: EMPTY_HASH,
            },
            leaf_data_entries: vec![LeafDataEntry {
                leaf_index: 1,
                element_ids: vec![Item::new(ObjectType::Participant, 3, 1)],
            }],
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "dataSet": {"name": "main", "leafCount": 2, "root": EMPTY_HASH.to_string()},
                "leafDataEntries": [{"leafIndex": 1, "elementIds": [{"type": "participant", "id": 3, "version": 1}]}]
            })
        );
    }
}
