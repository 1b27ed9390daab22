// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Versioned item identities.
//!
//! An [`Item`] is what the hash tree stores: a typed numeric id plus the
//! version last seen for it. Payloads live with the caller and are never hashed.
//!
//! ```
//! use hashtree_sync::{Item, ObjectType};
//!
//! let item = Item::new(ObjectType::Participant, 5, 1);
//! assert_eq!(item.key(), (ObjectType::Participant, 5));
//! assert_eq!(ObjectType::SelfState.as_str(), "self");
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Type tag of a reconciled object.
///
/// Ordering follows the wire name, since leaf hashing visits types
/// in lexicographic order of their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    #[serde(rename = "controlentry")]
    ControlEntry,
    #[serde(rename = "embeddedapp")]
    EmbeddedApp,
    #[serde(rename = "fullstate")]
    FullState,
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "links")]
    Links,
    #[serde(rename = "locus")]
    Locus,
    #[serde(rename = "mediashare")]
    MediaShare,
    #[serde(rename = "metadata")]
    Metadata,
    #[serde(rename = "participant")]
    Participant,
    /// The local participant's own view; drives visibility and session end.
    #[serde(rename = "self")]
    SelfState,
}

impl ObjectType {
    pub const ALL: [ObjectType; 10] = [
        Self::ControlEntry,
        Self::EmbeddedApp,
        Self::FullState,
        Self::Info,
        Self::Links,
        Self::Locus,
        Self::MediaShare,
        Self::Metadata,
        Self::Participant,
        Self::SelfState,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlEntry => "controlentry",
            Self::EmbeddedApp => "embeddedapp",
            Self::FullState => "fullstate",
            Self::Info => "info",
            Self::Links => "links",
            Self::Locus => "locus",
            Self::MediaShare => "mediashare",
            Self::Metadata => "metadata",
            Self::Participant => "participant",
            Self::SelfState => "self",
        }
    }
}

impl PartialOrd for ObjectType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown object type '{s}'"))
    }
}

/// A versioned object identity (`elementId` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub id: u64,
    pub version: u64,
}

impl Item {
    pub fn new(object_type: ObjectType, id: u64, version: u64) -> Self {
        Self { object_type, id, version }
    }

    /// Identity without the version.
    #[inline]
    pub fn key(&self) -> (ObjectType, u64) {
        (self.object_type, self.id)
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.object_type, self.id, self.version)
    }
}

/// One entry of a mixed hash tree batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Update(Item),
    Remove(Item),
}

impl Operation {
    pub fn item(&self) -> &Item {
        match self {
            Operation::Update(item) | Operation::Remove(item) => item,
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Operation::Remove(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_order_is_lexicographic() {
        let mut types = ObjectType::ALL.to_vec();
        types.sort();
        let names: Vec<_> = types.iter().map(|t| t.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert!(ObjectType::Participant < ObjectType::SelfState);
        assert!(ObjectType::Locus < ObjectType::MediaShare);
    }

    #[test]
    fn test_type_parse_roundtrip() {
        for t in ObjectType::ALL {
            assert_eq!(t.as_str().parse::<ObjectType>().unwrap(), t);
        }
        assert!("roster".parse::<ObjectType>().is_err());
    }

    #[test]
    fn test_item_wire_format() {
        let item = Item::new(ObjectType::SelfState, 3, 7);
        let json = serde_json::to_value(item).unwrap();
        assert_eq!(json, serde_json::json!({"type": "self", "id": 3, "version": 7}));
        assert_eq!(item.to_string(), "self:3@7");
    }

    #[test]
    fn test_operation_accessors() {
        let item = Item::new(ObjectType::Participant, 1, 1);
        assert!(Operation::Remove(item).is_remove());
        assert!(!Operation::Update(item).is_remove());
        assert_eq!(Operation::Update(item).item(), &item);
    }
}
