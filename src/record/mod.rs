//! Record data model: tables, keys, versioned values, and record maps.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod operation;

pub use operation::{OpCommand, Operation, last_edited_stamp, now_ms};

/// Name of a remote table.
///
/// Tables are an open enumeration: the remote authority may introduce tables
/// this client has never heard of, and those are carried verbatim rather than
/// rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table(String);

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn block() -> Self {
        Self::new("block")
    }

    pub fn collection() -> Self {
        Self::new("collection")
    }

    pub fn collection_view() -> Self {
        Self::new("collection_view")
    }

    pub fn space() -> Self {
        Self::new("space")
    }

    pub fn space_view() -> Self {
        Self::new("space_view")
    }

    pub fn user() -> Self {
        Self::new("notion_user")
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Table {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Table {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Identity of one remote record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub table: Table,
    pub id: String,
}

impl RecordKey {
    pub fn new(table: impl Into<Table>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}

/// A record value together with the version the remote authority assigned.
///
/// `value: None` is a confirmed-absent (or deleted) record, which is distinct
/// from a record the client has never fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub value: Option<Value>,
    #[serde(default)]
    pub version: i64,
}

impl VersionedRecord {
    pub fn new(value: Value, version: i64) -> Self {
        Self {
            value: Some(value),
            version,
        }
    }

    pub fn absent() -> Self {
        Self {
            value: None,
            version: 0,
        }
    }
}

/// A batch of records spanning possibly multiple tables, as returned by one
/// fetch or query call. Entries may be `None` when the authority reports a
/// record as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordMap(pub BTreeMap<Table, BTreeMap<String, Option<VersionedRecord>>>);

impl RecordMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &RecordKey, record: Option<VersionedRecord>) {
        self.0
            .entry(key.table.clone())
            .or_default()
            .insert(key.id.clone(), record);
    }

    pub fn get(&self, table: &Table, id: &str) -> Option<&Option<VersionedRecord>> {
        self.0.get(table).and_then(|rows| rows.get(id))
    }

    /// First record id stored under `table`, if any. Bootstrap record maps
    /// carry exactly one user and at most one space, so "first" is enough.
    pub fn first_id(&self, table: &Table) -> Option<&str> {
        self.0
            .get(table)
            .and_then(|rows| rows.keys().next())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    /// Iterate every `(key, record)` pair in the map, across all tables.
    pub fn records(&self) -> impl Iterator<Item = (RecordKey, Option<&VersionedRecord>)> + '_ {
        self.0.iter().flat_map(|(table, rows)| {
            rows.iter()
                .map(move |(id, record)| (RecordKey::new(table.clone(), id.clone()), record.as_ref()))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_tables_are_tolerated() {
        let table = Table::new("reaction");
        assert_eq!(table.as_str(), "reaction");

        let key = RecordKey::new("reaction", "r1");
        assert_eq!(key.to_string(), "reaction/r1");
    }

    #[test]
    fn record_map_round_trips_null_entries() {
        let raw = json!({
            "block": {
                "b1": { "value": { "id": "b1" }, "version": 3 },
                "b2": null
            }
        });

        let map: RecordMap = serde_json::from_value(raw).expect("record map decodes");
        assert_eq!(map.len(), 2);

        let present = map.get(&Table::block(), "b1").expect("entry exists");
        assert_eq!(present.as_ref().map(|r| r.version), Some(3));

        let absent = map.get(&Table::block(), "b2").expect("entry exists");
        assert!(absent.is_none());
    }

    #[test]
    fn record_map_version_defaults_to_zero() {
        let raw = json!({ "space": { "s1": { "value": { "id": "s1" } } } });
        let map: RecordMap = serde_json::from_value(raw).expect("record map decodes");

        let record = map
            .get(&Table::space(), "s1")
            .and_then(|entry| entry.as_ref())
            .expect("record present");
        assert_eq!(record.version, 0);
    }

    #[test]
    fn records_iterates_across_tables() {
        let mut map = RecordMap::new();
        map.insert(
            &RecordKey::new("block", "b1"),
            Some(VersionedRecord::new(json!({}), 1)),
        );
        map.insert(&RecordKey::new("space", "s1"), None);

        let keys: Vec<String> = map.records().map(|(key, _)| key.to_string()).collect();
        assert_eq!(keys, vec!["block/b1", "space/s1"]);
    }

    #[test]
    fn first_id_on_missing_table() {
        let map = RecordMap::new();
        assert!(map.first_id(&Table::space()).is_none());
    }
}
