//! Mutation operations and their builders.
//!
//! Operations are the unit of mutation. Their semantics belong to the remote
//! authority; the client only routes them, and interprets a small fixed set
//! when reconciling the local cache after a commit.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};
use time::OffsetDateTime;

use super::{RecordKey, Table};

/// Remote mutation command.
///
/// Commands the client does not recognize round-trip over the wire as
/// `Other`, but are rejected by local cache application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpCommand {
    Set,
    Update,
    ListAfter,
    ListBefore,
    ListRemove,
    Other(String),
}

impl OpCommand {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Set => "set",
            Self::Update => "update",
            Self::ListAfter => "listAfter",
            Self::ListBefore => "listBefore",
            Self::ListRemove => "listRemove",
            Self::Other(command) => command,
        }
    }
}

impl From<&str> for OpCommand {
    fn from(command: &str) -> Self {
        match command {
            "set" => Self::Set,
            "update" => Self::Update,
            "listAfter" => Self::ListAfter,
            "listBefore" => Self::ListBefore,
            "listRemove" => Self::ListRemove,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for OpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OpCommand {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpCommand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let command = String::deserialize(deserializer)?;
        Ok(command.as_str().into())
    }
}

/// A single mutation targeting a path within one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub table: Table,
    pub id: String,
    #[serde(default)]
    pub path: Vec<String>,
    pub command: OpCommand,
    pub args: Value,
}

impl Operation {
    pub fn new(
        table: impl Into<Table>,
        id: impl Into<String>,
        path: Vec<String>,
        command: OpCommand,
        args: Value,
    ) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
            path,
            command,
            args,
        }
    }

    /// Replace the scalar or subtree at `path` with `args`.
    pub fn set(
        table: impl Into<Table>,
        id: impl Into<String>,
        path: Vec<String>,
        args: Value,
    ) -> Self {
        Self::new(table, id, path, OpCommand::Set, args)
    }

    /// Shallow-merge the object `args` into the object at `path`.
    pub fn update(
        table: impl Into<Table>,
        id: impl Into<String>,
        path: Vec<String>,
        args: Value,
    ) -> Self {
        Self::new(table, id, path, OpCommand::Update, args)
    }

    /// Insert `child_id` into the list at `path`, after the sibling named in
    /// `after` or at the end when no anchor is given.
    pub fn list_after(
        table: impl Into<Table>,
        id: impl Into<String>,
        path: Vec<String>,
        child_id: &str,
        after: Option<&str>,
    ) -> Self {
        let args = match after {
            Some(anchor) => json!({ "id": child_id, "after": anchor }),
            None => json!({ "id": child_id }),
        };
        Self::new(table, id, path, OpCommand::ListAfter, args)
    }

    /// Insert `child_id` into the list at `path`, before the sibling named in
    /// `before` or at the front when no anchor is given.
    pub fn list_before(
        table: impl Into<Table>,
        id: impl Into<String>,
        path: Vec<String>,
        child_id: &str,
        before: Option<&str>,
    ) -> Self {
        let args = match before {
            Some(anchor) => json!({ "id": child_id, "before": anchor }),
            None => json!({ "id": child_id }),
        };
        Self::new(table, id, path, OpCommand::ListBefore, args)
    }

    /// Remove `child_id` from the list at `path`.
    pub fn list_remove(
        table: impl Into<Table>,
        id: impl Into<String>,
        path: Vec<String>,
        child_id: &str,
    ) -> Self {
        Self::new(
            table,
            id,
            path,
            OpCommand::ListRemove,
            json!({ "id": child_id }),
        )
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.table.clone(), self.id.clone())
    }
}

/// Bookkeeping operation stamping the acting user and the current time onto a
/// block, appended once per distinct block touched by a commit.
pub fn last_edited_stamp(user_id: &str, block_id: &str) -> Operation {
    Operation::update(
        Table::block(),
        block_id,
        Vec::new(),
        json!({
            "last_edited_time": now_ms(),
            "last_edited_by_id": user_id,
            "last_edited_by_table": "notion_user",
        }),
    )
}

/// Current wall-clock time in unix milliseconds, the timestamp unit the
/// remote authority uses in record fields.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
