use serde::{Deserialize, Serialize};

/// A full message received or sent over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub topic: String,
    pub event: ChannelEvent,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub message_ref: serde_json::Value, // string or null
}

/// Channel events, including the Phoenix control events the feed protocol
/// is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    PostgresChanges,

    #[serde(rename = "phx_join")]
    PhoenixJoin,
    #[serde(rename = "phx_leave")]
    PhoenixLeave,
    #[serde(rename = "phx_reply")]
    PhoenixReply,
    #[serde(rename = "phx_error")]
    PhoenixError,
    #[serde(rename = "phx_close")]
    PhoenixClose,

    Heartbeat,
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A committed row change on a watched table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub op: ChangeOp,
    pub table: String,
    /// New row state. For deletes the store sends only the old row.
    #[serde(default)]
    pub row: serde_json::Value,
    /// Previous row state, present on updates and deletes.
    #[serde(default)]
    pub old_row: Option<serde_json::Value>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Decode a `postgres_changes` payload. Returns `None` when the payload
    /// is not a row change (e.g. a join acknowledgement).
    pub fn from_payload(payload: &serde_json::Value) -> Option<Self> {
        let op = match payload.get("type")?.as_str()? {
            "INSERT" => ChangeOp::Insert,
            "UPDATE" => ChangeOp::Update,
            "DELETE" => ChangeOp::Delete,
            _ => return None,
        };
        let table = payload.get("table")?.as_str()?.to_string();
        let row = payload
            .get("data")
            .or_else(|| payload.get("record"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let old_row = payload
            .get("old_record")
            .or_else(|| payload.get("old_data"))
            .cloned();
        let commit_timestamp = payload
            .get("commit_timestamp")
            .and_then(|v| v.as_str())
            .map(String::from);

        Some(Self {
            op,
            table,
            row,
            old_row,
            commit_timestamp,
        })
    }

    /// Row id the event is about: the new row's for inserts/updates, the
    /// old row's for deletes. Ids may be strings or numbers on the wire.
    pub fn row_id(&self) -> Option<String> {
        let id_of = |v: &serde_json::Value| {
            v.get("id").and_then(|id| {
                id.as_str()
                    .map(String::from)
                    .or_else(|| id.as_i64().map(|n| n.to_string()))
            })
        };
        id_of(&self.row).or_else(|| self.old_row.as_ref().and_then(id_of))
    }
}
