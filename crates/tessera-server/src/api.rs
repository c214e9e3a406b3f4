//! Wire types for the request/response surface.
//!
//! One request per envelope:
//!
//! ```json
//! {"id": 7, "timeout_ms": 250, "request": {"op": "put", "key": [107], "value": [118]}}
//! ```
//!
//! and one reply per envelope:
//!
//! ```json
//! {"id": 7, "reply": {"ok": {"op": "put", "message": "Successfully put key"}}}
//! {"id": 7, "reply": {"error": {"kind": "invalid_argument", "message": "...", "retryable": false}}}
//! ```
//!
//! Keys and values are raw bytes and travel as JSON arrays of integers.

use serde::{Deserialize, Serialize};

use tessera_core::{EngineError, KeyValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl From<KeyValue> for WireEntry {
    fn from(kv: KeyValue) -> Self {
        Self { key: kv.key, value: kv.value }
    }
}

impl From<WireEntry> for KeyValue {
    fn from(entry: WireEntry) -> Self {
        KeyValue { key: entry.key, value: entry.value }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Put {
        key: Vec<u8>,
        #[serde(default)]
        value: Vec<u8>,
    },
    Get {
        key: Vec<u8>,
    },
    Delete {
        key: Vec<u8>,
    },
    BatchPut {
        entries: Vec<WireEntry>,
    },
    BatchGet {
        keys: Vec<Vec<u8>>,
    },
    BatchDelete {
        keys: Vec<Vec<u8>>,
    },
    PrefixScan {
        #[serde(default)]
        prefix: Vec<u8>,
        /// Non-positive or absent means the server default
        #[serde(default)]
        limit: i32,
    },
    RangeScan {
        #[serde(default)]
        start_key: Vec<u8>,
        #[serde(default)]
        end_key: Vec<u8>,
        #[serde(default)]
        limit: i32,
    },
    GetStats,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Put { .. } => "put",
            Request::Get { .. } => "get",
            Request::Delete { .. } => "delete",
            Request::BatchPut { .. } => "batch_put",
            Request::BatchGet { .. } => "batch_get",
            Request::BatchDelete { .. } => "batch_delete",
            Request::PrefixScan { .. } => "prefix_scan",
            Request::RangeScan { .. } => "range_scan",
            Request::GetStats => "get_stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Response {
    Put {
        message: String,
    },
    Get {
        /// Empty when `found` is false
        value: Vec<u8>,
        found: bool,
        message: String,
    },
    Delete {
        message: String,
    },
    BatchPut {
        success_count: u64,
        failure_count: u64,
        message: String,
    },
    BatchGet {
        /// Found pairs in ascending key order
        found: Vec<WireEntry>,
        /// Absent keys in the order first requested
        missing: Vec<Vec<u8>>,
        message: String,
    },
    BatchDelete {
        success_count: u64,
        failure_count: u64,
        message: String,
    },
    PrefixScan {
        entries: Vec<WireEntry>,
        message: String,
    },
    RangeScan {
        entries: Vec<WireEntry>,
        message: String,
    },
    GetStats {
        total_keys: u64,
        total_size_bytes: u64,
        db_path: String,
        total_operations: u64,
        /// Milliseconds since the Unix epoch
        last_accessed_ms: Option<u64>,
        message: String,
    },
}

impl Response {
    pub fn message(&self) -> &str {
        match self {
            Response::Put { message }
            | Response::Get { message, .. }
            | Response::Delete { message }
            | Response::BatchPut { message, .. }
            | Response::BatchGet { message, .. }
            | Response::BatchDelete { message, .. }
            | Response::PrefixScan { message, .. }
            | Response::RangeScan { message, .. }
            | Response::GetStats { message, .. } => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `deadline_exceeded`
    pub kind: String,
    pub message: String,
    /// Whether the same request may succeed if sent again
    pub retryable: bool,
}

impl ErrorBody {
    /// The frame could not be decoded into a request.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self { kind: "malformed_request".to_string(), message: message.into(), retryable: false }
    }
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        Self { kind: err.code().to_string(), message: err.to_string(), retryable: err.is_retryable() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(Response),
    Error(ErrorBody),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Echoed back on the reply
    #[serde(default)]
    pub id: u64,
    /// Per-request budget; the server default applies when absent
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: u64,
    pub reply: Reply,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_put_envelope() {
        let envelope: RequestEnvelope = serde_json::from_str(
            r#"{"id":7,"timeout_ms":250,"request":{"op":"put","key":[107],"value":[118]}}"#,
        )
        .unwrap();
        assert_eq!(envelope.id, 7);
        assert_eq!(envelope.timeout_ms, Some(250));
        assert_eq!(envelope.request, Request::Put { key: b"k".to_vec(), value: b"v".to_vec() });
    }

    #[test]
    fn test_optional_fields_default() {
        let envelope: RequestEnvelope =
            serde_json::from_str(r#"{"request":{"op":"range_scan"}}"#).unwrap();
        assert_eq!(envelope.id, 0);
        assert!(envelope.timeout_ms.is_none());
        assert_eq!(
            envelope.request,
            Request::RangeScan { start_key: Vec::new(), end_key: Vec::new(), limit: 0 }
        );

        let envelope: RequestEnvelope = serde_json::from_str(r#"{"request":{"op":"get_stats"}}"#).unwrap();
        assert_eq!(envelope.request.op(), "get_stats");
    }

    #[test]
    fn test_unknown_op_rejected() {
        let result: Result<RequestEnvelope, _> = serde_json::from_str(r#"{"request":{"op":"drop_table"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reply_shape() {
        let reply = ReplyEnvelope {
            id: 3,
            reply: Reply::Ok(Response::Delete { message: "Successfully deleted key".into() }),
        };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["reply"]["ok"]["op"], "delete");
        assert_eq!(json["reply"]["ok"]["message"], "Successfully deleted key");

        let reply = ReplyEnvelope { id: 4, reply: Reply::Error(ErrorBody::malformed("bad frame")) };
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["reply"]["error"]["kind"], "malformed_request");
        assert_eq!(json["reply"]["error"]["retryable"], false);
    }
}
