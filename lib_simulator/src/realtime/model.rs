//! JSON frames of the realtime subscription protocol.
//!
//! Inbound frames accept both message vocabularies seen in the wild:
//! `start`/`stop` and their `subscribe`/`complete` aliases.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake carrying auth material for the supplied validator.
    ConnectionInit {
        #[serde(default)]
        payload: Value,
    },
    /// Register a subscription under a client-chosen correlation id.
    #[serde(alias = "subscribe")]
    Start { id: String, payload: StartPayload },
    /// Tear down one subscription. Unknown ids still succeed.
    #[serde(alias = "complete")]
    Stop { id: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartPayload {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(rename = "operationName", default)]
    pub operation_name: Option<String>,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    ConnectionAck {
        payload: ConnectionAckPayload,
    },
    ConnectionError {
        payload: ErrorPayload,
    },
    StartAck {
        id: String,
    },
    Data {
        id: String,
        payload: Value,
    },
    Complete {
        id: String,
    },
    Ka,
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        payload: ErrorPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionAckPayload {
    /// Keepalive grace window the client should expect `ka` frames within.
    #[serde(rename = "connectionTimeoutMs")]
    pub connection_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub errors: Vec<FrameError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameError {
    #[serde(rename = "errorType")]
    pub error_type: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn single(error_type: &str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![FrameError {
                error_type: error_type.to_string(),
                message: message.into(),
            }],
        }
    }
}
