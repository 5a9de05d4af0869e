//! WebSocket message types for the backend channel.
//!
//! Outbound frames are open records keyed by `action`; inbound frames are
//! tagged by `type` with the payload usually (but not always) under `data`.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::replies::{expected_reply_type, timeout_class, TimeoutClass};

/// Field carrying the per-call identifier when request-id correlation is enabled.
pub const REQUEST_ID_FIELD: &str = "request_id";

const ACTION_FIELD: &str = "action";
const TYPE_FIELD: &str = "type";
const DATA_FIELD: &str = "data";

// =============================================================================
// Outbound
// =============================================================================

/// A command sent to the backend: `{ "action": ..., ...fields }`.
///
/// Built once and never mutated afterwards; builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCommand {
    action: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl OutboundCommand {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            fields: Map::new(),
        }
    }

    /// Add an action-specific field.
    ///
    /// The `action` key is reserved; attempts to set it are ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != ACTION_FIELD {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Build a command from a JSON object that contains a string `action`.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let action = match fields.remove(ACTION_FIELD) {
            Some(Value::String(action)) => action,
            _ => return Err(ProtocolError::MissingAction),
        };
        Ok(Self { action, fields })
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Attach a per-call identifier that the peer is expected to echo back.
    pub fn with_request_id(self, request_id: u64) -> Self {
        self.with_field(REQUEST_ID_FIELD, request_id)
    }

    pub fn request_id(&self) -> Option<u64> {
        self.fields.get(REQUEST_ID_FIELD).and_then(Value::as_u64)
    }

    /// Reply type the backend answers this action with.
    pub fn reply_type(&self) -> Cow<'static, str> {
        expected_reply_type(&self.action)
    }

    pub fn timeout_class(&self) -> TimeoutClass {
        timeout_class(&self.action)
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// A message received from the backend, parsed from a text frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_type: String,
    pub payload: Value,
    /// Echoed identifier, only present when the peer supports request ids.
    pub request_id: Option<u64>,
}

impl InboundMessage {
    /// Parse a raw frame.
    ///
    /// The payload is the `data` field when present. Some backend replies put
    /// their fields at the top level instead (e.g. `{"type": "strategy_saved",
    /// "success": true}`); in that case the payload is the object of every
    /// top-level field other than `type` and `request_id`.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let message_type = match object.remove(TYPE_FIELD) {
            Some(Value::String(message_type)) => message_type,
            _ => return Err(ProtocolError::MissingType),
        };
        let request_id = object.remove(REQUEST_ID_FIELD).and_then(|v| v.as_u64());
        let payload = match object.remove(DATA_FIELD) {
            Some(data) => data,
            None => Value::Object(object),
        };

        Ok(Self {
            message_type,
            payload,
            request_id,
        })
    }
}
