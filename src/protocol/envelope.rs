//! Wire envelope for bridge messages.
//!
//! # Format
//!
//! ```json
//! { "event": "component:selected", "payload": "..." }
//! ```
//!
//! An event with no payload may travel as the bare event name string, and a
//! transport message may carry an array of envelopes (a batch).

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

use super::serializer::{self, Serialized};
use super::value::Data;

// ============================================================================
// Reserved Events
// ============================================================================

/// Owning side is tearing down; release all channel resources.
pub const SHUTDOWN_EVENT: &str = "shutdown";

/// Diagnostic message; logged by the relay, never forwarded.
pub const LOG_EVENT: &str = "log";

/// Sent to a devtools half when script injection into its tab failed.
pub const PROXY_FAIL_EVENT: &str = "proxy-fail";

// ============================================================================
// Envelope
// ============================================================================

/// A named event plus an optional payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    pub event: String,

    /// Primitive, serialized string, or serialized chunk list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Creates an envelope with no payload.
    #[inline]
    #[must_use]
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            payload: None,
        }
    }

    /// Creates an envelope with a raw payload.
    #[inline]
    #[must_use]
    pub fn with_payload(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload: Some(payload),
        }
    }

    /// Creates an envelope whose payload is the serialized form of `data`.
    #[must_use]
    pub fn with_data(event: impl Into<String>, data: &Data) -> Self {
        Self::with_payload(event, serializer::stringify(data).to_value())
    }

    /// Returns `true` for the reserved `log` event.
    #[inline]
    #[must_use]
    pub fn is_log(&self) -> bool {
        self.event == LOG_EVENT
    }

    /// Decodes a serialized payload.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if there is no payload or it is not a string /
    ///   chunk list
    /// - [`Error::Json`] if the serialized text is malformed
    pub fn decode_payload(&self) -> Result<Data> {
        let payload = self
            .payload
            .as_ref()
            .ok_or_else(|| Error::protocol(format!("event '{}' has no payload", self.event)))?;
        let serialized = Serialized::from_value(payload).ok_or_else(|| {
            Error::protocol(format!("event '{}' payload is not serialized data", self.event))
        })?;
        serializer::parse(serialized)
    }

    /// Converts to the wire value.
    ///
    /// Payload-less envelopes become the bare event name.
    #[must_use]
    pub fn into_wire(self) -> Value {
        match self.payload {
            None => Value::String(self.event),
            Some(payload) => serde_json::json!({ "event": self.event, "payload": payload }),
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Splits one inbound transport message into envelopes.
///
/// - string: event with no payload
/// - object with string `event`: one envelope
/// - array: each element in order
///
/// Anything else is logged and skipped.
#[must_use]
pub fn decode_message(message: Value) -> Vec<Envelope> {
    let mut out = Vec::new();
    decode_into(message, &mut out);
    out
}

fn decode_into(message: Value, out: &mut Vec<Envelope>) {
    match message {
        Value::String(event) => out.push(Envelope::new(event)),
        Value::Array(items) => {
            for item in items {
                decode_into(item, out);
            }
        }
        Value::Object(mut fields) => match fields.remove("event") {
            Some(Value::String(event)) => out.push(Envelope {
                event,
                payload: fields.remove("payload"),
            }),
            _ => warn!("Dropping message without event name"),
        },
        other => warn!(message = %other, "Dropping unrecognized message"),
    }
}

// ============================================================================
// Tests
// ============================================================================
