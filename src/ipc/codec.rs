//! Envelope wire codec
//!
//! One envelope per websocket frame, UTF-8 JSON, no extra framing:
//! ```text
//! {"type":"<kind>","data":{...}}
//! ```

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::common::{Error, Result};

use super::protocol::Envelope;

/// Encode an envelope into its text form
pub fn encode(kind: &str, data: &Value) -> Result<String> {
    if kind.is_empty() {
        return Err(Error::InvalidArgument("message type must not be empty".to_string()));
    }
    let envelope = Envelope::new(kind, data.clone());
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode one text payload into an envelope
///
/// Anything that is not a JSON object with a non-empty string `type` is
/// rejected as [`Error::MalformedMessage`].
pub fn decode(text: &str) -> Result<Envelope> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::malformed(format!("invalid JSON: {}", e)))?;

    let Value::Object(mut object) = value else {
        return Err(Error::malformed("envelope is not a JSON object"));
    };

    let kind = match object.remove("type") {
        Some(Value::String(kind)) if !kind.is_empty() => kind,
        Some(Value::String(_)) => return Err(Error::malformed("empty `type`")),
        Some(_) => return Err(Error::malformed("`type` is not a string")),
        None => return Err(Error::malformed("missing `type`")),
    };

    let data = object
        .remove("data")
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    Ok(Envelope { kind, data })
}

/// Build a websocket frame for an envelope
pub fn to_frame(kind: &str, data: &Value) -> Result<Message> {
    Ok(Message::Text(encode(kind, data)?.into()))
}

/// Decode a websocket frame
///
/// Returns `None` for control frames, which carry no envelope.
pub fn from_frame(frame: &Message) -> Option<Result<Envelope>> {
    match frame {
        Message::Text(text) => Some(decode(text.as_str())),
        Message::Binary(bytes) => Some(
            std::str::from_utf8(bytes)
                .map_err(|e| Error::malformed(format!("binary frame is not UTF-8: {}", e)))
                .and_then(decode),
        ),
        _ => None,
    }
}
