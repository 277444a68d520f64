//! Wire protocol types
//!
//! Every websocket text frame carries one [`Envelope`]:
//!
//! ```text
//! {"type": "changeBounds", "data": {"bounds": {"x": 0, "y": 0, "width": 800, "height": 600}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection id used when no window is attached to a client agent
pub const NO_WINDOW_ID: &str = "_no_browser";

/// Query parameter of the websocket handshake that carries the window id
pub const WINDOW_ID_PARAM: &str = "window_id";

/// Stored attribute: bounds reported when the window was created
pub const ATTR_INIT_BOUNDS: &str = "init_bounds";

/// Stored attribute: most recent bounds of the window
pub const ATTR_BOUNDS: &str = "bounds";

/// Identity of a connection, derived from the window handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The sentinel id for agents without a window
    pub fn no_window() -> Self {
        Self(NO_WINDOW_ID.to_string())
    }

    /// Id for a numeric window handle
    pub fn from_window(handle: u64) -> Self {
        Self(handle.to_string())
    }

    /// Extract the id from a handshake query string, falling back to the sentinel
    pub fn from_query(query: Option<&str>) -> Self {
        query
            .and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(key, _)| key == WINDOW_ID_PARAM)
                    .map(|(_, value)| value.into_owned())
            })
            .filter(|value| !value.is_empty())
            .map(Self)
            .unwrap_or_else(Self::no_window)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_no_window(&self) -> bool {
        self.0 == NO_WINDOW_ID
    }

    /// Whether an `id` field of a payload designates this connection
    ///
    /// An absent or null id addresses everyone. Numeric ids compare by their
    /// decimal rendering.
    pub fn matches(&self, id: Option<&Value>) -> bool {
        match id {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s == &self.0,
            Some(Value::Number(n)) => n.to_string() == self.0,
            Some(_) => false,
        }
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The `{type, data}` message unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload, semantics depend on `kind`
    #[serde(default = "empty_object", skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Classify the envelope's type
    pub fn message_kind(&self) -> MessageKind<'_> {
        MessageKind::parse(&self.kind)
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Message kinds with built-in handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind<'a> {
    /// client → server: bounds at window creation
    InitBounds,
    /// client → server: window moved or resized
    ChangeBounds,
    /// client → server: ask for the stored bounds
    GetBounds,
    /// server → client: apply bounds
    SetBounds,
    /// server → client: reload window content
    Reload,
    /// Anything else, routed to user handlers
    Other(&'a str),
}

impl<'a> MessageKind<'a> {
    pub fn parse(kind: &'a str) -> Self {
        match kind {
            "initBounds" => Self::InitBounds,
            "changeBounds" => Self::ChangeBounds,
            "getBounds" => Self::GetBounds,
            "setBounds" => Self::SetBounds,
            "reload" => Self::Reload,
            other => Self::Other(other),
        }
    }

    pub fn as_str(&self) -> &'a str {
        match self {
            Self::InitBounds => "initBounds",
            Self::ChangeBounds => "changeBounds",
            Self::GetBounds => "getBounds",
            Self::SetBounds => "setBounds",
            Self::Reload => "reload",
            Self::Other(kind) => kind,
        }
    }
}

impl std::fmt::Display for MessageKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A window's on-screen rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    #[serde(alias = "w")]
    pub width: u32,
    #[serde(alias = "h")]
    pub height: u32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Payload of `initBounds`, `changeBounds` and `setBounds`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundsPayload {
    #[serde(default)]
    pub bounds: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl BoundsPayload {
    /// Read a bounds payload, treating anything unexpected as empty
    pub fn from_data(data: &Value) -> Self {
        serde_json::from_value(data.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_id_from_query() {
        assert_eq!(ConnectionId::from_query(Some("window_id=42")).as_str(), "42");
        assert_eq!(
            ConnectionId::from_query(Some("foo=bar&window_id=7")).as_str(),
            "7"
        );
        assert!(ConnectionId::from_query(Some("foo=bar")).is_no_window());
        assert!(ConnectionId::from_query(Some("window_id=")).is_no_window());
        assert!(ConnectionId::from_query(None).is_no_window());
        assert_eq!(
            ConnectionId::from_query(Some("window_id=_no_browser")).as_str(),
            NO_WINDOW_ID
        );
    }

    #[test]
    fn test_connection_id_matches_payload_id() {
        let id = ConnectionId::new("42");
        assert!(id.matches(None));
        assert!(id.matches(Some(&Value::Null)));
        assert!(id.matches(Some(&json!("42"))));
        assert!(id.matches(Some(&json!(42))));
        assert!(!id.matches(Some(&json!("7"))));
        assert!(!id.matches(Some(&json!(["42"]))));
    }

    #[test]
    fn test_message_kind_parse() {
        assert_eq!(MessageKind::parse("initBounds"), MessageKind::InitBounds);
        assert_eq!(MessageKind::parse("reload"), MessageKind::Reload);
        assert_eq!(
            MessageKind::parse("myNotification"),
            MessageKind::Other("myNotification")
        );
        assert_eq!(MessageKind::GetBounds.as_str(), "getBounds");
    }

    #[test]
    fn test_bounds_accepts_short_names() {
        let bounds: Bounds = serde_json::from_value(json!({"x": 0, "y": 0, "w": 800, "h": 600})).unwrap();
        assert_eq!(bounds, Bounds::new(0, 0, 800, 600));

        let value = serde_json::to_value(bounds).unwrap();
        assert_eq!(value, json!({"x": 0, "y": 0, "width": 800, "height": 600}));
    }

    #[test]
    fn test_bounds_payload_tolerates_garbage() {
        let payload = BoundsPayload::from_data(&json!("not an object"));
        assert!(payload.bounds.is_none());

        let payload = BoundsPayload::from_data(&json!({"bounds": {"x": 1}, "id": "3"}));
        assert_eq!(payload.bounds, Some(json!({"x": 1})));
        assert_eq!(payload.id, Some(json!("3")));
    }
}
