//! Inbound message routing for the supervisor
//!
//! Built-in kinds are matched first; any user handler registered for the same
//! type runs afterwards. Unknown types are ignored.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::ipc::protocol::{BoundsPayload, ATTR_BOUNDS, ATTR_INIT_BOUNDS};
use crate::ipc::{Connection, Envelope, MessageKind};

/// User handler for one message type
pub type Handler = Box<dyn FnMut(&Value, &mut Connection) + Send + 'static>;

/// Dispatch table from message type to handler
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a message type, replacing any previous one
    pub fn on(&mut self, kind: impl Into<String>, handler: Handler) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Route one envelope; returns whether anything handled it
    pub fn dispatch(&mut self, envelope: &Envelope, connection: &mut Connection) -> bool {
        let builtin = match envelope.message_kind() {
            MessageKind::InitBounds => {
                init_bounds(&envelope.data, connection);
                true
            }
            MessageKind::ChangeBounds => {
                change_bounds(&envelope.data, connection);
                true
            }
            MessageKind::GetBounds => {
                get_bounds(connection);
                true
            }
            MessageKind::SetBounds | MessageKind::Reload | MessageKind::Other(_) => false,
        };

        let user = match self.handlers.get_mut(&envelope.kind) {
            Some(handler) => {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(&envelope.data, connection)
                }));
                if outcome.is_err() {
                    tracing::error!(window_id = %connection.id(), kind = %envelope.kind, "Message handler panicked");
                }
                true
            }
            None => false,
        };

        if !builtin && !user {
            tracing::debug!(window_id = %connection.id(), kind = %envelope.kind, "No handler for message");
        }
        builtin || user
    }
}

/// Record creation-time bounds unless they match what is already stored
fn init_bounds(data: &Value, connection: &mut Connection) {
    let bounds = BoundsPayload::from_data(data).bounds.unwrap_or(Value::Null);
    if connection.get(ATTR_INIT_BOUNDS) != Some(&bounds) {
        connection.set(ATTR_INIT_BOUNDS, bounds.clone());
        connection.set(ATTR_BOUNDS, bounds);
    }
}

fn change_bounds(data: &Value, connection: &mut Connection) {
    let bounds = BoundsPayload::from_data(data).bounds.unwrap_or(Value::Null);
    tracing::debug!(window_id = %connection.id(), %bounds, "changeBounds");
    connection.set(ATTR_BOUNDS, bounds);
}

fn get_bounds(connection: &mut Connection) {
    let bounds = connection.get(ATTR_BOUNDS).cloned().unwrap_or(Value::Null);
    tracing::debug!(window_id = %connection.id(), %bounds, "getBounds");
    let reply = json!({ "bounds": bounds, "id": connection.id() });
    if let Err(e) = connection.send(MessageKind::SetBounds.as_str(), reply) {
        tracing::warn!(window_id = %connection.id(), error = %e, "Failed to reply to getBounds");
    }
}
