//! Inbound message routing for a client agent

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ipc::protocol::BoundsPayload;
use crate::ipc::{Bounds, ConnectionId, Envelope, MessageKind};

use super::window::WindowHandle;

/// User handler for one message type
pub type ClientHandler = Box<dyn FnMut(&Value) + Send + 'static>;

/// What the built-in handlers act on
pub(crate) struct WindowContext {
    pub id: ConnectionId,
    pub window: Option<Arc<dyn WindowHandle>>,
    pub send_bounds: bool,
}

/// Dispatch table for the client side
#[derive(Default)]
pub struct ClientRouter {
    handlers: HashMap<String, ClientHandler>,
}

impl ClientRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: impl Into<String>, handler: ClientHandler) {
        self.handlers.insert(kind.into(), handler);
    }

    /// Route one envelope; returns whether anything handled it
    pub(crate) fn dispatch(&mut self, envelope: &Envelope, context: &WindowContext) -> bool {
        let builtin = match envelope.message_kind() {
            MessageKind::SetBounds => {
                set_bounds(&envelope.data, context);
                true
            }
            MessageKind::Reload => {
                reload(&envelope.data, context);
                true
            }
            _ => false,
        };

        let user = match self.handlers.get_mut(&envelope.kind) {
            Some(handler) => {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(&envelope.data)
                }));
                if outcome.is_err() {
                    tracing::error!(window_id = %context.id, kind = %envelope.kind, "Message handler panicked");
                }
                true
            }
            None => false,
        };

        if !builtin && !user {
            tracing::debug!(window_id = %context.id, kind = %envelope.kind, "No handler for message");
        }
        builtin || user
    }
}

fn set_bounds(data: &Value, context: &WindowContext) {
    let payload = BoundsPayload::from_data(data);
    if !context.id.matches(payload.id.as_ref()) || !context.send_bounds {
        return;
    }
    let (Some(window), Some(bounds)) = (&context.window, payload.bounds) else {
        return;
    };
    match serde_json::from_value::<Bounds>(bounds) {
        Ok(bounds) => {
            tracing::debug!(window_id = %context.id, ?bounds, "Applying bounds");
            window.set_bounds(bounds);
        }
        Err(e) => {
            tracing::warn!(window_id = %context.id, error = %e, "Ignoring unusable bounds");
        }
    }
}

fn reload(data: &Value, context: &WindowContext) {
    if !context.id.matches(data.get("id")) {
        return;
    }
    if let Some(window) = &context.window {
        tracing::info!(window_id = %context.id, "Reloading window");
        window.reload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::client::window::WindowEvent;

    #[derive(Default)]
    struct RecordingWindow {
        applied: Mutex<Vec<Bounds>>,
        reloads: Mutex<usize>,
    }

    impl WindowHandle for RecordingWindow {
        fn id(&self) -> u64 {
            42
        }
        fn bounds(&self) -> Bounds {
            Bounds::default()
        }
        fn set_bounds(&self, bounds: Bounds) {
            self.applied.lock().unwrap().push(bounds);
        }
        fn reload(&self) {
            *self.reloads.lock().unwrap() += 1;
        }
        fn events(&self) -> mpsc::UnboundedReceiver<WindowEvent> {
            mpsc::unbounded_channel().1
        }
    }

    fn context(window: &Arc<RecordingWindow>, send_bounds: bool) -> WindowContext {
        WindowContext {
            id: ConnectionId::new("42"),
            window: Some(window.clone() as Arc<dyn WindowHandle>),
            send_bounds,
        }
    }

    #[test]
    fn test_set_bounds_applies_matching_id() {
        let window = Arc::new(RecordingWindow::default());
        let mut router = ClientRouter::new();
        let ctx = context(&window, true);

        let bounds = json!({"x": 0, "y": 0, "w": 800, "h": 600});
        router.dispatch(&Envelope::new("setBounds", json!({"bounds": bounds, "id": "42"})), &ctx);
        router.dispatch(&Envelope::new("setBounds", json!({"bounds": bounds, "id": "7"})), &ctx);
        router.dispatch(&Envelope::new("setBounds", json!({"bounds": null, "id": "42"})), &ctx);

        assert_eq!(*window.applied.lock().unwrap(), vec![Bounds::new(0, 0, 800, 600)]);
    }

    #[test]
    fn test_set_bounds_respects_send_bounds_flag() {
        let window = Arc::new(RecordingWindow::default());
        let mut router = ClientRouter::new();
        let ctx = context(&window, false);

        router.dispatch(
            &Envelope::new("setBounds", json!({"bounds": {"x": 1, "y": 2, "width": 3, "height": 4}})),
            &ctx,
        );
        assert!(window.applied.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reload_targets() {
        let window = Arc::new(RecordingWindow::default());
        let mut router = ClientRouter::new();
        let ctx = context(&window, true);

        router.dispatch(&Envelope::new("reload", json!({})), &ctx);
        router.dispatch(&Envelope::new("reload", json!({"id": "42"})), &ctx);
        router.dispatch(&Envelope::new("reload", json!({"id": "99"})), &ctx);

        assert_eq!(*window.reloads.lock().unwrap(), 2);
    }

    #[test]
    fn test_reload_without_window_is_harmless() {
        let mut router = ClientRouter::new();
        let ctx = WindowContext {
            id: ConnectionId::no_window(),
            window: None,
            send_bounds: true,
        };
        assert!(router.dispatch(&Envelope::new("reload", json!({})), &ctx));
        assert!(router.dispatch(&Envelope::new("setBounds", json!({"bounds": {"x": 1}})), &ctx));
    }

    #[test]
    fn test_user_handler_receives_data() {
        let mut router = ClientRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        router.on(
            "myNotification",
            Box::new(move |data| sink.lock().unwrap().push(data.clone())),
        );
        let ctx = WindowContext {
            id: ConnectionId::no_window(),
            window: None,
            send_bounds: true,
        };

        assert!(router.dispatch(&Envelope::new("myNotification", json!({"n": 1})), &ctx));
        assert!(!router.dispatch(&Envelope::new("unknown", json!({})), &ctx));
        assert_eq!(*seen.lock().unwrap(), vec![json!({"n": 1})]);
    }
}
