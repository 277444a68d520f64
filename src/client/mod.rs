//! Client side - the agent that runs inside the child process
//!
//! Each window joins the supervisor over its own connection, reports its
//! geometry and obeys reload and bounds instructions.

mod handler;
mod window;

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::config::ClientConfig;
use crate::common::{logging, Result};
use crate::ipc::{transport, Connection, ConnectionEvent, ConnectionId, MessageKind};

pub use handler::{ClientHandler, ClientRouter};
pub use window::{WindowEvent, WindowHandle};

use handler::WindowContext;

/// Builder for a [`ClientAgent`]
pub struct ClientBuilder {
    config: ClientConfig,
    window: Option<Arc<dyn WindowHandle>>,
    router: ClientRouter,
}

impl ClientBuilder {
    /// Attach the window this agent speaks for
    pub fn window(mut self, window: Arc<dyn WindowHandle>) -> Self {
        self.window = Some(window);
        self
    }

    /// Register a handler for messages of one type sent by the supervisor
    pub fn on<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.router.on(kind, Box::new(handler));
        self
    }

    /// Dial the supervisor and start serving the connection
    ///
    /// Installs logging at the configured level unless the host program
    /// already set up a subscriber.
    pub async fn join(self) -> Result<ClientAgent> {
        let ClientBuilder {
            config,
            window,
            router,
        } = self;

        logging::init(config.effective_log_level());

        let id = window
            .as_ref()
            .map(|w| ConnectionId::from_window(w.id()))
            .unwrap_or_else(ConnectionId::no_window);

        let ws = transport::connect(config.port, &id).await?;
        tracing::info!(window_id = %id, port = config.port, "Joined supervisor");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::spawn(0, id.clone(), ws, events_tx));

        let window_events = window.as_ref().map(|w| w.events());
        if let Some(window) = &window {
            announce(&connection, &**window)?;
        }

        let (closed_tx, closed) = watch::channel(false);
        let context = WindowContext {
            id: id.clone(),
            window,
            send_bounds: config.send_bounds,
        };
        let task = tokio::spawn(serve(
            connection.clone(),
            events_rx,
            window_events,
            context,
            router,
            closed_tx,
        ));

        Ok(ClientAgent {
            id,
            connection,
            closed,
            task,
        })
    }
}

/// A joined window agent
pub struct ClientAgent {
    id: ConnectionId,
    connection: Arc<Connection>,
    closed: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ClientAgent {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            window: None,
            router: ClientRouter::new(),
        }
    }

    /// Join with an optional window and no user handlers
    pub async fn join(window: Option<Arc<dyn WindowHandle>>, config: ClientConfig) -> Result<Self> {
        let mut builder = Self::builder(config);
        builder.window = window;
        builder.join().await
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Send a message to the supervisor
    pub fn send(&self, kind: &str, data: Value) -> Result<()> {
        self.connection.send(kind, data)
    }

    /// Close the connection to the supervisor
    pub fn close(&self) {
        self.connection.close();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the connection has closed from either side
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

impl Drop for ClientAgent {
    fn drop(&mut self) {
        self.connection.close();
        self.task.abort();
    }
}

/// Report creation-time geometry, then ask for anything stored
fn announce(connection: &Connection, window: &dyn WindowHandle) -> Result<()> {
    connection.send(
        MessageKind::InitBounds.as_str(),
        json!({ "bounds": window.bounds() }),
    )?;
    connection.send(MessageKind::GetBounds.as_str(), json!({}))
}

async fn serve(
    connection: Arc<Connection>,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    mut window_events: Option<mpsc::UnboundedReceiver<WindowEvent>>,
    context: WindowContext,
    mut router: ClientRouter,
    closed: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ConnectionEvent::Message { envelope, .. }) => {
                    router.dispatch(&envelope, &context);
                }
                Some(ConnectionEvent::Closed { .. }) | None => break,
            },
            event = next_window_event(&mut window_events) => match event {
                Some(WindowEvent::Move | WindowEvent::Resize) => {
                    forward_bounds(&connection, &context);
                }
                Some(WindowEvent::Closed) => {
                    tracing::debug!(window_id = %context.id, "Window closed");
                    connection.close();
                    window_events = None;
                }
                None => window_events = None,
            },
        }
    }

    tracing::info!(window_id = %context.id, "Left supervisor");
    let _ = closed.send(true);
}

async fn next_window_event(
    events: &mut Option<mpsc::UnboundedReceiver<WindowEvent>>,
) -> Option<WindowEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn forward_bounds(connection: &Connection, context: &WindowContext) {
    if !context.send_bounds {
        return;
    }
    let Some(window) = &context.window else {
        return;
    };
    let data = json!({ "bounds": window.bounds() });
    if let Err(e) = connection.send(MessageKind::ChangeBounds.as_str(), data) {
        tracing::debug!(window_id = %context.id, error = %e, "Could not report bounds");
    }
}
