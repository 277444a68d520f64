//! One window's channel endpoint
//!
//! A [`Connection`] owns its websocket through two tasks: a reader that decodes
//! inbound frames and posts them to the owner's event channel in arrival
//! order, and a writer that drains the outbound queue. The owner sees exactly
//! one [`ConnectionEvent::Closed`] per connection no matter which half notices
//! the closure first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::common::{Error, Result};

use super::codec;
use super::protocol::{ConnectionId, Envelope};

/// Events a connection reports to its owner
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A decoded inbound envelope
    Message { key: u64, envelope: Envelope },
    /// The transport closed; sent once per connection
    Closed { key: u64 },
}

/// Work items for the writer task
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(Message),
    Close,
}

/// Closure bookkeeping shared by the handle and both tasks
struct Shared {
    key: u64,
    closed: AtomicBool,
    notified: AtomicBool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Shared {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if !self.notified.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ConnectionEvent::Closed { key: self.key });
        }
    }
}

/// A live channel to one window
pub struct Connection {
    id: ConnectionId,
    key: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    shared: Arc<Shared>,
    attributes: HashMap<String, Value>,
}

impl Connection {
    /// Take ownership of an open websocket and start its reader and writer
    pub fn spawn<S>(
        key: u64,
        id: ConnectionId,
        ws: WebSocketStream<S>,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            key,
            closed: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            events,
        });

        tokio::spawn(write_loop(sink, outbound_rx, shared.clone(), id.clone()));
        tokio::spawn(read_loop(stream, shared.clone(), id.clone()));

        Self {
            id,
            key,
            outbound,
            shared,
            attributes: HashMap::new(),
        }
    }

    /// A connection whose outbound frames land in the returned receiver
    ///
    /// Dropping the receiver behaves like a transport that went away.
    #[cfg(test)]
    pub(crate) fn detached(
        key: u64,
        id: impl Into<ConnectionId>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            key,
            closed: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            events,
        });
        let connection = Self {
            id: id.into(),
            key,
            outbound,
            shared,
            attributes: HashMap::new(),
        };
        (connection, outbound_rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Serial number of the underlying transport
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Encode and queue one envelope
    pub fn send(&self, kind: &str, data: Value) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed(self.id.to_string()));
        }
        let frame = codec::to_frame(kind, &data)?;
        self.outbound.send(Outbound::Frame(frame)).map_err(|_| {
            self.shared.mark_closed();
            Error::TransportClosed(self.id.to_string())
        })
    }

    /// Terminate the transport
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub(crate) fn take_attributes(&mut self) -> HashMap<String, Value> {
        std::mem::take(&mut self.attributes)
    }

    pub(crate) fn inherit_attributes(&mut self, attributes: HashMap<String, Value>) {
        for (key, value) in attributes {
            self.attributes.entry(key).or_insert(value);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop<S>(mut stream: SplitStream<WebSocketStream<S>>, shared: Arc<Shared>, id: ConnectionId)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(frame) => match codec::from_frame(&frame) {
                Some(Ok(envelope)) => {
                    tracing::debug!(window_id = %id, kind = %envelope.kind, data = %envelope.data, "Received message");
                    let event = ConnectionEvent::Message {
                        key: shared.key,
                        envelope,
                    };
                    if shared.events.send(event).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(window_id = %id, error = %e, "Dropping message");
                }
                None => {}
            },
            Err(e) => {
                tracing::debug!(window_id = %id, error = %e, "WebSocket read error");
                break;
            }
        }
    }
    shared.mark_closed();
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
    id: ConnectionId,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(frame).await {
                    tracing::debug!(window_id = %id, error = %e, "WebSocket write error");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.close().await;
                break;
            }
        }
    }
    shared.mark_closed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sent_text(item: Outbound) -> String {
        match item {
            Outbound::Frame(Message::Text(text)) => text.to_string(),
            other => panic!("unexpected outbound item: {:?}", other),
        }
    }

    #[test]
    fn test_send_queues_encoded_frame() {
        let (connection, mut rx) = Connection::detached(1, "42");
        connection.send("reload", json!({"id": "42"})).unwrap();
        assert_eq!(
            sent_text(rx.try_recv().unwrap()),
            r#"{"type":"reload","data":{"id":"42"}}"#
        );
    }

    #[test]
    fn test_send_after_transport_gone_fails() {
        let (connection, rx) = Connection::detached(1, "42");
        drop(rx);

        let err = connection.send("reload", Value::Null).unwrap_err();
        assert!(matches!(err, Error::TransportClosed(ref id) if id == "42"));
        assert!(connection.is_closed());
        // Second attempt short-circuits on the closed flag
        assert!(connection.send("reload", Value::Null).is_err());
    }

    #[test]
    fn test_closed_event_is_sent_once() {
        let (events, mut events_rx) = mpsc::unbounded_channel();
        let shared = Shared {
            key: 9,
            closed: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            events,
        };

        shared.mark_closed();
        shared.mark_closed();

        assert!(matches!(
            events_rx.try_recv(),
            Ok(ConnectionEvent::Closed { key: 9 })
        ));
        assert!(events_rx.try_recv().is_err());
    }

    #[test]
    fn test_inherited_attributes_do_not_clobber_fresh_ones() {
        let (mut connection, _rx) = Connection::detached(1, "42");
        connection.set("bounds", json!({"x": 5}));

        let mut old = HashMap::new();
        old.insert("bounds".to_string(), json!({"x": 1}));
        old.insert("init_bounds".to_string(), json!({"x": 0}));
        connection.inherit_attributes(old);

        assert_eq!(connection.get("bounds"), Some(&json!({"x": 5})));
        assert_eq!(connection.get("init_bounds"), Some(&json!({"x": 0})));
    }
}
