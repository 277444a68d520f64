//! WebSocket transport over loopback TCP
//!
//! The supervisor listens on `127.0.0.1:<port>`; agents dial
//! `ws://localhost:<port>/?window_id=<id>`. The window id travels in the
//! handshake query so it is known before the first message.

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{accept_hdr_async, connect_async, MaybeTlsStream, WebSocketStream};

use crate::common::{Error, Result};

use super::protocol::{ConnectionId, WINDOW_ID_PARAM};

/// Websocket stream type on the client side
pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bind the listening endpoint
pub async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|source| Error::Bind { port, source })
}

/// Complete the websocket handshake on an accepted TCP stream
///
/// Returns the connection id carried by the handshake query.
pub async fn accept(stream: TcpStream) -> Result<(ConnectionId, WebSocketStream<TcpStream>)> {
    let mut query = None;
    let ws = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            query = request.uri().query().map(str::to_owned);
            Ok(response)
        },
    )
    .await?;

    Ok((ConnectionId::from_query(query.as_deref()), ws))
}

/// URL an agent dials to reach the supervisor
pub fn endpoint_url(port: u16, id: &ConnectionId) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(id.as_str().as_bytes()).collect();
    format!("ws://localhost:{}/?{}={}", port, WINDOW_ID_PARAM, encoded)
}

/// Dial the supervisor
pub async fn connect(port: u16, id: &ConnectionId) -> Result<ClientStream> {
    let url = endpoint_url(port, id);
    let (ws, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| Error::ConnectFailed {
            url: url.clone(),
            reason: e.to_string(),
        })?;
    Ok(ws)
}
