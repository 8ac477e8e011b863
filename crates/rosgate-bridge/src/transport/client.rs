//! Client-side transport: dial one peer and drive the session.

use std::sync::Arc;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, connect_async_tls_with_config, Connector};

use rosgate_core::{BridgeError, Result};

use crate::endpoint::{ConnectionHandle, Endpoint};
use crate::transport::drive_connection;

/// Where and how the client connects.
pub struct DialConfig {
    pub host: String,
    pub port: u16,
    /// Dial `wss://` instead of `ws://`.
    pub tls: bool,
    /// Explicit trust anchors; `None` with `tls` uses the bundled webpki
    /// roots.
    pub connector: Option<Connector>,
    /// JWT offered as the single WebSocket subprotocol.
    pub token: Option<String>,
}

impl DialConfig {
    fn url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Connect to the peer and run the session until it ends.
pub async fn run_client(dial: DialConfig, endpoint: Arc<Endpoint>) -> Result<()> {
    let url = dial.url();
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| BridgeError::Transport(format!("invalid peer address '{url}': {e}")))?;

    if let Some(token) = &dial.token {
        let value = HeaderValue::from_str(token)
            .map_err(|e| BridgeError::Config(format!("token is not header-safe: {e}")))?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    tracing::info!("Connecting to {url}");

    let id = endpoint.allocate_connection_id();
    let (handle, outbound) = ConnectionHandle::new(id, dial.token.clone());

    if dial.tls {
        let (ws, _response) = connect_async_tls_with_config(request, None, false, dial.connector)
            .await
            .map_err(|e| BridgeError::Transport(format!("connect failed: {e}")))?;
        drive_connection(ws, endpoint, handle, outbound).await;
    } else {
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| BridgeError::Transport(format!("connect failed: {e}")))?;
        drive_connection(ws, endpoint, handle, outbound).await;
    }

    Ok(())
}
