//! WebSocket transport (tokio-tungstenite).
//!
//! One generic connection loop serves both roles and both stream flavors
//! (plain TCP and TLS): the per-connection outbound queue is drained into the
//! sink, inbound text frames are handed to the endpoint, and the close
//! handshake is surfaced as the endpoint's close event.

pub mod client;
pub mod server;
pub mod tls;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::endpoint::{ConnectionHandle, Endpoint, WireOut};

/// Drive one established WebSocket session until either side ends it.
///
/// Outbound frames preserve the order in which they were queued on the
/// handle. Inbound frames are processed in arrival order. Returns once the
/// session is finished; the caller owns nothing afterwards.
pub(crate) async fn drive_connection<S>(
    ws: WebSocketStream<S>,
    endpoint: Arc<Endpoint>,
    handle: ConnectionHandle,
    mut outbound: mpsc::UnboundedReceiver<WireOut>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws.split();

    endpoint.handle_connection_opened(&handle);

    loop {
        tokio::select! {
            maybe_out = outbound.recv() => {
                match maybe_out {
                    Some(WireOut::Frame(frame)) => {
                        if ws_tx.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(WireOut::Close { reason }) => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::Normal,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            incoming = ws_rx.next() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(payload) => {
                        endpoint.handle_message(&handle, payload.as_str());
                    }
                    Message::Ping(data) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    endpoint.handle_connection_closed(&handle);
}
