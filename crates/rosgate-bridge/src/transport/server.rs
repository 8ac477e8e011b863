//! Server-side transport: accept loop and handshake validation.
//!
//! Admission happens during the HTTP upgrade: when a JWT validator is
//! configured, the client must offer exactly one WebSocket subprotocol, its
//! value is verified as a token, and the accepted subprotocol is echoed back.
//! Any failure rejects the upgrade with HTTP 401.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};

use crate::endpoint::{ConnectionHandle, Endpoint};
use crate::policy::JwtValidator;
use crate::transport::drive_connection;

/// Server transport flavor: plain TCP or TLS.
#[derive(Clone)]
pub enum Transport {
    Tcp,
    Tls(TlsAcceptor),
}

/// Outcome of validating one upgrade request.
struct Admission {
    /// The accepted token, when a validator is configured.
    token: Option<String>,
}

/// Decide admission for the offered subprotocols.
///
/// Without a validator every request is admitted (and no subprotocol is
/// selected). With one, the request must offer exactly one subprotocol whose
/// value verifies as a JWT; the accepted token is returned so the handshake
/// can select it.
pub fn admit(
    validator: Option<&JwtValidator>,
    offered: &[String],
) -> Result<Option<String>, rosgate_core::BridgeError> {
    use rosgate_core::BridgeError;

    let Some(validator) = validator else {
        return Ok(None);
    };

    // A valid client always offers exactly one subprotocol: its token.
    if offered.len() != 1 {
        return Err(BridgeError::Auth(format!(
            "client offered {} subprotocols instead of 1",
            offered.len()
        )));
    }

    let token = &offered[0];
    validator
        .verify(token)
        .map_err(|e| BridgeError::Auth(format!("error while validating token '{token}': {e}")))?;

    Ok(Some(token.clone()))
}

/// Validate the upgrade request against the configured policies, mapping any
/// refusal to an HTTP 401 response.
fn validate_upgrade(
    validator: Option<&JwtValidator>,
    request: &Request,
    mut response: Response,
) -> Result<(Response, Admission), ErrorResponse> {
    let offered: Vec<String> = request
        .headers()
        .get_all("Sec-WebSocket-Protocol")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .collect();

    let token = match admit(validator, &offered) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("{e}");
            return Err(unauthorized());
        }
    };

    if let Some(token) = &token {
        match HeaderValue::from_str(token) {
            Ok(value) => {
                response
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", value);
            }
            Err(_) => return Err(unauthorized()),
        }
    }

    Ok((response, Admission { token }))
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(None);
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

/// Accept connections forever, spawning one session task per client.
pub async fn run_acceptor(
    listener: TcpListener,
    transport: Transport,
    endpoint: Arc<Endpoint>,
    validator: Option<Arc<JwtValidator>>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept an incoming connection: {e}");
                continue;
            }
        };
        tracing::debug!(%peer, "Incoming connection");

        let transport = transport.clone();
        let endpoint = endpoint.clone();
        let validator = validator.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, transport, endpoint.clone(), validator).await {
                endpoint.handle_failed_connection();
                tracing::debug!("Connection from {peer} ended during setup: {e}");
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    transport: Transport,
    endpoint: Arc<Endpoint>,
    validator: Option<Arc<JwtValidator>>,
) -> rosgate_core::Result<()> {
    use rosgate_core::BridgeError;

    match transport {
        Transport::Tcp => handshake_and_drive(stream, endpoint, validator).await,
        Transport::Tls(acceptor) => {
            let tls = acceptor
                .accept(stream)
                .await
                .map_err(|e| BridgeError::Transport(format!("TLS accept failed: {e}")))?;
            handshake_and_drive(tls, endpoint, validator).await
        }
    }
}

/// The flavor-independent part: upgrade, admit, drive.
async fn handshake_and_drive<S>(
    stream: S,
    endpoint: Arc<Endpoint>,
    validator: Option<Arc<JwtValidator>>,
) -> rosgate_core::Result<()>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    use rosgate_core::BridgeError;

    let mut admission = Admission { token: None };
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| {
        let (response, admitted) = validate_upgrade(validator.as_deref(), request, response)?;
        admission = admitted;
        Ok(response)
    })
    .await
    .map_err(|e| BridgeError::Transport(format!("handshake failed: {e}")))?;

    let id = endpoint.allocate_connection_id();
    let (handle, outbound) = ConnectionHandle::new(id, admission.token);
    drive_connection(ws, endpoint, handle, outbound).await;
    Ok(())
}
