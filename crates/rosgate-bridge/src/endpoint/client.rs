//! The client role: dials one peer and bridges that single connection.

use std::sync::Arc;
use std::time::Duration;

use serde_yaml::Value as ConfigNode;

use rosgate_core::dynamic::TypeRegistry;
use rosgate_core::{BridgeError, Result};

use crate::bus::RequiredTypes;
use crate::config;
use crate::encoding::make_json_encoding;
use crate::endpoint::Endpoint;
use crate::transport::client::{run_client, DialConfig};
use crate::transport::tls;

const SPIN_SLEEP: Duration = Duration::from_millis(100);

/// WebSocket client endpoint.
///
/// `configure` resolves the peer address and TLS trust; the first
/// `spin_once` call dials. The configured `token`, when present, is offered
/// as the single WebSocket subprotocol so a policy-gated server can admit
/// the connection.
pub struct WebSocketClient {
    endpoint: Arc<Endpoint>,
    runtime: Option<tokio::runtime::Runtime>,
    dial: Option<DialConfig>,
    has_spun_once: bool,
}

impl WebSocketClient {
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::new(make_json_encoding()),
            runtime: None,
            dial: None,
            has_spun_once: false,
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Register the required types and resolve the peer address. Returns
    /// false (after logging) on any configuration error.
    pub fn configure(
        &mut self,
        types: &RequiredTypes,
        configuration: &ConfigNode,
        registry: &TypeRegistry,
    ) -> bool {
        match self.try_configure(types, configuration, registry) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to configure the WebSocket client: {e}");
                false
            }
        }
    }

    fn try_configure(
        &mut self,
        types: &RequiredTypes,
        configuration: &ConfigNode,
        registry: &TypeRegistry,
    ) -> Result<()> {
        let cfg = config::load_from_value(configuration)?;

        if !self.endpoint.register_required_types(types, registry) {
            return Err(BridgeError::Config("missing required types".into()));
        }

        let port = cfg.parse_port()?;
        let host = cfg.host.clone().ok_or_else(|| {
            tracing::error!("Configuration is missing the required 'host' parameter");
            BridgeError::Config("missing 'host'".into())
        })?;

        let tls = cfg.use_security();
        let connector = if tls {
            let cert = match cfg.cert.as_deref() {
                Some(path) => Some(cfg.resolve_config_path(path)?),
                None => None,
            };
            tls::make_connector(cert.as_deref(), cfg.format)?
        } else {
            None
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Transport(format!("failed to start runtime: {e}")))?;

        self.dial = Some(DialConfig {
            host,
            port,
            tls,
            connector,
            token: cfg.token.clone(),
        });
        self.runtime = Some(runtime);
        Ok(())
    }

    pub fn okay(&self) -> bool {
        self.runtime.is_some() && !self.endpoint.is_closing_down()
    }

    /// One cooperative scheduling step: dials the peer on the first call,
    /// then sleeps briefly.
    pub fn spin_once(&mut self) -> bool {
        if !self.has_spun_once {
            self.has_spun_once = true;
            if let (Some(runtime), Some(dial)) = (self.runtime.as_ref(), self.dial.take()) {
                let endpoint = self.endpoint.clone();
                runtime.spawn(async move {
                    if let Err(e) = run_client(dial, endpoint.clone()).await {
                        endpoint.handle_failed_connection();
                        tracing::warn!("Client connection ended: {e}");
                    }
                });
            }
        }

        std::thread::sleep(SPIN_SLEEP);
        self.okay()
    }
}

impl Default for WebSocketClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        self.endpoint.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(2));
        }
    }
}
