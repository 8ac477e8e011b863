//! The server role: listens on a port and bridges many client connections.

use std::sync::Arc;
use std::time::Duration;

use serde_yaml::Value as ConfigNode;
use tokio::net::TcpListener;

use rosgate_core::dynamic::TypeRegistry;
use rosgate_core::{BridgeError, Result};

use crate::bus::RequiredTypes;
use crate::config::{self, EndpointConfig};
use crate::encoding::make_json_encoding;
use crate::endpoint::Endpoint;
use crate::policy::JwtValidator;
use crate::transport::server::{run_acceptor, Transport};
use crate::transport::tls;

/// Sleep applied by every `spin_once` call.
const SPIN_SLEEP: Duration = Duration::from_millis(100);

/// WebSocket server endpoint.
///
/// `configure` brings the listener up (TLS or TCP, per the `security` key)
/// and loads the JWT admission policies; the first `spin_once` call starts
/// accepting. All bus-facing operations (subscribe, advertise, publish,
/// service proxies) live on the shared [`Endpoint`] returned by
/// [`WebSocketServer::endpoint`].
pub struct WebSocketServer {
    endpoint: Arc<Endpoint>,
    runtime: Option<tokio::runtime::Runtime>,
    listener: Option<TcpListener>,
    transport: Option<Transport>,
    validator: Option<Arc<JwtValidator>>,
    has_spun_once: bool,
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self {
            endpoint: Endpoint::new(make_json_encoding()),
            runtime: None,
            listener: None,
            transport: None,
            validator: None,
            has_spun_once: false,
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Register the required types, pick the transport flavor, and bind the
    /// listener. Returns false (after logging) on any configuration error.
    pub fn configure(
        &mut self,
        types: &RequiredTypes,
        configuration: &ConfigNode,
        registry: &TypeRegistry,
    ) -> bool {
        match self.try_configure(types, configuration, registry) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to configure the WebSocket server: {e}");
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

        let transport = if cfg.use_security() {
            self.configure_tls(&cfg)?
        } else {
            self.configure_tcp(&cfg)?
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Transport(format!("failed to start runtime: {e}")))?;

        let listener = runtime
            .block_on(TcpListener::bind(("0.0.0.0", port)))
            .map_err(|e| BridgeError::Transport(format!("failed to bind port {port}: {e}")))?;

        tracing::info!(
            "Initializing {} server on port {port}",
            if cfg.use_security() { "TLS" } else { "TCP" }
        );

        self.transport = Some(transport);
        self.listener = Some(listener);
        self.runtime = Some(runtime);
        Ok(())
    }

    fn configure_tls(&mut self, cfg: &EndpointConfig) -> Result<Transport> {
        let cert = cfg.cert.as_deref().ok_or_else(|| {
            BridgeError::Config(
                "you must specify a certificate file in your TLS server configuration".into(),
            )
        })?;
        let key = cfg.key.as_deref().ok_or_else(|| {
            BridgeError::Config(
                "you must specify a private key in your TLS server configuration".into(),
            )
        })?;

        let cert = cfg.resolve_config_path(cert)?;
        let key = cfg.resolve_config_path(key)?;
        tracing::debug!("Found certificate file: '{}'", cert.display());
        tracing::debug!("Found private key file: '{}'", key.display());

        self.load_validator(cfg);
        let acceptor = tls::make_acceptor(&cert, &key, cfg.format)?;
        Ok(Transport::Tls(acceptor))
    }

    fn configure_tcp(&mut self, cfg: &EndpointConfig) -> Result<Transport> {
        self.load_validator(cfg);
        Ok(Transport::Tcp)
    }

    fn load_validator(&mut self, cfg: &EndpointConfig) {
        self.validator = cfg.jwt_validator().map(Arc::new);
        if self.validator.is_some() {
            tracing::debug!("Loaded JWT admission policies");
        }
    }

    pub fn okay(&self) -> bool {
        self.runtime.is_some() && !self.endpoint.is_closing_down()
    }

    /// One cooperative scheduling step: starts accepting on the first call,
    /// then sleeps briefly.
    pub fn spin_once(&mut self) -> bool {
        if !self.has_spun_once {
            self.has_spun_once = true;
            if let (Some(runtime), Some(listener), Some(transport)) = (
                self.runtime.as_ref(),
                self.listener.take(),
                self.transport.clone(),
            ) {
                runtime.spawn(run_acceptor(
                    listener,
                    transport,
                    self.endpoint.clone(),
                    self.validator.clone(),
                ));
            }
        }

        std::thread::sleep(SPIN_SLEEP);
        self.okay()
    }
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        self.endpoint.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(2));
        }
    }
}
