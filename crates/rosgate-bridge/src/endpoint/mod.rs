//! The stateful bridge between the local bus and N remote connections.
//!
//! The endpoint owns every per-connection table: which remote connections
//! advertise or listen on which topics, which connection provides which
//! service, and which outbound service calls are still in flight. All table
//! mutations are serialized under one endpoint-wide mutex because the
//! transport's I/O tasks and the host bus's threads call in concurrently.
//!
//! User callbacks (subscription and request callbacks) are always invoked
//! with the mutex released.

mod client;
mod connection;
mod server;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_yaml::Value as ConfigNode;

use rosgate_core::dynamic::{DynType, DynValue, TypeRegistry};
use rosgate_core::protocol::canonicalize_type_name;

use crate::bus::{
    CallHandle, RequestCallback, RequiredTypes, ServiceClient, ServiceProvider,
    SubscriptionCallback, TopicPublisher,
};
use crate::encoding::EncodingPtr;

pub use client::WebSocketClient;
pub use connection::{ConnectionHandle, ConnectionState, WireOut};
pub use server::WebSocketServer;

/// How long endpoint shutdown waits for peers to acknowledge close.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
/// Poll interval of the shutdown wait loop.
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// A local subscription on one topic.
struct TopicSubscribeInfo {
    type_name: String,
    callback: SubscriptionCallback,
    /// Connections whose publications we ignore because their message type
    /// does not match the one we expect.
    blacklist: HashSet<ConnectionHandle>,
}

/// Remote listeners on one topic.
#[derive(Default)]
struct TopicPublishInfo {
    type_name: String,
    /// Map from connection handle to that connection's listener ids.
    listeners: HashMap<ConnectionHandle, HashSet<String>>,
    /// Connections whose subscription declared an incompatible type; the
    /// publish fan-out skips them.
    incompatible: HashSet<ConnectionHandle>,
}

/// A local service exposed to remote callers.
struct ClientProxyInfo {
    #[allow(dead_code)]
    req_type: String,
    reply_type: String,
    callback: RequestCallback,
    #[allow(dead_code)]
    configuration: ConfigNode,
}

/// The remote connection currently providing a service.
struct ServiceProviderInfo {
    req_type: String,
    #[allow(dead_code)]
    reply_type: String,
    connection_handle: ConnectionHandle,
    #[allow(dead_code)]
    configuration: ConfigNode,
}

/// One in-flight outbound service call, keyed by its decimal call id.
struct ServiceRequestInfo {
    client: Arc<dyn ServiceClient>,
    call_handle: CallHandle,
    connection_handle: ConnectionHandle,
}

/// Identifies an inbound service call so the local service implementation can
/// answer through `Endpoint::receive_response`.
struct InboundServiceCall {
    service: String,
    reply_type: String,
    id: String,
    connection_handle: ConnectionHandle,
}

#[derive(Default)]
struct EndpointState {
    startup_messages: Vec<String>,
    /// topic -> canonical type, for topics advertised by the local side.
    advertised_topic_types: HashMap<String, String>,
    topic_subscribe_info: HashMap<String, TopicSubscribeInfo>,
    topic_publish_info: HashMap<String, TopicPublishInfo>,
    client_proxy_info: HashMap<String, ClientProxyInfo>,
    service_provider_info: HashMap<String, ServiceProviderInfo>,
    service_request_info: HashMap<String, ServiceRequestInfo>,
    open_connections: HashMap<u64, ConnectionHandle>,
    next_service_call_id: u64,
    next_connection_id: u64,
    closing_down: bool,
    shutdown_deadline: Duration,
    shutdown_poll: Duration,
}

/// The WebSocket endpoint core, shared by the server and client roles.
pub struct Endpoint {
    weak_self: Weak<Endpoint>,
    encoding: EncodingPtr,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    pub fn new(encoding: EncodingPtr) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            encoding,
            state: Mutex::new(EndpointState {
                shutdown_deadline: SHUTDOWN_DEADLINE,
                shutdown_poll: SHUTDOWN_POLL,
                ..EndpointState::default()
            }),
        })
    }

    pub fn encoding(&self) -> &EncodingPtr {
        &self.encoding
    }

    /// Register the types the bus requires with the encoding.
    pub fn register_required_types(&self, types: &RequiredTypes, registry: &TypeRegistry) -> bool {
        let mut ok = true;
        for name in types.messages.iter().chain(types.services.iter()) {
            match registry.get(name) {
                Some(ty) => {
                    self.encoding.add_type(ty.clone(), name);
                }
                None => {
                    tracing::error!("Required type '{name}' is not in the host type registry");
                    ok = false;
                }
            }
        }
        ok
    }

    /// Override the shutdown deadline and poll interval (tests shrink them).
    pub fn set_shutdown_timing(&self, deadline: Duration, poll: Duration) {
        let mut state = self.state.lock();
        state.shutdown_deadline = deadline;
        state.shutdown_poll = poll;
    }

    pub(crate) fn allocate_connection_id(&self) -> u64 {
        let mut state = self.state.lock();
        state.next_connection_id += 1;
        state.next_connection_id
    }

    pub fn is_closing_down(&self) -> bool {
        self.state.lock().closing_down
    }

    pub fn open_connection_count(&self) -> usize {
        self.state.lock().open_connections.len()
    }

    // ------------------------------------------------------------------
    // Host-bus contract
    // ------------------------------------------------------------------

    /// Register a local subscription. Inbound publications on `topic_name`
    /// whose connection is not blacklisted invoke `callback`.
    pub fn subscribe(
        &self,
        topic_name: &str,
        message_type: &Arc<DynType>,
        callback: SubscriptionCallback,
        _configuration: &ConfigNode,
    ) -> bool {
        let type_name = canonicalize_type_name(message_type.name());

        // Record the topic binding so inbound publications can be decoded.
        if let Err(e) = self
            .encoding
            .encode_subscribe_msg(topic_name, &type_name, "")
        {
            tracing::error!("Failed to record subscription for topic '{topic_name}': {e}");
            return false;
        }

        let mut state = self.state.lock();
        state.topic_subscribe_info.insert(
            topic_name.to_string(),
            TopicSubscribeInfo {
                type_name,
                callback,
                blacklist: HashSet::new(),
            },
        );
        true
    }

    /// Advertise a topic to every current and future connection and return a
    /// publisher proxy for it.
    pub fn advertise(
        &self,
        topic_name: &str,
        message_type: &Arc<DynType>,
        configuration: &ConfigNode,
    ) -> TopicPublisher {
        self.startup_advertisement(topic_name, message_type, "", configuration);
        TopicPublisher::new(topic_name.to_string(), self.weak_self.clone())
    }

    /// Register a local service server exposed to remote `call_service`.
    pub fn create_client_proxy(
        &self,
        service_name: &str,
        request_type: &Arc<DynType>,
        reply_type: Option<&Arc<DynType>>,
        callback: RequestCallback,
        configuration: &ConfigNode,
    ) -> bool {
        let req_type = canonicalize_type_name(request_type.name());
        let reply_type = canonicalize_type_name(reply_type.unwrap_or(request_type).name());

        // Record the service bindings so inbound requests can be decoded.
        if let Err(e) =
            self.encoding
                .encode_advertise_service_msg(service_name, &req_type, &reply_type)
        {
            tracing::error!("Failed to record service bindings for '{service_name}': {e}");
            return false;
        }

        let mut state = self.state.lock();
        state.client_proxy_info.insert(
            service_name.to_string(),
            ClientProxyInfo {
                req_type,
                reply_type,
                callback,
                configuration: configuration.clone(),
            },
        );
        true
    }

    /// Return a proxy that forwards local service calls to whichever remote
    /// connection currently provides `service_name`.
    pub fn create_service_proxy(
        &self,
        service_name: &str,
        _request_type: &Arc<DynType>,
        _reply_type: Option<&Arc<DynType>>,
        _configuration: &ConfigNode,
    ) -> ServiceProvider {
        ServiceProvider::new(service_name.to_string(), self.weak_self.clone())
    }

    /// Fan one message out to every live listener on `topic_name`: one
    /// `publish` frame per listener id, per connection. No cross-connection
    /// ordering is defined.
    pub fn publish(&self, topic_name: &str, message: &DynValue) -> bool {
        let type_name = canonicalize_type_name(message.type_name());

        let state = self.state.lock();
        let Some(info) = state.topic_publish_info.get(topic_name) else {
            tracing::debug!("No remote listeners on topic '{topic_name}'");
            return true;
        };

        for (connection, ids) in &info.listeners {
            if info.incompatible.contains(connection) {
                continue;
            }
            for id in ids {
                match self
                    .encoding
                    .encode_publication_msg(topic_name, &type_name, id, message)
                {
                    Ok(frame) => connection.send(frame),
                    Err(e) => {
                        tracing::error!(
                            "Failed to encode publication message for topic '{topic_name}': {e}"
                        );
                    }
                }
            }
        }
        true
    }

    /// Dispatch a local service call to the connection of the known provider.
    /// The call is stored under a fresh decimal call id until its response
    /// arrives or the provider's connection closes.
    pub fn call_service(
        &self,
        service: &str,
        request: &DynValue,
        client: Arc<dyn ServiceClient>,
        call_handle: CallHandle,
    ) {
        let mut state = self.state.lock();
        let Some(provider) = state.service_provider_info.get(service) else {
            tracing::error!("No known provider for service '{service}'; dropping call");
            return;
        };
        let connection = provider.connection_handle.clone();
        let req_type = provider.req_type.clone();

        state.next_service_call_id = state.next_service_call_id.wrapping_add(1);
        let id = state.next_service_call_id.to_string();

        state.service_request_info.insert(
            id.clone(),
            ServiceRequestInfo {
                client,
                call_handle,
                connection_handle: connection.clone(),
            },
        );

        match self
            .encoding
            .encode_call_service_msg(service, &req_type, request, &id)
        {
            Ok(frame) => connection.send(frame),
            Err(e) => {
                tracing::error!("Failed to encode service request for '{service}': {e}");
                state.service_request_info.remove(&id);
            }
        }
    }

    /// Append one advertise frame to the startup queue; it is replayed to
    /// every connection as it opens, in append order.
    pub fn startup_advertisement(
        &self,
        topic: &str,
        message_type: &Arc<DynType>,
        id: &str,
        _configuration: &ConfigNode,
    ) {
        match self
            .encoding
            .encode_advertise_msg(topic, message_type.name(), id)
        {
            Ok(frame) => {
                let mut state = self.state.lock();
                state.startup_messages.push(frame);
                state.advertised_topic_types.insert(
                    topic.to_string(),
                    canonicalize_type_name(message_type.name()),
                );
            }
            Err(e) => {
                tracing::error!("Failed to encode advertisement for topic '{topic}': {e}");
            }
        }
    }

    /// Broadcast an advertise frame to every currently open connection, in
    /// addition to queueing it for future ones. Used for topic names that are
    /// only resolved at runtime.
    pub fn runtime_advertisement(
        &self,
        topic: &str,
        message_type: &Arc<DynType>,
        id: &str,
        _configuration: &ConfigNode,
    ) {
        match self
            .encoding
            .encode_advertise_msg(topic, message_type.name(), id)
        {
            Ok(frame) => {
                let mut state = self.state.lock();
                state.startup_messages.push(frame.clone());
                for connection in state.open_connections.values() {
                    connection.send(frame.clone());
                }
            }
            Err(e) => {
                tracing::error!("Failed to encode advertisement for topic '{topic}': {e}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport contract
    // ------------------------------------------------------------------

    /// A connection finished its handshake. Replays the startup queue to it
    /// (before any frame produced by later activity) and adds it to the open
    /// set. Refused with a "shutdown" close when the endpoint is closing.
    pub fn handle_connection_opened(&self, connection: &ConnectionHandle) {
        let mut state = self.state.lock();
        if state.closing_down {
            drop(state);
            connection.close("shutdown");
            return;
        }

        connection.set_state(ConnectionState::Open);

        for frame in &state.startup_messages {
            connection.send(frame.clone());
        }

        state
            .open_connections
            .insert(connection.id(), connection.clone());

        tracing::info!(
            "Opened connection with ID '{}'. Number of active connections: {}",
            connection.id(),
            state.open_connections.len()
        );
    }

    /// A connection closed. Purges every per-connection table entry; lookups
    /// for this handle afterwards find nothing and must tolerate that.
    pub fn handle_connection_closed(&self, connection: &ConnectionHandle) {
        let mut state = self.state.lock();

        connection.set_state(ConnectionState::Closing);
        state.open_connections.remove(&connection.id());

        // Notify exactly once, before the purges.
        tracing::info!(
            "Closed connection with ID '{}'. Now, {} connections remain active",
            connection.id(),
            state.open_connections.len()
        );

        state.topic_publish_info.retain(|_, info| {
            info.listeners.remove(connection);
            info.incompatible.remove(connection);
            !info.listeners.is_empty() || !info.incompatible.is_empty()
        });

        for info in state.topic_subscribe_info.values_mut() {
            info.blacklist.remove(connection);
        }

        state
            .service_provider_info
            .retain(|_, info| info.connection_handle != *connection);

        // In-flight calls to this provider are implicitly cancelled; the
        // local client observes the drop through its own timeout policy.
        state
            .service_request_info
            .retain(|_, info| info.connection_handle != *connection);

        connection.set_state(ConnectionState::Closed);
    }

    /// One raw inbound payload. Decoding and dispatch never fail the
    /// connection.
    pub fn handle_message(&self, connection: &ConnectionHandle, payload: &str) {
        self.encoding
            .interpret_websocket_msg(payload, self, connection);
    }

    /// A connection attempt failed before opening.
    pub fn handle_failed_connection(&self) {
        tracing::warn!("An incoming client failed to connect.");
    }

    // ------------------------------------------------------------------
    // Inbound events (invoked by the encoding)
    // ------------------------------------------------------------------

    /// A remote peer advertised `topic_name`: remember it as a listener, and
    /// blacklist it for our local subscription when the types disagree.
    pub fn receive_topic_advertisement(
        &self,
        topic_name: &str,
        message_type: &Arc<DynType>,
        id: &str,
        connection_handle: &ConnectionHandle,
    ) {
        let type_name = canonicalize_type_name(message_type.name());
        let mut state = self.state.lock();

        let info = state
            .topic_publish_info
            .entry(topic_name.to_string())
            .or_default();
        if info.type_name.is_empty() {
            info.type_name = type_name.clone();
        }
        info.listeners
            .entry(connection_handle.clone())
            .or_default()
            .insert(id.to_string());

        if let Some(sub) = state.topic_subscribe_info.get_mut(topic_name) {
            if sub.type_name != type_name {
                tracing::warn!(
                    "Remote connection '{}' advertised topic '{topic_name}' with type \
                     '{type_name}', but the local subscription expects '{}'; ignoring its \
                     publications",
                    connection_handle.id(),
                    sub.type_name
                );
                sub.blacklist.insert(connection_handle.clone());
            } else {
                sub.blacklist.remove(connection_handle);
            }
        }
    }

    /// A remote peer withdrew an advertisement. Empty listener sets and empty
    /// topics are pruned.
    pub fn receive_topic_unadvertisement(
        &self,
        topic_name: &str,
        id: &str,
        connection_handle: &ConnectionHandle,
    ) {
        let mut state = self.state.lock();
        let Some(info) = state.topic_publish_info.get_mut(topic_name) else {
            return;
        };

        if let Some(ids) = info.listeners.get_mut(connection_handle) {
            if id.is_empty() {
                ids.clear();
            } else {
                ids.remove(id);
            }
            if ids.is_empty() {
                info.listeners.remove(connection_handle);
            }
        }

        if info.listeners.is_empty() && info.incompatible.is_empty() {
            state.topic_publish_info.remove(topic_name);
        }
    }

    /// A remote publication. Invokes the local subscription callback unless
    /// the connection is blacklisted for this topic.
    pub fn receive_publication(
        &self,
        topic_name: &str,
        message: DynValue,
        connection_handle: &ConnectionHandle,
    ) {
        let callback = {
            let state = self.state.lock();
            let Some(sub) = state.topic_subscribe_info.get(topic_name) else {
                return;
            };
            if sub.blacklist.contains(connection_handle) {
                return;
            }
            sub.callback.clone()
        };
        callback(message);
    }

    /// A remote peer wants publications on `topic_name`. The listener is
    /// recorded; a conflicting declared type marks the connection
    /// incompatible so the fan-out skips it.
    pub fn receive_subscribe_request(
        &self,
        topic_name: &str,
        message_type: Option<&Arc<DynType>>,
        id: &str,
        connection_handle: &ConnectionHandle,
    ) {
        let requested = message_type.map(|ty| canonicalize_type_name(ty.name()));
        let mut state = self.state.lock();

        let advertised = state.advertised_topic_types.get(topic_name).cloned();
        let info = state
            .topic_publish_info
            .entry(topic_name.to_string())
            .or_default();

        if info.type_name.is_empty() {
            if let Some(known) = advertised.clone().or_else(|| requested.clone()) {
                info.type_name = known;
            }
        }

        info.listeners
            .entry(connection_handle.clone())
            .or_default()
            .insert(id.to_string());

        match requested {
            Some(requested) if !info.type_name.is_empty() && requested != info.type_name => {
                tracing::warn!(
                    "Remote connection '{}' subscribed to topic '{topic_name}' with type \
                     '{requested}', but the topic is known as '{}'; it will not receive \
                     publications",
                    connection_handle.id(),
                    info.type_name
                );
                info.incompatible.insert(connection_handle.clone());
            }
            _ => {
                info.incompatible.remove(connection_handle);
            }
        }
    }

    /// A remote peer no longer wants publications on `topic_name`.
    pub fn receive_unsubscribe_request(
        &self,
        topic_name: &str,
        id: &str,
        connection_handle: &ConnectionHandle,
    ) {
        self.receive_topic_unadvertisement(topic_name, id, connection_handle);
    }

    /// A remote service request for a locally provided service.
    pub fn receive_service_request(
        &self,
        service_name: &str,
        request: DynValue,
        id: &str,
        connection_handle: &ConnectionHandle,
    ) {
        let (callback, reply_type) = {
            let state = self.state.lock();
            let Some(proxy) = state.client_proxy_info.get(service_name) else {
                tracing::error!(
                    "Received a request for the unknown service '{service_name}'; dropping"
                );
                return;
            };
            (proxy.callback.clone(), proxy.reply_type.clone())
        };

        let Some(endpoint) = self.weak_self.upgrade() else {
            return;
        };
        let call_handle: CallHandle = Arc::new(InboundServiceCall {
            service: service_name.to_string(),
            reply_type,
            id: id.to_string(),
            connection_handle: connection_handle.clone(),
        });

        callback(request, endpoint, call_handle);
    }

    /// A remote peer advertised a service. A later advertisement replaces any
    /// prior provider for the same name.
    pub fn receive_service_advertisement(
        &self,
        service_name: &str,
        req_type: &Arc<DynType>,
        reply_type: &Arc<DynType>,
        connection_handle: &ConnectionHandle,
    ) {
        let mut state = self.state.lock();
        state.service_provider_info.insert(
            service_name.to_string(),
            ServiceProviderInfo {
                req_type: canonicalize_type_name(req_type.name()),
                reply_type: canonicalize_type_name(reply_type.name()),
                connection_handle: connection_handle.clone(),
                configuration: ConfigNode::Null,
            },
        );
    }

    /// A remote peer withdrew a service, but only if it is the current
    /// provider.
    pub fn receive_service_unadvertisement(
        &self,
        service_name: &str,
        _service_type: Option<&Arc<DynType>>,
        connection_handle: &ConnectionHandle,
    ) {
        let mut state = self.state.lock();
        if let Some(info) = state.service_provider_info.get(service_name) {
            if info.connection_handle == *connection_handle {
                state.service_provider_info.remove(service_name);
            }
        }
    }

    /// A response for an in-flight outbound call. The stored client receives
    /// it and the entry is removed.
    pub fn receive_service_response(
        &self,
        service_name: &str,
        response: DynValue,
        id: &str,
        _connection_handle: &ConnectionHandle,
    ) {
        let Some(info) = self.state.lock().service_request_info.remove(id) else {
            tracing::warn!(
                "Received a response with unknown id '{id}' for service '{service_name}'"
            );
            return;
        };
        info.client.receive_response(info.call_handle, response);
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Instruct every open connection to close with reason "shutdown", then
    /// wait (polling) for all of them to reach `Closed`. Logged and abandoned
    /// after the deadline; shutdown proceeds anyway.
    pub fn shutdown(&self) {
        let (connections, deadline, poll) = {
            let mut state = self.state.lock();
            state.closing_down = true;
            (
                state.open_connections.values().cloned().collect::<Vec<_>>(),
                state.shutdown_deadline,
                state.shutdown_poll,
            )
        };

        for connection in &connections {
            connection.close("shutdown");
        }

        let start = Instant::now();
        while !connections
            .iter()
            .all(|c| c.state() == ConnectionState::Closed)
        {
            std::thread::sleep(poll);
            if start.elapsed() > deadline {
                tracing::error!(
                    "Timed out while waiting for the remote clients to acknowledge the \
                     connection shutdown request"
                );
                break;
            }
        }
    }
}

impl ServiceClient for Endpoint {
    /// Deliver a locally produced response for a call that arrived from a
    /// remote connection: encode it and send it back where the request came
    /// from.
    fn receive_response(&self, call_handle: CallHandle, response: DynValue) {
        let Ok(call) = call_handle.downcast::<InboundServiceCall>() else {
            tracing::error!("receive_response was handed a foreign call handle; dropping");
            return;
        };

        match self.encoding.encode_service_response_msg(
            &call.service,
            &call.reply_type,
            &call.id,
            &response,
            true,
        ) {
            Ok(frame) => call.connection_handle.send(frame),
            Err(e) => {
                tracing::error!(
                    "Failed to encode service response for '{}': {e}",
                    call.service
                );
            }
        }
    }
}
