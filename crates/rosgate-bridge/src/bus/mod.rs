//! Host-bus contracts.
//!
//! The endpoint plugs into a dynamically-typed integration bus that supplies
//! the type registry and the pub/sub and service primitives. This module
//! defines exactly the surface the bridge consumes from (and hands back to)
//! that bus; the bus implementation itself lives outside this repository.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use rosgate_core::dynamic::DynValue;

use crate::endpoint::Endpoint;

/// Type names the bus requires this system to know before it starts.
#[derive(Debug, Default, Clone)]
pub struct RequiredTypes {
    pub messages: BTreeSet<String>,
    pub services: BTreeSet<String>,
}

/// Callback invoked for each inbound publication on a subscribed topic.
pub type SubscriptionCallback = Arc<dyn Fn(DynValue) + Send + Sync>;

/// Opaque handle identifying one in-flight service call on the bus side.
pub type CallHandle = Arc<dyn Any + Send + Sync>;

/// The bus-side party that receives service responses.
///
/// The endpoint itself implements this for calls that originate remotely: the
/// local service implementation answers through it and the response is encoded
/// back onto the connection the request came from.
pub trait ServiceClient: Send + Sync {
    fn receive_response(&self, call_handle: CallHandle, response: DynValue);
}

/// Callback invoked for each inbound remote service request.
pub type RequestCallback = Arc<dyn Fn(DynValue, Arc<dyn ServiceClient>, CallHandle) + Send + Sync>;

/// Publisher proxy returned by `advertise`. Publishing forwards to the
/// endpoint, which fans the message out to every live remote listener.
///
/// Proxies hold the endpoint weakly: the endpoint outlives its connections by
/// construction, and a proxy that survives the endpoint becomes a no-op.
pub struct TopicPublisher {
    topic: String,
    endpoint: Weak<Endpoint>,
}

impl TopicPublisher {
    pub(crate) fn new(topic: String, endpoint: Weak<Endpoint>) -> Self {
        Self { topic, endpoint }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn publish(&self, message: &DynValue) -> bool {
        match self.endpoint.upgrade() {
            Some(endpoint) => endpoint.publish(&self.topic, message),
            None => false,
        }
    }
}

/// Service proxy returned by `create_service_proxy`. Invoking it forwards the
/// request to whichever remote connection currently provides the service.
pub struct ServiceProvider {
    service: String,
    endpoint: Weak<Endpoint>,
}

impl ServiceProvider {
    pub(crate) fn new(service: String, endpoint: Weak<Endpoint>) -> Self {
        Self { service, endpoint }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn call_service(
        &self,
        request: &DynValue,
        client: Arc<dyn ServiceClient>,
        call_handle: CallHandle,
    ) {
        if let Some(endpoint) = self.endpoint.upgrade() {
            endpoint.call_service(&self.service, request, client, call_handle);
        }
    }
}
