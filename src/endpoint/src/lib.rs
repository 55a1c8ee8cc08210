//! HTTP endpoint hosting Restate services: service registry, routing,
//! discovery and the transport adapters feeding the invocation core.

mod handler;
mod identity;
mod options;
mod server;
mod service;

pub use handler::Handler;
pub use identity::{IdentityVerificationError, PassThroughIdentityVerifier, RequestIdentityVerifier};
pub use options::EndpointOptions;
pub use server::{EndpointServerError, HyperServerEndpoint, StartSignal};
pub use service::{Service, ServiceBuilder};

pub use restate_sdk_core::{Awakeable, Context, InvocationHandler, TerminalError};
pub use restate_sdk_service_protocol::discovery::{ProtocolMode, ServiceType};

use restate_sdk_service_protocol::discovery::EndpointManifest;
use std::collections::HashMap;
use std::sync::Arc;

/// A set of services served from one HTTP endpoint.
pub struct Endpoint {
    services: HashMap<String, Service>,
    options: EndpointOptions,
    identity_verifier: Arc<dyn RequestIdentityVerifier>,
}

impl Endpoint {
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder {
            services: HashMap::new(),
            options: EndpointOptions::default(),
            identity_verifier: Arc::new(PassThroughIdentityVerifier),
        }
    }

    pub fn options(&self) -> &EndpointOptions {
        &self.options
    }

    pub fn manifest(&self) -> EndpointManifest {
        let mut services: Vec<_> = self.services.values().map(Service::manifest).collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        EndpointManifest::new(self.options.protocol_mode(), services)
    }

    pub(crate) fn resolve(
        &self,
        service_name: &str,
        handler_name: &str,
    ) -> Option<Arc<dyn restate_sdk_core::InvocationHandler>> {
        self.services.get(service_name)?.resolve(handler_name)
    }

    pub(crate) fn verify_identity(
        &self,
        headers: &http::HeaderMap,
    ) -> Result<(), IdentityVerificationError> {
        self.identity_verifier.verify(headers)
    }
}

pub struct EndpointBuilder {
    services: HashMap<String, Service>,
    options: EndpointOptions,
    identity_verifier: Arc<dyn RequestIdentityVerifier>,
}

impl EndpointBuilder {
    /// Registers a service on this endpoint. Binding a service with an
    /// already registered name replaces the previous one.
    pub fn bind(mut self, service: Service) -> Self {
        self.services.insert(service.name().to_string(), service);
        self
    }

    pub fn options(mut self, options: EndpointOptions) -> Self {
        self.options = options;
        self
    }

    pub fn identity_verifier(
        mut self,
        identity_verifier: impl RequestIdentityVerifier + 'static,
    ) -> Self {
        self.identity_verifier = Arc::new(identity_verifier);
        self
    }

    pub fn build(self) -> Endpoint {
        Endpoint {
            services: self.services,
            options: self.options,
            identity_verifier: self.identity_verifier,
        }
    }
}
