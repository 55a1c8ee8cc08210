use restate_sdk_core::InvocationHandler;
use restate_sdk_service_protocol::discovery::{HandlerManifest, ServiceManifest, ServiceType};
use std::collections::HashMap;
use std::sync::Arc;

/// A named service with its handlers, as registered on the endpoint.
pub struct Service {
    name: String,
    ty: ServiceType,
    handlers: HashMap<String, Arc<dyn InvocationHandler>>,
}

impl Service {
    /// A service whose invocations are not addressed by key.
    pub fn unkeyed(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            ty: ServiceType::Unkeyed,
            handlers: HashMap::new(),
        }
    }

    /// A service whose state and invocation order are scoped by a key.
    pub fn keyed(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            ty: ServiceType::Keyed,
            handlers: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ServiceType {
        self.ty
    }

    pub(crate) fn resolve(&self, handler_name: &str) -> Option<Arc<dyn InvocationHandler>> {
        self.handlers.get(handler_name).cloned()
    }

    pub(crate) fn manifest(&self) -> ServiceManifest {
        let mut handlers: Vec<_> = self
            .handlers
            .keys()
            .map(|name| HandlerManifest { name: name.clone() })
            .collect();
        handlers.sort_by(|a, b| a.name.cmp(&b.name));
        ServiceManifest {
            name: self.name.clone(),
            kind: self.ty,
            handlers,
        }
    }
}

pub struct ServiceBuilder {
    name: String,
    ty: ServiceType,
    handlers: HashMap<String, Arc<dyn InvocationHandler>>,
}

impl ServiceBuilder {
    pub fn handler(
        mut self,
        name: impl Into<String>,
        handler: impl InvocationHandler,
    ) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Service {
        Service {
            name: self.name,
            ty: self.ty,
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use restate_sdk_core::{Context, TerminalError};

    async fn echo(_ctx: Context, input: Bytes) -> Result<Bytes, TerminalError> {
        Ok(input)
    }

    #[test]
    fn manifest_lists_handlers_sorted() {
        let service = Service::keyed("Counter")
            .handler("add", echo)
            .handler("get", echo)
            .build();

        let manifest = service.manifest();
        assert_eq!(manifest.name, "Counter");
        assert_eq!(manifest.kind, ServiceType::Keyed);
        assert_eq!(
            manifest
                .handlers
                .iter()
                .map(|h| h.name.as_str())
                .collect::<Vec<_>>(),
            vec!["add", "get"]
        );
    }

    #[test]
    fn resolve_unknown_handler_is_none() {
        let service = Service::unkeyed("Greeter").handler("greet", echo).build();
        assert!(service.resolve("greet").is_some());
        assert!(service.resolve("other").is_none());
    }
}
