//! Discovery manifest and content type negotiation.
//!
//! The manifest enumerates the services registered on an endpoint, their
//! handlers and the protocol mode the endpoint speaks. It is serialized as
//! JSON for version 1 of the discovery protocol.

use serde::{Deserialize, Serialize};

/// Content type of the invocation protocol, carried in the request
/// `content-type` header.
pub const INVOCATION_CONTENT_TYPE_V1: &str = "application/vnd.restate.invocation.v1";

/// Content type of the discovery manifest, negotiated via the `accept` header.
pub const DISCOVERY_CONTENT_TYPE_V1: &str = "application/vnd.restate.endpointmanifest.v1+json";

pub const MIN_SERVICE_PROTOCOL_VERSION: u32 = 1;
pub const MAX_SERVICE_PROTOCOL_VERSION: u32 = 1;

/// Returns true if the given `accept` header value is satisfied by the v1
/// manifest. An absent or wildcard accept header is satisfied too.
pub fn accepts_discovery_v1(accept: Option<&str>) -> bool {
    match accept {
        None => true,
        Some(accept) => accept
            .split(',')
            .map(|part| part.split(';').next().unwrap_or_default().trim())
            .any(|media| {
                media == DISCOVERY_CONTENT_TYPE_V1
                    || media == "application/json"
                    || media == "*/*"
            }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolMode {
    BidiStream,
    RequestResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Unkeyed,
    Keyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerManifest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceManifest {
    pub name: String,
    pub kind: ServiceType,
    pub handlers: Vec<HandlerManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointManifest {
    pub protocol_mode: ProtocolMode,
    pub min_protocol_version: u32,
    pub max_protocol_version: u32,
    pub services: Vec<ServiceManifest>,
}

impl EndpointManifest {
    pub fn new(protocol_mode: ProtocolMode, services: Vec<ServiceManifest>) -> Self {
        Self {
            protocol_mode,
            min_protocol_version: MIN_SERVICE_PROTOCOL_VERSION,
            max_protocol_version: MAX_SERVICE_PROTOCOL_VERSION,
            services,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn manifest_json_shape() {
        let manifest = EndpointManifest::new(
            ProtocolMode::BidiStream,
            vec![ServiceManifest {
                name: "Greeter".to_string(),
                kind: ServiceType::Keyed,
                handlers: vec![HandlerManifest {
                    name: "greet".to_string(),
                }],
            }],
        );

        assert_eq!(
            serde_json::to_value(&manifest).unwrap(),
            json!({
                "protocolMode": "BIDI_STREAM",
                "minProtocolVersion": 1,
                "maxProtocolVersion": 1,
                "services": [{
                    "name": "Greeter",
                    "kind": "KEYED",
                    "handlers": [{"name": "greet"}]
                }]
            })
        );
    }

    #[test]
    fn accept_negotiation() {
        assert!(accepts_discovery_v1(None));
        assert!(accepts_discovery_v1(Some(DISCOVERY_CONTENT_TYPE_V1)));
        assert!(accepts_discovery_v1(Some("application/json")));
        assert!(accepts_discovery_v1(Some("*/*")));
        assert!(accepts_discovery_v1(Some(
            "application/vnd.restate.endpointmanifest.v1+json; charset=utf-8, text/plain"
        )));
        assert!(!accepts_discovery_v1(Some(
            "application/vnd.restate.endpointmanifest.v9+json"
        )));
    }
}
