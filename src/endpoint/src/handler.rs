//! Request routing and the transport adapters bridging HTTP bodies to the
//! invocation driver.

use crate::Endpoint;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use http::{header, Method, Request, Response, StatusCode, Version};
use hyper::Body;
use restate_sdk_core::{InvocationDriver, ProtocolMode, TransportError};
use restate_sdk_service_protocol::discovery::{
    accepts_discovery_v1, DISCOVERY_CONTENT_TYPE_V1, INVOCATION_CONTENT_TYPE_V1,
};
use std::fmt::Display;
use std::sync::Arc;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower::{BoxError, Service};
use tracing::debug;

const X_RESTATE_SERVER: &str = "x-restate-server";
const X_RESTATE_SERVER_VALUE: &str = concat!("restate-sdk-rust/", env!("CARGO_PKG_VERSION"));

/// The HTTP service of an endpoint. Routes `/invoke/<service>/<handler>` and
/// `/discover`; everything else is 404.
#[derive(Clone)]
pub struct Handler {
    endpoint: Arc<Endpoint>,
}

impl Handler {
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint }
    }
}

impl Service<Request<Body>> for Handler {
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Response<Body>, BoxError>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let endpoint = self.endpoint.clone();
        async move { Ok(handle(endpoint, req).await) }.boxed()
    }
}

pub(crate) async fn handle(endpoint: Arc<Endpoint>, req: Request<Body>) -> Response<Body> {
    if req.method() != Method::POST {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "only POST is supported");
    }

    let path = req.uri().path().to_owned();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        ["discover"] => {
            let accept = req
                .headers()
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok());
            discover(&endpoint, accept)
        }
        ["invoke", service_name, handler_name] => {
            let (service_name, handler_name) =
                (service_name.to_string(), handler_name.to_string());
            invoke(endpoint, service_name, handler_name, req).await
        }
        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

fn discover(endpoint: &Endpoint, accept: Option<&str>) -> Response<Body> {
    if !accepts_discovery_v1(accept) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "the endpoint only supports discovery manifest version 1",
        );
    }
    let body = serde_json::to_vec(&endpoint.manifest()).expect("the manifest serializes");
    response_builder(StatusCode::OK)
        .header(header::CONTENT_TYPE, DISCOVERY_CONTENT_TYPE_V1)
        .body(Body::from(body))
        .expect("the response builder cannot fail")
}

async fn invoke(
    endpoint: Arc<Endpoint>,
    service_name: String,
    handler_name: String,
    req: Request<Body>,
) -> Response<Body> {
    if let Err(err) = endpoint.verify_identity(req.headers()) {
        return error_response(StatusCode::UNAUTHORIZED, err);
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some(INVOCATION_CONTENT_TYPE_V1) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("unsupported invocation content type: {content_type:?}"),
        );
    }

    let Some(handler) = endpoint.resolve(&service_name, &handler_name) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("service handler '{service_name}/{handler_name}' not found"),
        );
    };

    let options = endpoint.options().driver_options();
    let bidi =
        options.protocol_mode == ProtocolMode::BidiStream && req.version() == Version::HTTP_2;
    let (output_tx, output_rx) = mpsc::unbounded_channel();
    let body = req.into_body();

    if bidi {
        let input = body.map_err(|e| Box::new(e) as TransportError);
        let driver = InvocationDriver::new(
            options,
            service_name,
            handler_name,
            handler,
            input,
            output_tx,
        );
        tokio::spawn(driver.run());

        let output = UnboundedReceiverStream::new(output_rx).map(Ok::<_, std::convert::Infallible>);
        invocation_response(Body::wrap_stream(output))
    } else {
        let request_bytes = match hyper::body::to_bytes(body).await {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!("Cannot read the invocation request body: {err}");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "cannot read the request body",
                );
            }
        };
        let input = futures::stream::iter(vec![Ok::<_, TransportError>(request_bytes)]);
        InvocationDriver::new(
            options,
            service_name,
            handler_name,
            handler,
            input,
            output_tx,
        )
        .run()
        .await;

        let mut output_rx = output_rx;
        let mut response_body = Vec::new();
        while let Ok(frame) = output_rx.try_recv() {
            response_body.extend_from_slice(&frame);
        }
        invocation_response(Body::from(response_body))
    }
}

fn invocation_response(body: Body) -> Response<Body> {
    response_builder(StatusCode::OK)
        .header(header::CONTENT_TYPE, INVOCATION_CONTENT_TYPE_V1)
        .body(body)
        .expect("the response builder cannot fail")
}

fn response_builder(status: StatusCode) -> http::response::Builder {
    Response::builder()
        .status(status)
        .header(X_RESTATE_SERVER, X_RESTATE_SERVER_VALUE)
}

fn error_response(status: StatusCode, message: impl Display) -> Response<Body> {
    let body = serde_json::json!({ "message": message.to_string() }).to_string();
    response_builder(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("the response builder cannot fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{EndpointOptions, IdentityVerificationError, RequestIdentityVerifier, Service};
    use bytes::{BufMut, Bytes, BytesMut};
    use restate_sdk_core::{Context, TerminalError};
    use restate_sdk_service_protocol::codec::ProtobufRawEntryCodec;
    use restate_sdk_service_protocol::message::{Decoder, Encoder, MessageType, ProtocolMessage};
    use restate_sdk_test_util::{assert, assert_eq, let_assert, test};
    use restate_sdk_types::journal::raw::RawEntryCodec;
    use restate_sdk_types::journal::{Entry, EntryResult};

    async fn greet(_ctx: Context, input: Bytes) -> Result<Bytes, TerminalError> {
        let mut out = b"Hello ".to_vec();
        out.extend_from_slice(&input);
        Ok(out.into())
    }

    fn test_endpoint(options: EndpointOptions) -> Arc<Endpoint> {
        Arc::new(
            Endpoint::builder()
                .bind(Service::unkeyed("Greeter").handler("greet", greet).build())
                .options(options)
                .build(),
        )
    }

    fn invocation_request_body() -> Body {
        let encoder = Encoder::new();
        let mut buf = BytesMut::new();
        buf.put(encoder.encode(ProtocolMessage::new_start_message(
            Bytes::from_static(b"abc123"),
            "inv-1".to_string(),
            1,
            Bytes::new(),
            true,
            vec![],
        )));
        buf.put(encoder.encode(ProtocolMessage::UnparsedEntry(
            ProtobufRawEntryCodec::serialize(Entry::input(Bytes::from_static(b"Till"))),
        )));
        Body::from(buf.freeze())
    }

    #[test(tokio::test)]
    async fn unknown_path_is_not_found() {
        let response = handle(
            test_endpoint(EndpointOptions::default()),
            Request::post("/something").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(X_RESTATE_SERVER));
    }

    #[test(tokio::test)]
    async fn wrong_method_is_rejected() {
        let response = handle(
            test_endpoint(EndpointOptions::default()),
            Request::get("/discover").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test(tokio::test)]
    async fn discover_returns_the_manifest() {
        let response = handle(
            test_endpoint(EndpointOptions::default()),
            Request::post("/discover")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            DISCOVERY_CONTENT_TYPE_V1
        );

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(manifest["protocolMode"], "BIDI_STREAM");
        assert_eq!(manifest["services"][0]["name"], "Greeter");
        assert_eq!(manifest["services"][0]["handlers"][0]["name"], "greet");
    }

    #[test(tokio::test)]
    async fn discover_with_unsupported_version_is_rejected() {
        let response = handle(
            test_endpoint(EndpointOptions::default()),
            Request::post("/discover")
                .header(
                    header::ACCEPT,
                    "application/vnd.restate.endpointmanifest.v9+json",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test(tokio::test)]
    async fn invoke_requires_the_invocation_content_type() {
        let response = handle(
            test_endpoint(EndpointOptions::default()),
            Request::post("/invoke/Greeter/greet")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test(tokio::test)]
    async fn invoke_unknown_service_is_not_found() {
        let response = handle(
            test_endpoint(EndpointOptions::default()),
            Request::post("/invoke/Unknown/greet")
                .header(header::CONTENT_TYPE, INVOCATION_CONTENT_TYPE_V1)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(error["message"].as_str().unwrap().contains("Unknown/greet"));
    }

    struct RejectAll;

    impl RequestIdentityVerifier for RejectAll {
        fn verify(&self, _: &http::HeaderMap) -> Result<(), IdentityVerificationError> {
            Err(IdentityVerificationError("bad signature".to_string()))
        }
    }

    #[test(tokio::test)]
    async fn invoke_with_rejected_identity_is_unauthorized() {
        let endpoint = Arc::new(
            Endpoint::builder()
                .bind(Service::unkeyed("Greeter").handler("greet", greet).build())
                .identity_verifier(RejectAll)
                .build(),
        );
        let response = handle(
            endpoint,
            Request::post("/invoke/Greeter/greet")
                .header(header::CONTENT_TYPE, INVOCATION_CONTENT_TYPE_V1)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test(tokio::test)]
    async fn request_response_invocation_roundtrip() {
        let options =
            EndpointOptions::default().with_protocol_mode(ProtocolMode::RequestResponse);
        let response = handle(
            test_endpoint(options),
            Request::post("/invoke/Greeter/greet")
                .header(header::CONTENT_TYPE, INVOCATION_CONTENT_TYPE_V1)
                .body(invocation_request_body())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            INVOCATION_CONTENT_TYPE_V1
        );
        assert_eq!(
            response.headers().get(X_RESTATE_SERVER).unwrap(),
            X_RESTATE_SERVER_VALUE
        );

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let mut decoder = Decoder::default();
        decoder.push(body);

        let (header, msg) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(header.message_type(), MessageType::OutputEntry);
        let_assert!(ProtocolMessage::UnparsedEntry(raw) = msg);
        let_assert!(Ok(Entry::Output(output)) = ProtobufRawEntryCodec::deserialize(&raw));
        assert_eq!(
            output.result,
            EntryResult::Success(Bytes::from_static(b"Hello Till"))
        );

        let (header, _) = decoder.consume_next().unwrap().unwrap();
        assert_eq!(header.message_type(), MessageType::End);
        assert!(decoder.consume_next().unwrap().is_none());
    }
}
