use crate::{Endpoint, Handler};

use futures::FutureExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower::make::Shared;
use tracing::info;

pub type StartSignal = oneshot::Receiver<SocketAddr>;

#[derive(Debug, thiserror::Error)]
pub enum EndpointServerError {
    #[error("failed binding to address '{address}' specified in the endpoint options")]
    Binding {
        address: SocketAddr,
        #[source]
        source: hyper::Error,
    },
    #[error("error while running the endpoint server: {0}")]
    Running(#[from] hyper::Error),
}

/// Serves an [`Endpoint`] over HTTP, with graceful shutdown through a drain
/// signal. The start signal resolves with the bound address once the server
/// is listening, which is convenient with port 0.
pub struct HyperServerEndpoint {
    listening_addr: SocketAddr,
    endpoint: Arc<Endpoint>,

    // Signals
    start_signal_tx: oneshot::Sender<SocketAddr>,
}

impl HyperServerEndpoint {
    pub fn new(listening_addr: SocketAddr, endpoint: Endpoint) -> (Self, StartSignal) {
        let (start_signal_tx, start_signal_rx) = oneshot::channel();

        let server = Self {
            listening_addr,
            endpoint: Arc::new(endpoint),
            start_signal_tx,
        };

        (server, start_signal_rx)
    }

    pub async fn run(self, drain: drain::Watch) -> Result<(), EndpointServerError> {
        let HyperServerEndpoint {
            listening_addr,
            endpoint,
            start_signal_tx,
        } = self;

        let server_builder = hyper::Server::try_bind(&listening_addr).map_err(|err| {
            EndpointServerError::Binding {
                address: listening_addr,
                source: err,
            }
        })?;

        let make_svc = Shared::new(Handler::new(endpoint));
        let server = server_builder.serve(make_svc);

        info!(
            net.host.addr = %server.local_addr().ip(),
            net.host.port = %server.local_addr().port(),
            "Endpoint listening"
        );

        // future completion does not affect endpoint
        let _ = start_signal_tx.send(server.local_addr());

        server
            .with_graceful_shutdown(drain.signaled().map(|_| ()))
            .await
            .map_err(EndpointServerError::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{EndpointOptions, Service};
    use bytes::Bytes;
    use hyper::Body;
    use restate_sdk_core::{Context, TerminalError};
    use restate_sdk_test_util::{assert_eq, test};

    async fn echo(_ctx: Context, input: Bytes) -> Result<Bytes, TerminalError> {
        Ok(input)
    }

    #[test(tokio::test)]
    async fn serve_and_discover() {
        let (drain_signal, watch) = drain::channel();

        let endpoint = crate::Endpoint::builder()
            .bind(Service::unkeyed("Echo").handler("echo", echo).build())
            .options(EndpointOptions::default())
            .build();
        let (server, start_signal) =
            HyperServerEndpoint::new("127.0.0.1:0".parse().unwrap(), endpoint);
        let server_handle = tokio::spawn(server.run(watch));

        let address = start_signal.await.unwrap();

        let response = hyper::Client::new()
            .request(
                hyper::Request::post(format!("http://{address}/discover"))
                    .header(http::header::ACCEPT, "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(manifest["services"][0]["name"], "Echo");

        drain_signal.drain().await;
        server_handle.await.unwrap().unwrap();
    }
}
