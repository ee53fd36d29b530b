//! HTTP exposition server.
//!
//! Serves `GET /metrics` (Prometheus text format 0.0.4) and `GET /health`
//! with `hyper`. A scrape only reads the in-memory registry, it never
//! waits on node or external I/O.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::MetricsRegistry;
use crate::error::StartupError;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// A bound metrics listener. Binding is separate from serving so a bind
/// failure aborts startup before any source is polled.
pub struct MetricsServer {
    listener: TcpListener,
    metrics: Arc<MetricsRegistry>,
}

impl MetricsServer {
    pub async fn bind(
        addr: SocketAddr,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, StartupError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StartupError::Bind { addr, source })?;
        Ok(Self { listener, metrics })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled.
    pub async fn serve(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("metrics exporter listening on http://{}/metrics", addr);
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let stream = match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept metrics connection");
                    continue;
                }
            };

            let io = TokioIo::new(stream);
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                let svc = service_fn(move |req| {
                    let metrics = metrics.clone();
                    handle_request(req, metrics)
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                    tracing::debug!(error = %err, "metrics connection error");
                }
            });
        }

        tracing::info!("metrics exporter stopped");
    }
}

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

async fn handle_request<B>(
    req: Request<B>,
    metrics: Arc<MetricsRegistry>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => response(StatusCode::OK, TEXT_FORMAT, metrics.gather_text()),
        (&Method::GET, "/health") => response(StatusCode::OK, "text/plain", "ok"),
        _ => response(StatusCode::NOT_FOUND, "text/plain", "not found"),
    })
}
