//! Metrics and health endpoints

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::Result;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use speaker_core::SpeakerMetrics;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

pub fn handle_request<B>(req: &Request<B>, metrics: &SpeakerMetrics) -> Response<Full<Bytes>> {
    if req.method() != Method::GET {
        return response(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "method not allowed\n");
    }

    match req.uri().path() {
        "/healthz" => response(StatusCode::OK, "text/plain", "ok\n"),
        "/metrics" => match metrics.gather() {
            Ok(text) => response(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                error!("Failed to gather metrics: {}", e);
                response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "failed to gather metrics\n",
                )
            }
        },
        _ => response(StatusCode::NOT_FOUND, "text/plain", "not found\n"),
    }
}

/// Serve `/metrics` and `/healthz` on `addr` until `token` is cancelled
pub async fn serve(
    addr: SocketAddr,
    metrics: SpeakerMetrics,
    token: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, peer_addr) = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Error accepting metrics connection: {}", e);
                    continue;
                }
            },
        };

        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let resp = handle_request(&req, &metrics);
                async move { Ok::<_, Infallible>(resp) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving metrics connection from {}: {}", peer_addr, e);
            }
        });
    }

    info!("Metrics server stopped");
    Ok(())
}
