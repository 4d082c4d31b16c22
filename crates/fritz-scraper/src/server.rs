// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::errors::ServerError;
use crate::metrics::PrometheusSink;

pub const METRICS_ENDPOINT_PATH: &str = "/metrics";

pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serves the exposition of `sink` until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    sink: Arc<PrometheusSink>,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        debug!("Metrics endpoint listening on {addr}");
    }

    let service = service_fn(move |req: Request<Incoming>| {
        let sink = sink.clone();
        async move { Ok::<_, Infallible>(handle(&req, &sink)) }
    });

    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
            () = cancel.cancelled() => {
                debug!("Metrics endpoint shutting down");
                joinset.abort_all();
                return Ok(());
            },
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Metrics endpoint error: {e}");
                    return Err(ServerError::Accept(e));
                }
                Ok((conn, _)) => conn,
            },
            Some(finished) = joinset.join_next() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Connection handler panicked: {:?}", e);
                    }
                }
                continue;
            },
        };
        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(conn, service).await {
                debug!("Connection error: {e}");
            }
        });
    }
}

fn handle(req: &Request<Incoming>, sink: &PrometheusSink) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != METRICS_ENDPOINT_PATH {
        return text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string());
    }
    match sink.render() {
        Ok(body) => text_response(StatusCode::OK, &sink.content_type(), body),
        Err(e) => {
            error!("Cannot render metrics: {e}");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                e.to_string(),
            )
        }
    }
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}
