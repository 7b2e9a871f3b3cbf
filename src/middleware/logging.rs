//! # Request Logging Middleware
//!
//! Writes one event when a request arrives and one when it has been answered.
//! Health checks and metrics scrapes are the bulk of the traffic, so arrivals
//! are logged at debug. Upgrade attempts are the interesting ones and are
//! logged at info.
//!
//! ## What gets logged:
//! - Method, path and peer address. Never the query string: upgrade requests
//!   carry the shared secret there.
//! - Whether the request asked for a WebSocket upgrade
//! - Status and duration once the inner service has answered
//!
//! ## Completion levels:
//! | Status | Level | Message |
//! |---|---|---|
//! | 101 | info | `Media stream upgraded` |
//! | 1xx-3xx | info | `Request completed` |
//! | 4xx | warn | `Request rejected` |
//! | 5xx or service error | error | `Request failed` |

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{self, HeaderMap},
        StatusCode,
    },
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{debug, error, info, warn};

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingService { service }))
    }
}

pub struct RequestLoggingService<S> {
    service: S,
}

/// The parts of a request that are safe to log, captured before it is handed on.
struct RequestLine {
    method: String,
    path: String,
    peer: String,
    upgrade: bool,
}

impl RequestLine {
    fn capture(req: &ServiceRequest) -> Self {
        Self {
            method: req.method().to_string(),
            path: req.path().to_string(),
            peer: req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or("unknown")
                .to_string(),
            upgrade: wants_upgrade(req.headers()),
        }
    }
}

fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Upgraded,
    Served,
    Rejected,
    Failed,
}

impl From<StatusCode> for Outcome {
    fn from(status: StatusCode) -> Self {
        if status == StatusCode::SWITCHING_PROTOCOLS {
            Outcome::Upgraded
        } else if status.is_server_error() {
            Outcome::Failed
        } else if status.is_client_error() {
            Outcome::Rejected
        } else {
            Outcome::Served
        }
    }
}

impl<S, B> Service<ServiceRequest> for RequestLoggingService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let line = RequestLine::capture(&req);

        if line.upgrade {
            info!(method = %line.method, path = %line.path, peer = %line.peer, "Upgrade requested");
        } else {
            debug!(method = %line.method, path = %line.path, peer = %line.peer, "Request received");
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;
            let RequestLine { method, path, peer, .. } = &line;

            match &result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    match Outcome::from(response.status()) {
                        Outcome::Upgraded => {
                            info!(%method, %path, %peer, status, duration_ms, "Media stream upgraded")
                        }
                        Outcome::Served => {
                            info!(%method, %path, %peer, status, duration_ms, "Request completed")
                        }
                        Outcome::Rejected => {
                            warn!(%method, %path, %peer, status, duration_ms, "Request rejected")
                        }
                        Outcome::Failed => {
                            error!(%method, %path, %peer, status, duration_ms, "Request failed")
                        }
                    }
                }
                Err(err) => {
                    error!(%method, %path, %peer, duration_ms, error = %err, "Request failed");
                }
            }

            result
        })
    }
}
