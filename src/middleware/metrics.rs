//! # Metrics Middleware
//!
//! Counts every request and records per-endpoint request counts, error
//! counts and durations into `AppState`. `/api/v1/metrics` reports them.
//!
//! ## Endpoint labels:
//! The metrics map is keyed by `"METHOD label"`, where the label is:
//! 1. the matched route pattern for the HTTP endpoints (`/api/v1/health`)
//! 2. the path itself when it is a configured media stream route (`/stream-sales`)
//! 3. `unmatched` for anything else
//!
//! Every unmatched path reaches the relay dispatcher, so keying by raw path
//! would let any client grow the map without bound. A 4xx or 5xx response,
//! or an error from the inner service, counts as an error.
//!
//! ## Rust Concepts:
//! - **`Transform` / `Service`**: actix-web's two-step middleware. `Transform`
//!   builds one service per worker, `Service::call` runs per request.
//! - **`LocalBoxFuture`**: the response future is boxed so the state handle
//!   can be moved into it and updated after the inner service answers
//! - **`Option<&AppState>`**: an app without state registered still serves
//!   requests, it just records nothing

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

/// Label for paths that are neither HTTP routes nor relay routes.
const UNMATCHED: &str = "unmatched";

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService { service }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: S,
}

/// Endpoint label for a request, see the module docs.
fn endpoint_label(method: &str, matched: Option<&str>, path: &str, state: Option<&AppState>) -> String {
    if let Some(pattern) = matched {
        return format!("{} {}", method, pattern);
    }
    match state {
        Some(state) if state.dispatcher.gate().has_route(path) => format!("{} {}", method, path),
        _ => format!("{} {}", method, UNMATCHED),
    }
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
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
        let app_state = req.app_data::<web::Data<AppState>>().cloned();

        let endpoint = endpoint_label(
            req.method().as_str(),
            req.match_pattern().as_deref(),
            req.path(),
            app_state.as_ref().map(|data| data.get_ref()),
        );

        if let Some(app_state) = &app_state {
            app_state.increment_request_count();
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration_ms = start_time.elapsed().as_millis() as u64;

            let is_error = match &result {
                Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
                Err(_) => true,
            };

            if let Some(app_state) = app_state {
                app_state.record_endpoint_request(&endpoint, duration_ms, is_error);
                if is_error {
                    app_state.increment_error_count();
                }
            }

            result
        })
    }
}
