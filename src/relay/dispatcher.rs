//! # Relay Dispatcher
//!
//! Entry point for every path that is not part of the HTTP surface. An upgrade
//! request goes through three checks before any WebSocket handshake happens:
//!
//! 1. **Gate**: credential, then route (bare 401/404 on failure)
//! 2. **Capacity**: a `SessionPermit` is taken from a fixed pool (503 when empty)
//! 3. **Handshake**: actix-web-actors validates the upgrade headers (400 on failure)
//!
//! On success the telephony actor is started and the session runtime is spawned
//! on the same worker. The permit travels with the runtime and is returned
//! when the session ends, however it ends.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult, RelayError};
use crate::relay::downstream::{DownstreamHandle, TelephonyLeg};
use crate::relay::gate::{Gate, GateDecision, Route};
use crate::relay::runtime::{run_session, SessionTiming};
use crate::relay::session::SessionProfile;
use crate::relay::upstream::RealtimeConnector;
use crate::state::AppState;

use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Query parameter carrying the shared secret.
const CREDENTIAL_PARAM: &str = "token";

/// Admission control and session wiring, shared by all workers.
pub struct RelayDispatcher {
    gate: Gate,
    connector: RealtimeConnector,
    timing: SessionTiming,
    temperature: f32,
    max_sessions: usize,
    active: Arc<AtomicUsize>,
}

/// An upgrade that passed the gate and holds a session slot.
pub struct Admission {
    pub route: Route,
    pub permit: SessionPermit,
}

/// One slot in the session pool, released on drop.
pub struct SessionPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RelayDispatcher {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            gate: Gate::from_config(config),
            connector: RealtimeConnector::from_config(&config.relay),
            timing: SessionTiming::from_config(&config.relay),
            temperature: config.relay.temperature,
            max_sessions: config.relay.max_concurrent_sessions,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Run the gate, then take a session slot.
    pub fn admit(&self, path: &str, credential: Option<&str>) -> Result<Admission, RelayError> {
        let decision = self.gate.check(path, credential);
        let route = match decision {
            GateDecision::Accepted(route) => route,
            rejected => {
                return Err(rejected
                    .rejection(path)
                    .unwrap_or(RelayError::AuthRejected))
            }
        };

        let max = self.max_sessions;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .map_err(|_| RelayError::CapacityExceeded(max))?;

        Ok(Admission {
            route,
            permit: SessionPermit {
                active: Arc::clone(&self.active),
            },
        })
    }

    pub fn profile_for(&self, route: &Route) -> SessionProfile {
        SessionProfile {
            route: route.path.clone(),
            persona: Arc::clone(&route.persona),
            temperature: self.temperature,
        }
    }
}

/// Extract the credential from a raw query string.
fn credential_from_query(query: &str) -> Option<String> {
    web::Query::<HashMap<String, String>>::from_query(query)
        .ok()
        .and_then(|params| params.into_inner().remove(CREDENTIAL_PARAM))
}

/// Catch-all handler: every unmatched path is a potential media stream upgrade.
pub async fn relay_upgrade(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let path = req.path().to_string();
    let credential = credential_from_query(req.query_string());

    let admission = match state.dispatcher.admit(&path, credential.as_deref()) {
        Ok(admission) => admission,
        Err(err) => {
            warn!(path = %path, "{}", err);
            state.record_upgrade_rejected(&err);
            return match err {
                RelayError::AuthRejected => Ok(HttpResponse::Unauthorized().force_close().finish()),
                RelayError::RouteNotFound(_) => Ok(HttpResponse::NotFound().force_close().finish()),
                other => Err(AppError::from(other)),
            };
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (addr, response) = ws::WsResponseBuilder::new(TelephonyLeg::new(events_tx), &req, payload)
        .start_with_addr()
        .map_err(|e| AppError::BadRequest(format!("WebSocket handshake failed: {}", e)))?;

    let Admission { route, permit } = admission;
    let profile = state.dispatcher.profile_for(&route);
    let connector = state.dispatcher.connector.clone();
    let timing = state.dispatcher.timing;

    info!(route = %route.path, voice = %route.persona.voice, "Media stream accepted");
    state.record_session_started();

    let state = state.clone();
    actix_web::rt::spawn(async move {
        let summary = run_session(DownstreamHandle::new(addr), events_rx, &connector, profile, timing).await;
        drop(permit);

        match &summary.end_reason {
            Some(reason) if reason.is_fatal() => {
                info!(session_id = %summary.session_id, route = %summary.route, "Session ended: {}", reason)
            }
            _ => info!(session_id = %summary.session_id, route = %summary.route, "Session ended"),
        }
        state.record_session_finished(&summary);
    });

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use actix_web::{http::StatusCode, test as actix_test, App};

    fn test_config(max_sessions: usize) -> AppConfig {
        let defaults = AppConfig::default();
        AppConfig {
            relay: RelayConfig {
                auth_token: "s3cret".to_string(),
                upstream_url: "ws://127.0.0.1:1/v1/realtime".to_string(),
                max_concurrent_sessions: max_sessions,
                ..defaults.relay
            },
            ..defaults
        }
    }

    macro_rules! relay_app {
        ($state:expr) => {
            actix_test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .default_service(web::to(relay_upgrade)),
            )
            .await
        };
    }

    #[test]
    fn test_credential_from_query() {
        assert_eq!(credential_from_query("token=abc"), Some("abc".to_string()));
        assert_eq!(credential_from_query("a=1&token=a%20b"), Some("a b".to_string()));
        assert_eq!(credential_from_query("tok=abc"), None);
        assert_eq!(credential_from_query(""), None);
    }

    #[test]
    fn test_admit_and_release() {
        let dispatcher = RelayDispatcher::from_config(&test_config(1));

        let admission = dispatcher.admit("/stream-support", Some("s3cret")).unwrap();
        assert_eq!(admission.route.persona.voice, "shimmer");
        assert_eq!(dispatcher.active_sessions(), 1);

        assert_eq!(
            dispatcher.admit("/stream-sales", Some("s3cret")).err(),
            Some(RelayError::CapacityExceeded(1))
        );

        drop(admission);
        assert_eq!(dispatcher.active_sessions(), 0);
        assert!(dispatcher.admit("/stream-sales", Some("s3cret")).is_ok());
    }

    #[test]
    fn test_rejections_take_no_slot() {
        let dispatcher = RelayDispatcher::from_config(&test_config(1));
        assert_eq!(dispatcher.admit("/stream-sales", None).err(), Some(RelayError::AuthRejected));
        assert_eq!(
            dispatcher.admit("/nope", Some("s3cret")).err(),
            Some(RelayError::RouteNotFound("/nope".to_string()))
        );
        assert_eq!(dispatcher.active_sessions(), 0);
    }

    #[test]
    fn test_profile_carries_temperature() {
        let dispatcher = RelayDispatcher::from_config(&test_config(1));
        let admission = dispatcher.admit("/stream-sales", Some("s3cret")).unwrap();
        let profile = dispatcher.profile_for(&admission.route);
        assert_eq!(profile.route, "/stream-sales");
        assert_eq!(profile.persona.voice, "alloy");
        assert_eq!(profile.temperature, 0.8);
    }

    /// Wrong credential: 401, empty body, connection closed.
    #[actix_web::test]
    async fn test_unauthorized_upgrade() {
        let state = AppState::new(test_config(4));
        let app = relay_app!(state);

        let req = actix_test::TestRequest::get().uri("/stream-sales?token=wrong").to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(!resp.response().head().keep_alive());
        assert!(actix_test::read_body(resp).await.is_empty());
        assert_eq!(state.get_metrics_snapshot().upgrades_unauthorized, 1);
    }

    #[actix_web::test]
    async fn test_unknown_route_upgrade() {
        let state = AppState::new(test_config(4));
        let app = relay_app!(state);

        let req = actix_test::TestRequest::get().uri("/stream-billing?token=s3cret").to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(actix_test::read_body(resp).await.is_empty());
        assert_eq!(state.get_metrics_snapshot().upgrades_not_found, 1);
    }

    /// A gated request without upgrade headers fails the handshake and frees its slot.
    #[actix_web::test]
    async fn test_plain_request_is_bad_request() {
        let state = AppState::new(test_config(4));
        let app = relay_app!(state);

        let req = actix_test::TestRequest::get().uri("/stream-sales?token=s3cret").to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.dispatcher.active_sessions(), 0);
        assert_eq!(state.get_metrics_snapshot().sessions_started, 0);
    }

    #[actix_web::test]
    async fn test_over_capacity_upgrade() {
        let state = AppState::new(test_config(1));
        let app = relay_app!(state);
        let _held = state.dispatcher.admit("/stream-sales", Some("s3cret")).unwrap();

        let req = actix_test::TestRequest::get().uri("/stream-support?token=s3cret").to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().upgrades_over_capacity, 1);
    }

    #[actix_web::test]
    async fn test_valid_upgrade_switches_protocols() {
        let state = AppState::new(test_config(4));
        let app = relay_app!(state);

        let req = actix_test::TestRequest::get()
            .uri("/stream-sales?token=s3cret")
            .insert_header(("upgrade", "websocket"))
            .insert_header(("connection", "Upgrade"))
            .insert_header(("sec-websocket-version", "13"))
            .insert_header(("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ=="))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(state.get_metrics_snapshot().sessions_started, 1);
    }
}
