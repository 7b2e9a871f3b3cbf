//! # Service Info Endpoint
//!
//! `GET /` and `GET /api/v1/info` describe the running relay to operators:
//! which media stream routes exist, which voice each one speaks with, the
//! audio format on each leg and the session limits.
//!
//! ## What this does:
//! - Reads the shared `AppConfig` from `AppState` (no locking, it never changes)
//! - Builds the response with `serde_json::json!`
//! - Lists route paths and voice ids only. Persona instructions, the shared
//!   secret and the upstream API key are never part of the body.
//!
//! ## Rust Concepts:
//! - **`web::Data<AppState>`**: actix-web's shared state extractor, an `Arc`
//!   under the hood, so every worker reads the same configuration
//! - **Iterator chains**: `iter().map(..).collect()` turns the persona list
//!   into JSON values without an explicit loop

use crate::state::AppState;
use crate::audio::AudioEncoding;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Service metadata: what the relay answers on and how it sounds.
///
/// Only routes and voice ids are listed. The shared secret, the API key and
/// persona instructions stay out of the response.
pub async fn service_info(state: web::Data<AppState>) -> HttpResponse {
    let routes: Vec<serde_json::Value> = state
        .config
        .personas
        .iter()
        .map(|persona| {
            json!({
                "path": persona.route,
                "voice": persona.voice
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "description": env!("CARGO_PKG_DESCRIPTION")
        },
        "routes": routes,
        "audio": {
            "telephony": {
                "encoding": AudioEncoding::Mulaw.as_str(),
                "sample_rate": 8000,
                "channels": 1
            },
            "realtime": {
                "encoding": AudioEncoding::Pcm16.as_str(),
                "sample_rate": 8000,
                "channels": 1
            }
        },
        "limits": {
            "max_concurrent_sessions": state.config.relay.max_concurrent_sessions,
            "connect_timeout_ms": state.config.relay.connect_timeout_ms,
            "close_grace_ms": state.config.relay.close_grace_ms
        },
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, RelayConfig};
    use actix_web::{test as actix_test, App};

    /// Test that the info endpoint lists routes without leaking secrets.
    #[actix_web::test]
    async fn test_info_lists_routes_without_secrets() {
        let defaults = AppConfig::default();
        let config = AppConfig {
            relay: RelayConfig {
                auth_token: "very-secret-token".to_string(),
                api_key: "sk-very-secret-key".to_string(),
                ..defaults.relay
            },
            ..defaults
        };
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(AppState::new(config)))
                .route("/api/v1/info", web::get().to(service_info)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/api/v1/info").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["routes"][0]["path"], "/stream-sales");
        assert_eq!(body["routes"][0]["voice"], "alloy");
        assert_eq!(body["routes"][1]["voice"], "shimmer");
        assert_eq!(body["audio"]["telephony"]["encoding"], "g711_ulaw");

        let text = body.to_string();
        assert!(!text.contains("very-secret-token"));
        assert!(!text.contains("sk-very-secret-key"));
        assert!(!text.contains("instructions"));
    }
}
