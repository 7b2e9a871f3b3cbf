//! # Configuration Management
//!
//! This module handles loading the relay configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! The configuration is resolved exactly once at startup. After that it is
//! wrapped in an `Arc` and shared read-only by the gate and every session;
//! nothing mutates it at runtime, so it never sits behind a lock.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables (HOST, PORT, AUTH_TOKEN, OPENAI_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_RELAY__CONNECT_TIMEOUT_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    /// One entry per accepted route
    pub personas: Vec<PersonaConfig>,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings for the relay itself: the shared secret, the upstream endpoint
/// and the time bounds applied to every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Shared secret the telephony provider passes as `?token=`
    pub auth_token: String,

    /// Realtime API WebSocket endpoint (model selected in the query string)
    pub upstream_url: String,

    /// Bearer credential for the realtime API
    pub api_key: String,

    /// How long a session may stay in CONNECTING before it is failed
    pub connect_timeout_ms: u64,

    /// How long to wait for both legs to confirm close before giving up on them
    pub close_grace_ms: u64,

    /// Sampling temperature sent in the session configuration
    pub temperature: f32,

    /// Upgrades beyond this many live sessions are turned away
    pub max_concurrent_sessions: usize,
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Voice and instructions bound to one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Upgrade path, e.g. `/stream-sales`
    pub route: String,
    /// Voice identifier understood by the realtime API
    pub voice: String,
    /// System instructions for the assistant on this route
    pub instructions: String,
}

const SALES_INSTRUCTIONS: &str = "You are a friendly sales assistant answering a phone call. \
Keep answers short and conversational, ask one question at a time, and offer to connect \
the caller with a specialist when they are ready to buy.";

const SUPPORT_INSTRUCTIONS: &str = "You are a patient customer support agent answering a phone \
call. Confirm the caller's problem in your own words, walk through fixes one step at a time, \
and keep every reply brief enough to be spoken aloud.";

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            relay: RelayConfig {
                // No usable default; startup fails until one is configured
                auth_token: String::new(),
                upstream_url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-10-01"
                    .to_string(),
                api_key: String::new(),
                connect_timeout_ms: 10_000,
                close_grace_ms: 2_000,
                temperature: 0.8,
                max_concurrent_sessions: 100,
            },
            personas: vec![
                PersonaConfig {
                    route: "/stream-sales".to_string(),
                    voice: "alloy".to_string(),
                    instructions: SALES_INSTRUCTIONS.to_string(),
                },
                PersonaConfig {
                    route: "/stream-support".to_string(),
                    voice: "shimmer".to_string(),
                    instructions: SUPPORT_INSTRUCTIONS.to_string(),
                },
            ],
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_RELAY__CONNECT_TIMEOUT_MS=5000`: Override the upstream connect bound
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    /// - `AUTH_TOKEN` / `OPENAI_API_KEY`: Secrets, usually injected by the platform
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore so field names like auth_token survive
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(token) = env::var("AUTH_TOKEN") {
            settings = settings.set_override("relay.auth_token", token)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("relay.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The shared secret is not empty
    /// - Timeouts and the session limit are not 0
    /// - Temperature is inside the range the realtime API accepts (0.6 to 1.2)
    /// - Every route starts with `/`, has a voice, and appears only once
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.relay.auth_token.is_empty() {
            return Err(anyhow::anyhow!("Relay auth token cannot be empty"));
        }

        if self.relay.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Upstream connect timeout must be greater than 0"));
        }

        if self.relay.close_grace_ms == 0 {
            return Err(anyhow::anyhow!("Close grace period must be greater than 0"));
        }

        if self.relay.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if !(0.6..=1.2).contains(&self.relay.temperature) {
            return Err(anyhow::anyhow!(
                "Temperature must be between 0.6 and 1.2, got {}",
                self.relay.temperature
            ));
        }

        if self.personas.is_empty() {
            return Err(anyhow::anyhow!("At least one persona route must be configured"));
        }

        for (index, persona) in self.personas.iter().enumerate() {
            if !persona.route.starts_with('/') {
                return Err(anyhow::anyhow!("Persona route '{}' must start with '/'", persona.route));
            }
            if persona.voice.is_empty() {
                return Err(anyhow::anyhow!("Persona route '{}' has no voice", persona.route));
            }
            if self.personas[..index].iter().any(|p| p.route == persona.route) {
                return Err(anyhow::anyhow!("Persona route '{}' is configured twice", persona.route));
            }
        }

        Ok(())
    }

    /// Look up the persona configured for a route.
    pub fn persona(&self, route: &str) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.route == route)
    }
}
