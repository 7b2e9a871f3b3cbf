//! # Route/Auth Gate
//!
//! Decides whether an upgrade request may become a session. Two independent
//! checks, always in this order:
//!
//! 1. **Credential**: must equal the shared secret exactly. A failure here is
//!    reported as unauthorized whatever the path is.
//! 2. **Route**: must be one of the configured persona routes.
//!
//! The gate holds only data resolved at startup and is never mutated, so one
//! instance is shared by every worker without locking.

use crate::config::{AppConfig, PersonaConfig};
use crate::error::RelayError;
use std::collections::HashMap;
use std::sync::Arc;

/// A route that passed the gate, with the persona bound to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub path: String,
    pub persona: Arc<PersonaConfig>,
}

/// Outcome of checking one upgrade request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Accepted(Route),
    RejectedUnauthorized,
    RejectedNotFound,
}

impl GateDecision {
    /// The error to log for a rejected attempt.
    pub fn rejection(&self, path: &str) -> Option<RelayError> {
        match self {
            GateDecision::Accepted(_) => None,
            GateDecision::RejectedUnauthorized => Some(RelayError::AuthRejected),
            GateDecision::RejectedNotFound => Some(RelayError::RouteNotFound(path.to_string())),
        }
    }
}

pub struct Gate {
    secret: String,
    routes: HashMap<String, Arc<PersonaConfig>>,
}

impl Gate {
    pub fn new(secret: impl Into<String>, personas: &[PersonaConfig]) -> Self {
        let routes = personas
            .iter()
            .map(|persona| (persona.route.clone(), Arc::new(persona.clone())))
            .collect();

        Self {
            secret: secret.into(),
            routes,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.relay.auth_token.clone(), &config.personas)
    }

    /// Check an upgrade's path and credential. A gate built without a secret
    /// accepts no credential at all.
    pub fn check(&self, path: &str, credential: Option<&str>) -> GateDecision {
        match credential {
            Some(token) if !self.secret.is_empty() && token == self.secret => {}
            _ => return GateDecision::RejectedUnauthorized,
        }

        match self.routes.get(path) {
            Some(persona) => GateDecision::Accepted(Route {
                path: path.to_string(),
                persona: Arc::clone(persona),
            }),
            None => GateDecision::RejectedNotFound,
        }
    }

    pub fn has_route(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }
}
