//! Session and request types

use chrono::{DateTime, Utc};
use loadrig_core::{HttpMethod, JourneyStep, Outcome};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

/// An authenticated identity owned by exactly one iteration
///
/// Valid from a successful login until `logout` is called on it.
#[derive(Clone)]
pub struct Session {
    token: String,
    display_name: String,
    username: String,
    created_at: DateTime<Utc>,
    invalidated: bool,
}

impl Session {
    pub fn new(
        token: impl Into<String>,
        display_name: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            display_name: display_name.into(),
            username: username.into(),
            created_at: Utc::now(),
            invalidated: false,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// The credential username the session was opened with
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_valid(&self) -> bool {
        !self.invalidated
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("display_name", &self.display_name)
            .field("username", &self.username)
            .field("created_at", &self.created_at)
            .field("invalidated", &self.invalidated)
            .finish_non_exhaustive()
    }
}

/// A step with its templates rendered for one iteration
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub step: String,
    pub metric_key: String,
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<JsonValue>,
    pub acceptable_statuses: BTreeSet<u16>,
    pub timeout: Duration,
}

impl PreparedRequest {
    /// Render `step` with the iteration's placeholder values
    pub fn from_step(step: &JourneyStep, vars: &HashMap<String, String>) -> Self {
        Self {
            step: step.name.clone(),
            metric_key: step.metric_key.clone(),
            method: step.method,
            path: step.path.render(vars),
            body: step.body.as_ref().map(|body| body.render(vars)),
            acceptable_statuses: step.acceptable_statuses.clone(),
            timeout: step.timeout,
        }
    }
}

/// A response whose status the caller accepted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub status: u16,
    pub outcome: Outcome,
    /// Time until the full response body was read
    pub latency: Duration,
    /// Time until response headers arrived
    pub waiting: Duration,
}

impl StepOutcome {
    pub fn new(status: u16, outcome: Outcome, latency: Duration, waiting: Duration) -> Self {
        Self {
            status,
            outcome,
            latency,
            waiting,
        }
    }
}
