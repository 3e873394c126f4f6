//! HTTP client and target configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, validate_required_string, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL every step path is appended to
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default request timeout; steps may set their own
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Whether to verify TLS certificates
    #[serde(default = "crate::domains::utils::default_true")]
    pub verify_ssl: bool,

    /// Connection pool configuration
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    /// Session endpoints and cookie names
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Connection pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Maximum idle connections per host
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// Idle connection timeout
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// TCP connect timeout
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
}

/// Where to log in and out, and which cookies carry the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(default = "default_login_path")]
    pub login_path: String,

    #[serde(default = "default_logout_path")]
    pub logout_path: String,

    /// Cookie holding the session token
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Cookie holding the display name
    #[serde(default = "default_name_cookie")]
    pub name_cookie: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout: default_timeout(),
            user_agent: default_user_agent(),
            verify_ssl: true,
            connection_pool: ConnectionPoolConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout: default_idle_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_path: default_login_path(),
            logout_path: default_logout_path(),
            session_cookie: default_session_cookie(),
            name_cookie: default_name_cookie(),
        }
    }
}

impl Validatable for HttpConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_url(&self.base_url, "base_url", self.domain_name())?;
        validate_duration(self.timeout, "timeout", self.domain_name())?;
        validate_required_string(&self.user_agent, "user_agent", self.domain_name())?;

        self.connection_pool.validate()?;
        self.auth.validate()?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "http"
    }
}

impl Validatable for ConnectionPoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.max_idle_per_host,
            "max_idle_per_host",
            self.domain_name(),
        )?;
        validate_duration(self.idle_timeout, "idle_timeout", self.domain_name())?;
        validate_duration(
            self.connection_timeout,
            "connection_timeout",
            self.domain_name(),
        )?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "http.connection_pool"
    }
}

impl Validatable for AuthConfig {
    fn validate(&self) -> ConfigResult<()> {
        for (path, field) in [(&self.login_path, "login_path"), (&self.logout_path, "logout_path")] {
            if !path.starts_with('/') {
                return Err(self.validation_error(format!("{} must start with '/'", field)));
            }
        }
        validate_required_string(&self.session_cookie, "session_cookie", self.domain_name())?;
        validate_required_string(&self.name_cookie, "name_cookie", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "http.auth"
    }
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:8000/api/v1/web-algo".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("loadrig/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_idle_per_host() -> usize {
    100
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_login_path() -> String {
    "/auth/login".to_string()
}

fn default_logout_path() -> String {
    "/auth/logout".to_string()
}

fn default_session_cookie() -> String {
    "sessionid".to_string()
}

fn default_name_cookie() -> String {
    "name".to_string()
}
