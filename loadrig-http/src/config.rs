//! HTTP configuration

use loadrig_config::HttpConfig as ConfigHttpConfig;
use std::time::Duration;

/// Settings the session client is built from
#[derive(Debug, Clone)]
pub struct SessionClientConfig {
    /// Base URL without a trailing slash
    pub base_url: String,

    /// Default request timeout
    pub timeout: Duration,

    pub user_agent: String,

    pub verify_ssl: bool,

    pub max_idle_per_host: usize,

    pub idle_timeout: Duration,

    pub connect_timeout: Duration,

    pub login_path: String,

    pub logout_path: String,

    /// Cookie holding the session token
    pub session_cookie: String,

    /// Cookie holding the display name
    pub name_cookie: String,
}

impl SessionClientConfig {
    /// Absolute URL for a path like `/problems/key/S`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Default for SessionClientConfig {
    fn default() -> Self {
        ConfigHttpConfig::default().into()
    }
}

impl From<ConfigHttpConfig> for SessionClientConfig {
    fn from(config: ConfigHttpConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            user_agent: config.user_agent,
            verify_ssl: config.verify_ssl,
            max_idle_per_host: config.connection_pool.max_idle_per_host,
            idle_timeout: config.connection_pool.idle_timeout,
            connect_timeout: config.connection_pool.connection_timeout,
            login_path: config.auth.login_path,
            logout_path: config.auth.logout_path,
            session_cookie: config.auth.session_cookie,
            name_cookie: config.auth.name_cookie,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_base_path() {
        let config = SessionClientConfig::from(ConfigHttpConfig {
            base_url: "http://localhost:8000/api/v1/web-algo/".to_string(),
            ..ConfigHttpConfig::default()
        });
        assert_eq!(
            config.url("/problems/key/S"),
            "http://localhost:8000/api/v1/web-algo/problems/key/S"
        );
        assert_eq!(config.login_path, "/auth/login");
        assert_eq!(config.session_cookie, "sessionid");
    }
}
