//! Session client implementation

use crate::config::SessionClientConfig;
use crate::errors::{AuthError, RequestError};
use crate::types::{PreparedRequest, Session, StepOutcome};
use async_trait::async_trait;
use loadrig_core::{Credentials, HttpMethod, Outcome};
use reqwest::header::{HeaderValue, COOKIE};
use reqwest::{Client, Response};
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Header some deployments use instead of a session cookie
pub const SESSION_HEADER: &str = "x-session-id";

/// Statuses a logout may answer with
pub const LOGOUT_STATUSES: [u16; 2] = [200, 204];

/// Characters a browser's `encodeURIComponent` leaves as they are
const URI_COMPONENT_UNRESERVED: [(&str, &str); 5] =
    [("%21", "!"), ("%2A", "*"), ("%27", "'"), ("%28", "("), ("%29", ")")];

/// Login, authenticated requests and logout against the system under test
///
/// Implementations never retry; a failed call is reported once.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Open a session. The returned outcome carries the login timings.
    async fn login(&self, credentials: &Credentials) -> Result<(Session, StepOutcome), AuthError>;

    /// Issue one journey step with the session attached
    async fn authenticated_request(
        &self,
        session: &Session,
        request: &PreparedRequest,
    ) -> Result<StepOutcome, RequestError>;

    /// Close the session. The session is invalidated whatever the result;
    /// a second call fails locally with `Unauthorized`.
    async fn logout(&self, session: &mut Session) -> Result<StepOutcome, RequestError>;
}

/// reqwest-backed [`SessionClient`]
///
/// One client is shared by every virtual user; cookies are attached per
/// request from the caller's [`Session`], never from a shared jar.
#[derive(Debug, Clone)]
pub struct HttpSessionClient {
    client: Client,
    config: SessionClientConfig,
}

impl HttpSessionClient {
    pub fn new(config: SessionClientConfig) -> Result<Self, RequestError> {
        debug!(
            base_url = %config.base_url,
            "Creating session client with {}s timeout",
            config.timeout.as_secs()
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &SessionClientConfig {
        &self.config
    }

    fn session_cookies(&self, session: &Session) -> Result<HeaderValue, RequestError> {
        let value = format!(
            "{}={}; {}={}",
            self.config.session_cookie,
            session.token(),
            self.config.name_cookie,
            session.display_name()
        );
        HeaderValue::from_str(&value)
            .map_err(|e| RequestError::InvalidRequest(format!("session cookie: {}", e)))
    }

    /// Send and read the whole body
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<RawResponse, RequestError> {
        let started = Instant::now();
        let response = builder
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| RequestError::from_transport(e, timeout))?;
        let waiting = started.elapsed();

        let status = response.status().as_u16();
        let (cookies, session_header) = identity_headers(&response);
        let body = response
            .bytes()
            .await
            .map_err(|e| RequestError::from_transport(e, timeout))?;

        Ok(RawResponse {
            status,
            cookies,
            session_header,
            body: body.to_vec(),
            latency: started.elapsed(),
            waiting,
        })
    }
}

struct RawResponse {
    status: u16,
    cookies: Vec<(String, String)>,
    session_header: Option<String>,
    body: Vec<u8>,
    latency: Duration,
    waiting: Duration,
}

fn identity_headers(response: &Response) -> (Vec<(String, String)>, Option<String>) {
    let cookies = response
        .cookies()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect();
    let header = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (cookies, header)
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn login(&self, credentials: &Credentials) -> Result<(Session, StepOutcome), AuthError> {
        let url = self.config.url(&self.config.login_path);
        let builder = self.client.post(&url).json(&json!({
            "username": credentials.username,
            "password": credentials.password,
        }));

        let response = self
            .send(builder, self.config.timeout)
            .await
            .map_err(|e| AuthError::Unreachable {
                timed_out: matches!(e, RequestError::Timeout { .. }),
                message: e.to_string(),
            })?;

        let status = response.status;
        debug!(user = %credentials.username, status, latency = ?response.latency, "login response");

        match status {
            200 => {
                let (token, display_name) = extract_identity(
                    &self.config,
                    &response.cookies,
                    response.session_header.as_deref(),
                    &response.body,
                    &credentials.username,
                )?;
                let session = Session::new(token, display_name, &credentials.username);
                let outcome = StepOutcome::new(
                    status,
                    Outcome::Success { status },
                    response.latency,
                    response.waiting,
                );
                Ok((session, outcome))
            }
            401 => Err(AuthError::InvalidCredentials),
            other => Err(AuthError::UnexpectedStatus(other)),
        }
    }

    async fn authenticated_request(
        &self,
        session: &Session,
        request: &PreparedRequest,
    ) -> Result<StepOutcome, RequestError> {
        if !session.is_valid() {
            debug!(step = %request.step, "request on an invalidated session");
            return Err(RequestError::Unauthorized);
        }

        let url = self.config.url(&request.path);
        let mut builder = self
            .client
            .request(reqwest_method(request.method), &url)
            .header(COOKIE, self.session_cookies(session)?);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = self.send(builder, request.timeout).await?;
        debug!(
            step = %request.step,
            status = response.status,
            latency = ?response.latency,
            "step response"
        );

        classify(response.status, &request.acceptable_statuses).map(|outcome| {
            StepOutcome::new(response.status, outcome, response.latency, response.waiting)
        })
    }

    async fn logout(&self, session: &mut Session) -> Result<StepOutcome, RequestError> {
        if !session.is_valid() {
            return Err(RequestError::Unauthorized);
        }

        let cookies = self.session_cookies(session);
        session.invalidate();

        let url = self.config.url(&self.config.logout_path);
        let builder = self
            .client
            .post(&url)
            .header(COOKIE, cookies?)
            .json(&json!({ "username": session.username() }));

        let response = self.send(builder, self.config.timeout).await?;
        debug!(user = %session.username(), status = response.status, "logout response");

        let acceptable = LOGOUT_STATUSES.into_iter().collect();
        classify(response.status, &acceptable).map(|outcome| {
            StepOutcome::new(response.status, outcome, response.latency, response.waiting)
        })
    }
}

/// Accept listed statuses, otherwise map to the request error taxonomy
pub fn classify(
    status: u16,
    acceptable: &std::collections::BTreeSet<u16>,
) -> Result<Outcome, RequestError> {
    match Outcome::from_status(status, acceptable) {
        outcome @ (Outcome::Success { .. } | Outcome::ExpectedNegative { .. }) => Ok(outcome),
        Outcome::Unauthorized => Err(RequestError::Unauthorized),
        _ => Err(RequestError::Unexpected { status }),
    }
}

/// Session token and display name from a 200 login response
///
/// The token comes from the session cookie, then the session header, then
/// the body's `username`. The display name comes from the name cookie, then
/// the body's `username`, then the credential username. A name taken from
/// the body or the credential is percent-encoded for the cookie header; the
/// name cookie is sent back as the server set it.
pub fn extract_identity(
    config: &SessionClientConfig,
    cookies: &[(String, String)],
    session_header: Option<&str>,
    body: &[u8],
    credential_user: &str,
) -> Result<(String, String), AuthError> {
    let cookie = |name: &str| {
        cookies
            .iter()
            .find(|(n, v)| n == name && !v.is_empty())
            .map(|(_, v)| v.clone())
    };
    let body_user = serde_json::from_slice::<JsonValue>(body)
        .ok()
        .and_then(|v| v.get("username").and_then(|u| u.as_str()).map(str::to_string))
        .filter(|u| !u.is_empty());

    let token = cookie(&config.session_cookie)
        .or_else(|| session_header.filter(|h| !h.is_empty()).map(str::to_string))
        .or_else(|| body_user.clone());

    let Some(token) = token else {
        warn!(user = %credential_user, "login response carried no session identity");
        return Err(AuthError::MalformedResponse(format!(
            "no '{}' cookie, '{}' header or body username",
            config.session_cookie, SESSION_HEADER
        )));
    };

    let display_name = cookie(&config.name_cookie)
        .or_else(|| body_user.as_deref().map(encode_uri_component))
        .unwrap_or_else(|| encode_uri_component(credential_user));

    Ok((token, display_name))
}

/// Percent-encode `value` the way a browser's `encodeURIComponent` does
pub fn encode_uri_component(value: &str) -> String {
    let mut encoded = urlencoding::encode(value).into_owned();
    for (escape, raw) in URI_COMPONENT_UNRESERVED {
        encoded = encoded.replace(escape, raw);
    }
    encoded
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookies(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_identity_from_cookies() {
        let config = SessionClientConfig::default();
        let (token, name) = extract_identity(
            &config,
            &cookies(&[("sessionid", "tok-1"), ("name", "Fulano")]),
            Some("header-token"),
            br#"{"username":"fulano4"}"#,
            "fulano4",
        )
        .unwrap();
        assert_eq!(token, "tok-1");
        assert_eq!(name, "Fulano");
    }

    #[test]
    fn test_identity_falls_back_to_header_then_body() {
        let config = SessionClientConfig::default();
        let (token, name) =
            extract_identity(&config, &[], Some("header-token"), b"{}", "fulano4").unwrap();
        assert_eq!(token, "header-token");
        assert_eq!(name, "fulano4");

        let (token, name) =
            extract_identity(&config, &[], None, br#"{"username":"fulano2"}"#, "fulano2").unwrap();
        assert_eq!(token, "fulano2");
        assert_eq!(name, "fulano2");
    }

    #[test]
    fn test_display_name_encoded_unless_from_cookie() {
        let config = SessionClientConfig::default();
        let (_, name) = extract_identity(
            &config,
            &cookies(&[("sessionid", "tok-1")]),
            None,
            r#"{"username":"João da Silva;x"}"#.as_bytes(),
            "fulano4",
        )
        .unwrap();
        assert_eq!(name, "Jo%C3%A3o%20da%20Silva%3Bx");

        let (_, name) =
            extract_identity(&config, &cookies(&[("sessionid", "tok-1")]), None, b"{}", "a=b,c")
                .unwrap();
        assert_eq!(name, "a%3Db%2Cc");

        let (_, name) = extract_identity(
            &config,
            &cookies(&[("sessionid", "tok-1"), ("name", "Fulano%20Tal")]),
            None,
            b"{}",
            "fulano4",
        )
        .unwrap();
        assert_eq!(name, "Fulano%20Tal");
    }

    #[test]
    fn test_encode_uri_component_keeps_unreserved_marks() {
        assert_eq!(encode_uri_component("fulano4"), "fulano4");
        assert_eq!(encode_uri_component("it's (ok)! *-_.~"), "it's%20(ok)!%20*-_.~");
        assert_eq!(encode_uri_component("100%"), "100%25");
    }

    #[test]
    fn test_identity_missing_is_malformed() {
        let config = SessionClientConfig::default();
        let result = extract_identity(&config, &cookies(&[("other", "x")]), None, b"not json", "u");
        assert!(matches!(result, Err(AuthError::MalformedResponse(_))));
    }

    #[test]
    fn test_classify() {
        let acceptable = [200, 404].into_iter().collect();
        assert_eq!(classify(200, &acceptable), Ok(Outcome::Success { status: 200 }));
        assert_eq!(
            classify(404, &acceptable),
            Ok(Outcome::ExpectedNegative { status: 404 })
        );
        assert_eq!(classify(401, &acceptable), Err(RequestError::Unauthorized));
        assert_eq!(
            classify(500, &acceptable),
            Err(RequestError::Unexpected { status: 500 })
        );
    }

    #[tokio::test]
    async fn test_invalidated_session_rejected_locally() {
        let client = HttpSessionClient::new(SessionClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..SessionClientConfig::default()
        })
        .unwrap();
        let mut session = Session::new("tok", "Fulano", "fulano4");
        session.invalidate();

        let request = PreparedRequest::from_step(
            &loadrig_core::JourneyStep::get("search", "/problems/key/S"),
            &Default::default(),
        );
        assert_eq!(
            client.authenticated_request(&session, &request).await,
            Err(RequestError::Unauthorized)
        );
        assert_eq!(client.logout(&mut session).await, Err(RequestError::Unauthorized));
    }
}
