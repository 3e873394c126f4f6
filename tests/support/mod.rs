//! In-process stand-in for the judge backend
//!
//! Serves the session and problem endpoints under the same base path as the
//! real service. Any account whose password equals its username may log in.
#![allow(dead_code)]

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use loadrig_config::HttpConfig;
use loadrig_http::HttpSessionClient;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const BASE_PATH: &str = "/api/v1/web-algo";

/// Known problem codes are `S` followed by eight digits, up to S00000100
const KNOWN_PROBLEMS: u32 = 100;

#[derive(Default)]
pub struct Backend {
    sessions: Mutex<HashMap<String, String>>,
    pub logins: AtomicU64,
    pub logouts: AtomicU64,
    pub requests: AtomicU64,
    /// Non-zero makes every problem details call answer with this status
    details_status: AtomicU16,
}

impl Backend {
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn fail_details_with(&self, status: u16) {
        self.details_status.store(status, Ordering::SeqCst);
    }

    fn session_user(&self, headers: &HeaderMap) -> Option<String> {
        let token = session_token(headers)?;
        self.sessions.lock().get(&token).cloned()
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == "sessionid")
        .map(|(_, token)| token.to_string())
}

pub struct StubServer {
    pub base_url: String,
    pub backend: Arc<Backend>,
    handle: JoinHandle<()>,
}

impl StubServer {
    pub async fn start() -> Result<Self> {
        let backend = Arc::new(Backend::default());
        let api = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/logout", post(logout))
            .route("/problems/key/{key}", get(search))
            .route("/problems/{code}/details", get(problem_details))
            .route("/solutions/{code}/details", get(solution_details))
            .route("/solutions", post(create_solution))
            .route("/solutions/save", post(save_solution))
            .route("/slow", get(slow))
            .with_state(Arc::clone(&backend));
        let app = Router::new().nest(BASE_PATH, api);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("stub server stopped: {}", e);
            }
        });

        Ok(Self {
            base_url: format!("http://{}{}", addr, BASE_PATH),
            backend,
            handle,
        })
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(5),
            ..HttpConfig::default()
        }
    }

    pub fn client(&self) -> Result<HttpSessionClient> {
        Ok(HttpSessionClient::new(self.http_config().into())?)
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Shared = State<Arc<Backend>>;

async fn login(State(backend): Shared, body: Bytes) -> Response {
    let Ok(body) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let username = body.get("username").and_then(Value::as_str).unwrap_or_default();
    let password = body.get("password").and_then(Value::as_str).unwrap_or_default();
    if username.is_empty() || password != username {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "detail": "Invalid credentials" })))
            .into_response();
    }

    let n = backend.logins.fetch_add(1, Ordering::SeqCst);
    let token = format!("{}-{}", username, n);
    backend.sessions.lock().insert(token.clone(), username.to_string());
    (
        AppendHeaders([
            (header::SET_COOKIE, format!("sessionid={}; Path=/; HttpOnly", token)),
            (header::SET_COOKIE, "name=Fulano; Path=/".to_string()),
        ]),
        Json(json!({ "username": username })),
    )
        .into_response()
}

async fn logout(State(backend): Shared, headers: HeaderMap) -> Response {
    let removed = session_token(&headers).and_then(|token| backend.sessions.lock().remove(&token));
    match removed {
        Some(_) => {
            backend.logouts.fetch_add(1, Ordering::SeqCst);
            StatusCode::NO_CONTENT.into_response()
        }
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

fn authorize(backend: &Backend, headers: &HeaderMap) -> Result<String, Response> {
    backend.requests.fetch_add(1, Ordering::SeqCst);
    backend
        .session_user(headers)
        .ok_or_else(|| StatusCode::UNAUTHORIZED.into_response())
}

fn problem_number(code: &str) -> Option<u32> {
    let digits = code.strip_prefix('S')?;
    if digits.len() != 8 {
        return None;
    }
    digits.parse().ok()
}

async fn search(State(backend): Shared, headers: HeaderMap, Path(key): Path<String>) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    if key == "S" {
        Json(json!([{ "code": "S00000050", "title": "Soma" }])).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "detail": "No problems match" }))).into_response()
    }
}

async fn problem_details(
    State(backend): Shared,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    let forced = backend.details_status.load(Ordering::SeqCst);
    if forced != 0 {
        return StatusCode::from_u16(forced)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }
    match problem_number(&code) {
        Some(n) if n <= KNOWN_PROBLEMS => {
            Json(json!({ "code": code, "statement": "Some dois inteiros." })).into_response()
        }
        Some(_) => StatusCode::NOT_FOUND.into_response(),
        None => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    }
}

async fn solution_details(
    State(backend): Shared,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    match problem_number(&code) {
        Some(_) => Json(json!({ "problemCode": code, "sourceCode": "" })).into_response(),
        None => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    }
}

async fn create_solution(State(backend): Shared, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    let code = serde_json::from_slice::<Value>(&body)
        .ok()
        .and_then(|v| v.get("problemCode").and_then(Value::as_str).map(str::to_string));
    match code {
        Some(code) => Json(json!({ "problemCode": code })).into_response(),
        None => StatusCode::UNPROCESSABLE_ENTITY.into_response(),
    }
}

async fn save_solution(State(backend): Shared, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    Json(json!({ "saved": true })).into_response()
}

async fn slow(State(backend): Shared, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&backend, &headers) {
        return denied;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    StatusCode::OK.into_response()
}
