//! Per-user authentication.
//!
//! Auth is resolved once per virtual user before its journeys run. Session
//! auth logs in through the user's own cookie-enabled client, so the
//! resulting [`Credentials`] carry nothing; the cookie jar does the work.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_LOGIN_ENDPOINT: &str = "/login";

/// Auth settings delivered with a test task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthConfig {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    Session {
        username: String,
        password: String,
        #[serde(default, alias = "loginEndpoint")]
        login_endpoint: Option<String>,
    },
}

impl AuthConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthConfig::None => "none",
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::Session { .. } => "session",
        }
    }
}

/// Credentials injected into every request of one user.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Headers(HeaderMap),
}

impl Credentials {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Credentials::None => request,
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credentials::Headers(headers) => request.headers(headers.clone()),
        }
    }
}

/// Resolve `auth` into request credentials, logging in first for session auth.
///
/// A failed login is logged and the journey proceeds without credentials.
pub async fn setup_auth(
    client: &reqwest::Client,
    base_url: &str,
    auth: &AuthConfig,
    timeout: Duration,
) -> Credentials {
    match auth {
        AuthConfig::None => Credentials::None,
        AuthConfig::Basic { username, password } => Credentials::Basic {
            username: username.clone(),
            password: password.clone(),
        },
        AuthConfig::Bearer { token } => {
            match HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    let mut headers = HeaderMap::new();
                    headers.insert(AUTHORIZATION, value);
                    Credentials::Headers(headers)
                }
                Err(e) => {
                    warn!(error = %e, "Bearer token is not a valid header value, sending requests unauthenticated");
                    Credentials::None
                }
            }
        }
        AuthConfig::Session {
            username,
            password,
            login_endpoint,
        } => {
            let endpoint = login_endpoint.as_deref().unwrap_or(DEFAULT_LOGIN_ENDPOINT);
            session_login(client, base_url, endpoint, username, password, timeout).await;
            Credentials::None
        }
    }
}

async fn session_login(
    client: &reqwest::Client,
    base_url: &str,
    endpoint: &str,
    username: &str,
    password: &str,
    timeout: Duration,
) {
    let url = crate::executor::join_url(base_url, endpoint);
    debug!(url = %url, "Logging in for session auth");

    let body = serde_json::json!({ "username": username, "password": password });
    match client.post(&url).json(&body).timeout(timeout).send().await {
        Ok(response) if response.status().is_success() => {
            // Any token in the body is ignored; the cookie jar keeps the session.
            info!(url = %url, status_code = response.status().as_u16(), "Session login succeeded");
        }
        Ok(response) => {
            warn!(url = %url, status_code = response.status().as_u16(), "Session login rejected");
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Session login failed");
        }
    }
}
