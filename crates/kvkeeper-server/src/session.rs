//! Browser session propagation.
//!
//! The session id travels in a cookie. [`BrowserSession`] resolves (or
//! starts) the session for a request and carries the `Set-Cookie` header
//! to send back when a new session was allocated. [`Connected`] goes one
//! step further and requires a live backend connection for the session's
//! current host.

use axum::{
    extract::FromRequestParts,
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, SET_COOKIE},
        request::Parts,
    },
    response::{IntoResponseParts, ResponseParts},
};
use kvkeeper_session::SharedSession;
use kvkeeper_store::{SharedClient, connection_key};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Session key holding the host the browser is currently working on.
pub const CURRENT_HOST: &str = "host";

/// Session key holding the login for `host`.
pub fn login_key(host: &str) -> String {
    format!("login:{host}")
}

/// Who is logged in to a host. The password is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub host: String,
    pub uname: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookie
// ─────────────────────────────────────────────────────────────────────────────

/// `Set-Cookie` header for a newly started session, if any.
#[derive(Debug, Clone, Default)]
pub struct SessionCookie(Option<HeaderValue>);

impl IntoResponseParts for SessionCookie {
    type Error = std::convert::Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> std::result::Result<ResponseParts, Self::Error> {
        if let Some(value) = self.0 {
            res.headers_mut().append(SET_COOKIE, value);
        }
        Ok(res)
    }
}

/// Value of cookie `name` in the request headers.
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn set_cookie_header(name: &str, sid: &str, max_age_secs: u64) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}={sid}; Path=/; HttpOnly; Max-Age={max_age_secs}"
    ))
    .map_err(|e| ServerError::Internal(format!("invalid session cookie: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────────────────────────

/// The browser session of a request.
pub struct BrowserSession {
    pub store: SharedSession,
    pub cookie: SessionCookie,
}

impl FromRequestParts<AppState> for BrowserSession {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let manager = &state.sessions;
        let token = cookie_value(&parts.headers, manager.cookie_name());
        let started = manager.start(token)?;

        let cookie = if started.is_new {
            SessionCookie(Some(set_cookie_header(
                manager.cookie_name(),
                started.store.id(),
                manager.config().lifetime.as_secs(),
            )?))
        } else {
            SessionCookie::default()
        };

        Ok(Self {
            store: started.store,
            cookie,
        })
    }
}

/// A request whose session is connected to a backend.
pub struct Connected {
    pub client: SharedClient,
    pub host: String,
    pub cookie: SessionCookie,
}

impl FromRequestParts<AppState> for Connected {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let session = BrowserSession::from_request_parts(parts, state).await?;

        let host: String = session
            .store
            .get_as(CURRENT_HOST)?
            .ok_or(ServerError::NotConnected)?;
        let login: Login = session
            .store
            .get_as(&login_key(&host))?
            .ok_or(ServerError::NotConnected)?;

        let Some(client) = state
            .connections
            .resolve(&connection_key(&host, &login.uname))
        else {
            debug!(host = %host, uname = %login.uname, "Session login has no live connection");
            return Err(ServerError::NotConnected);
        };

        Ok(Self {
            client,
            host,
            cookie: session.cookie,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark; sid=abc123"));
        headers.append(COOKIE, HeaderValue::from_static("other=1"));

        assert_eq!(cookie_value(&headers, "sid"), Some("abc123"));
        assert_eq!(cookie_value(&headers, "other"), Some("1"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_set_cookie_header() {
        let value = set_cookie_header("sid", "abc", 3600).unwrap();
        assert_eq!(value, "sid=abc; Path=/; HttpOnly; Max-Age=3600");
    }
}
