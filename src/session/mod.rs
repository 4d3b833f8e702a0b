//! Session state and the capabilities that persist it between requests.

mod cookie;

pub use cookie::{CookieOptions, CookieStore, MAX_CHUNK_SIZE, MAX_NUM_CHUNKS};

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No usable session: absent, expired, forged or sealed with another key.
    #[error("session not found")]
    NotFound,
    /// The transport carrying the session could not be read or written.
    #[error("invalid session transport: {0}")]
    Invalid(String),
}

/// A user's session as carried between requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub iss: String,
    /// Issued-at, unix seconds.
    #[serde(default)]
    pub iat: i64,
    /// Expiry, unix seconds. Zero never expires.
    #[serde(default)]
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idp_id: Option<String>,
}

impl SessionState {
    #[must_use]
    pub fn new(id: impl Into<String>, issuer: impl Into<String>, ttl: chrono::Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: id.into(),
            sub: None,
            iss: issuer.into(),
            iat: now,
            exp: now + ttl.num_seconds(),
            idp_id: None,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, sub: impl Into<String>) -> Self {
        self.sub = Some(sub.into());
        self
    }

    #[must_use]
    pub fn with_idp_id(mut self, idp_id: impl Into<String>) -> Self {
        self.idp_id = Some(idp_id.into());
        self
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.exp != 0 && self.exp <= Utc::now().timestamp()
    }
}

/// Read half: extracts session state from an incoming request.
pub trait SessionLoader: Send + Sync {
    /// # Errors
    /// [`SessionError::NotFound`] when there is no valid session,
    /// [`SessionError::Invalid`] when the request headers cannot be read.
    fn load_session(&self, headers: &HeaderMap) -> Result<SessionState, SessionError>;
}

/// Write half: attaches session state to an outgoing response.
///
/// There are no partial updates; callers load, modify and save the whole state.
pub trait SessionStore: SessionLoader {
    /// # Errors
    /// [`SessionError::Invalid`] if the state cannot be encoded into headers.
    fn save_session(&self, headers: &mut HeaderMap, state: &SessionState) -> Result<(), SessionError>;

    /// # Errors
    /// [`SessionError::Invalid`] if the clearing headers cannot be built.
    fn clear_session(&self, headers: &mut HeaderMap) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let live = SessionState::new("s1", "authenticate.example.com", chrono::Duration::hours(1));
        assert!(!live.is_expired());

        let expired = SessionState::new("s2", "authenticate.example.com", chrono::Duration::seconds(-5));
        assert!(expired.is_expired());

        let forever = SessionState {
            exp: 0,
            ..SessionState::default()
        };
        assert!(!forever.is_expired());
    }

    #[test]
    fn test_builders() {
        let state = SessionState::new("s1", "iss", chrono::Duration::minutes(5))
            .with_subject("user-1")
            .with_idp_id("idp-1");
        assert_eq!(state.sub.as_deref(), Some("user-1"));
        assert_eq!(state.idp_id.as_deref(), Some("idp-1"));
        assert_eq!(state.exp - state.iat, 300);
    }
}
