// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Access/refresh token pair issued by the authority
///
/// Tokens are opaque; nothing in the engine looks inside them.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &token_preview(&self.access_token))
            .field("refresh_token", &token_preview(&self.refresh_token))
            .finish()
    }
}

/// First few characters of a token, safe for logs
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}

/// Username/password pair for login
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reject blank fields before talking to the authority
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.username.trim().is_empty() {
            return Err(SessionError::ValidationError(
                "username is required".to_string(),
            ));
        }
        if self.password.trim().is_empty() {
            return Err(SessionError::ValidationError(
                "password is required".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session state of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// `initialize()` has not started yet
    Uninitialized,
    /// Stored token is being introspected
    Checking,
    Authenticated,
    Unauthenticated,
}

impl SessionStatus {
    /// Whether the status is one the UI may act on
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            SessionStatus::Authenticated | SessionStatus::Unauthenticated
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Checking => "checking",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Unauthenticated => "unauthenticated",
        };
        f.write_str(label)
    }
}

/// What subscribers observe: the status plus the in-memory access token
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub access_token: Option<String>,
    /// When the status last changed
    pub changed_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(status: SessionStatus, access_token: Option<String>) -> Self {
        Self {
            status,
            access_token,
            changed_at: Utc::now(),
        }
    }
}

/// Result of token introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityResult {
    pub valid: bool,
}

/// Envelope every backend endpoint answers with
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub message: String,
    pub code: i64,
    pub data: Option<T>,
}

/// Login response payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    #[allow(dead_code)]
    pub authenticated: Option<bool>,
    #[allow(dead_code)]
    pub username: Option<String>,
    #[allow(dead_code)]
    pub user_id: Option<i64>,
}

/// Introspection request body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrospectRequest<'a> {
    pub access_token: &'a str,
    pub token_type: TokenType,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenType {
    AccessToken,
}

/// Account registration form
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub fullname: String,
    pub phone: String,
    pub email: String,
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_pair_debug_hides_tokens() {
        let pair = TokenPair::new("eyJhbGciOiJIUzI1NiJ9.secret", "refresh-secret-value");
        let debug = format!("{:?}", pair);
        assert!(debug.contains("eyJhbGci..."));
        assert!(!debug.contains("secret-value"));
    }

    #[test]
    fn test_credentials_validate() {
        assert!(Credentials::new("alice", "pw").validate().is_ok());
        assert!(matches!(
            Credentials::new("  ", "pw").validate(),
            Err(SessionError::ValidationError(_))
        ));
        assert!(matches!(
            Credentials::new("alice", "").validate(),
            Err(SessionError::ValidationError(_))
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_status_settled() {
        assert!(!SessionStatus::Uninitialized.is_settled());
        assert!(!SessionStatus::Checking.is_settled());
        assert!(SessionStatus::Authenticated.is_settled());
        assert!(SessionStatus::Unauthenticated.is_settled());
    }

    #[test]
    fn test_introspect_request_shape() {
        let body = serde_json::to_value(IntrospectRequest {
            access_token: "abc",
            token_type: TokenType::AccessToken,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"accessToken": "abc", "tokenType": "ACCESS_TOKEN"})
        );
    }

    #[test]
    fn test_login_envelope_parses_without_refresh_token() {
        let resp: ApiResponse<AuthResponse> = serde_json::from_str(
            r#"{"message":"ok","code":200,"data":{"accessToken":"a1","userId":7}}"#,
        )
        .unwrap();
        let data = resp.data.unwrap();
        assert_eq!(data.access_token, "a1");
        assert!(data.refresh_token.is_none());
        assert_eq!(data.user_id, Some(7));
    }
}
