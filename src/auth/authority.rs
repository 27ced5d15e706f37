// Authority client
// Login and token introspection against the backend's auth endpoints

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use super::types::{
    ApiResponse, AuthResponse, AuthorityResult, Credentials, IntrospectRequest, RegisterRequest,
    TokenPair, TokenType,
};
use crate::error::{Result, SessionError};

/// The two authority operations the session engine relies on
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Exchange credentials for a token pair
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair>;

    /// Ask whether an access token is still valid
    async fn introspect(&self, access_token: &str) -> Result<AuthorityResult>;
}

/// `AuthorityClient` over the backend's REST endpoints
pub struct HttpAuthorityClient {
    client: Client,
    base_url: String,
}

impl HttpAuthorityClient {
    pub fn new(base_url: &str, connect_timeout: u64, request_timeout: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Create a new account; returns the backend's message
    ///
    /// Registration does not sign the user in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<String> {
        tracing::info!(username = %request.username, "Registering account");

        let response = self
            .client
            .post(self.url("/auth/register"))
            .json(request)
            .send()
            .await
            .map_err(SessionError::from_reqwest)?;

        let status = response.status();
        let envelope: ApiResponse<serde_json::Value> = read_envelope(response).await?;

        if status.is_success() && is_ok_code(envelope.code) {
            Ok(envelope.message)
        } else {
            Err(SessionError::AuthorityError {
                status: status.as_u16(),
                message: envelope.message,
            })
        }
    }
}

/// Backend success code inside the envelope
fn is_ok_code(code: i64) -> bool {
    (200..300).contains(&code)
}

/// Decode the response envelope, falling back to the raw body for the message
async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<ApiResponse<T>> {
    let status = response.status();
    let body = response.text().await.map_err(SessionError::from_reqwest)?;

    serde_json::from_str(&body).map_err(|e| {
        if status.is_success() {
            SessionError::MalformedResponse(e.to_string())
        } else {
            SessionError::AuthorityError {
                status: status.as_u16(),
                message: body.clone(),
            }
        }
    })
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn login(&self, credentials: &Credentials) -> Result<TokenPair> {
        tracing::debug!(username = %credentials.username, "Sending login request");

        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(credentials)
            .send()
            .await
            .map_err(SessionError::from_reqwest)?;

        let status = response.status();
        let rejected = matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        );

        let envelope: ApiResponse<AuthResponse> = match read_envelope(response).await {
            Ok(envelope) => envelope,
            Err(SessionError::AuthorityError { message, .. }) if rejected => {
                return Err(SessionError::CredentialsInvalid(message));
            }
            Err(e) => return Err(e),
        };

        if rejected {
            return Err(SessionError::CredentialsInvalid(envelope.message));
        }
        if !status.is_success() {
            return Err(SessionError::AuthorityError {
                status: status.as_u16(),
                message: envelope.message,
            });
        }

        let data = match envelope.data {
            Some(data) if is_ok_code(envelope.code) => data,
            _ => return Err(SessionError::CredentialsInvalid(envelope.message)),
        };

        let refresh_token = data.refresh_token.ok_or_else(|| {
            SessionError::MalformedResponse("login response has no refreshToken".to_string())
        })?;

        if data.access_token.is_empty() {
            return Err(SessionError::MalformedResponse(
                "login response has an empty accessToken".to_string(),
            ));
        }

        Ok(TokenPair {
            access_token: data.access_token,
            refresh_token,
        })
    }

    async fn introspect(&self, access_token: &str) -> Result<AuthorityResult> {
        let request = IntrospectRequest {
            access_token,
            token_type: TokenType::AccessToken,
        };

        let response = self
            .client
            .post(self.url("/auth/introspect"))
            .json(&request)
            .send()
            .await
            .map_err(SessionError::from_reqwest)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Ok(AuthorityResult { valid: false });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SessionError::AuthorityError {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse<bool> = read_envelope(response).await?;
        Ok(AuthorityResult {
            valid: envelope.data.unwrap_or(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client_for(server: &mockito::Server) -> HttpAuthorityClient {
        HttpAuthorityClient::new(&server.url(), 5, 5).unwrap()
    }

    #[tokio::test]
    async fn test_login_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_body(Matcher::Json(json!({"username": "alice", "password": "pw"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "message": "Đăng nhập thành công",
                    "code": 200,
                    "data": {"accessToken": "acc-1", "refreshToken": "ref-1", "authenticated": true}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let pair = client_for(&server)
            .login(&Credentials::new("alice", "pw"))
            .await
            .unwrap();

        assert_eq!(pair, TokenPair::new("acc-1", "ref-1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_rejected_by_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(401)
            .with_body(json!({"message": "Sai mật khẩu", "code": 401}).to_string())
            .create_async()
            .await;

        let err = client_for(&server)
            .login(&Credentials::new("alice", "wrong"))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::CredentialsInvalid("Sai mật khẩu".to_string()));
    }

    #[tokio::test]
    async fn test_login_rejected_by_envelope_code() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(json!({"message": "User not found", "code": 404}).to_string())
            .create_async()
            .await;

        let err = client_for(&server)
            .login(&Credentials::new("ghost", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::CredentialsInvalid("User not found".to_string()));
    }

    #[tokio::test]
    async fn test_login_server_error_is_not_credentials() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server)
            .login(&Credentials::new("alice", "pw"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::AuthorityError {
                status: 500,
                message: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_login_without_refresh_token_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_body(json!({"message": "ok", "code": 200, "data": {"accessToken": "a"}}).to_string())
            .create_async()
            .await;

        let err = client_for(&server)
            .login(&Credentials::new("alice", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_login_unreachable_is_transport_failure() {
        // Nothing listens on port 9 (discard) in the test environment
        let client = HttpAuthorityClient::new("http://127.0.0.1:9", 1, 1).unwrap();
        let err = client
            .login(&Credentials::new("alice", "pw"))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_introspect_valid_and_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/introspect")
            .match_body(Matcher::Json(json!({"accessToken": "good", "tokenType": "ACCESS_TOKEN"})))
            .with_status(200)
            .with_body(json!({"message": "ok", "code": 200, "data": true}).to_string())
            .create_async()
            .await;
        server
            .mock("POST", "/auth/introspect")
            .match_body(Matcher::Json(json!({"accessToken": "stale", "tokenType": "ACCESS_TOKEN"})))
            .with_status(200)
            .with_body(json!({"message": "ok", "code": 200, "data": false}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        assert!(client.introspect("good").await.unwrap().valid);
        assert!(!client.introspect("stale").await.unwrap().valid);
    }

    #[tokio::test]
    async fn test_introspect_unauthorized_means_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/introspect")
            .with_status(401)
            .create_async()
            .await;

        let result = client_for(&server).introspect("any").await.unwrap();
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn test_introspect_garbage_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/introspect")
            .with_status(200)
            .with_body("<html>gateway</html>")
            .create_async()
            .await;

        let err = client_for(&server).introspect("any").await.unwrap_err();
        assert!(matches!(err, SessionError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_register_returns_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/auth/register")
            .with_status(200)
            .with_body(json!({"message": "Đăng ký thành công", "code": 200}).to_string())
            .create_async()
            .await;

        let request = RegisterRequest {
            username: "bob".to_string(),
            password: "pw".to_string(),
            fullname: "Bob".to_string(),
            phone: "0900000000".to_string(),
            email: "bob@example.com".to_string(),
            address: "Hà Nội".to_string(),
        };

        let message = client_for(&server).register(&request).await.unwrap();
        assert_eq!(message, "Đăng ký thành công");
    }
}
