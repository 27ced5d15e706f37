use anyhow::Context;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::SessionManager;
use crate::error::SessionError;

/// Attaches the current bearer token to outgoing requests
///
/// Read-only and non-blocking: it never starts a session check or refreshes
/// a token. Without a token the request goes out unauthenticated and the
/// backend decides.
#[derive(Clone)]
pub struct RequestAuthorizer {
    session: Arc<SessionManager>,
}

impl RequestAuthorizer {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.current_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Backend API client used by every screen
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Adds the bearer token per attempt
    authorizer: RequestAuthorizer,

    /// Backend root, without a trailing slash
    base_url: String,

    /// Maximum number of retries
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        authorizer: RequestAuthorizer,
        connect_timeout: u64,
        request_timeout: u64,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            authorizer,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
            base_delay_ms: 500,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let response = self
            .execute(Method::GET, path, |req| req)
            .await?;
        response.json().await.map_err(SessionError::from_reqwest)
    }

    /// GET with query parameters and decode a JSON body
    pub async fn get_json_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, SessionError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let response = self
            .execute(Method::GET, path, |req| req.query(query))
            .await?;
        response.json().await.map_err(SessionError::from_reqwest)
    }

    /// POST a JSON body and decode the JSON answer
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, SessionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .execute(Method::POST, path, |req| req.json(body))
            .await?;
        response.json().await.map_err(SessionError::from_reqwest)
    }

    /// Send a request, re-authorizing and retrying on transient failures
    ///
    /// - 401: returned as `TokenInvalidOrExpired`; the session is not touched
    /// - 429 / 5xx / network errors: exponential backoff
    pub async fn execute<F>(
        &self,
        method: Method,
        path: &str,
        build: F,
    ) -> Result<Response, SessionError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path);
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let mut attempt = 0;

        loop {
            // Token is read per attempt so a login in between is picked up
            let request = self.authorizer.authorize(build(
                self.client
                    .request(method.clone(), &url)
                    .header("X-Request-Id", &request_id),
            ));

            tracing::debug!(
                request_id = %request_id,
                method = %method,
                url = %url,
                attempt = attempt + 1,
                "Sending API request"
            );

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response);
                    }

                    if status == StatusCode::UNAUTHORIZED {
                        tracing::warn!(request_id = %request_id, url = %url, "Backend rejected the access token");
                        return Err(SessionError::TokenInvalidOrExpired);
                    }

                    if is_retryable(status) && attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            "[{}] Received {}, retrying after {}ms (attempt {}/{})",
                            request_id,
                            status,
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    let message = response.text().await.unwrap_or_default();
                    tracing::error!(
                        request_id = %request_id,
                        status = status.as_u16(),
                        url = %url,
                        response_body = %message,
                        "API request failed"
                    );
                    return Err(SessionError::AuthorityError {
                        status: status.as_u16(),
                        message,
                    });
                }

                Err(e) => {
                    if attempt < self.max_retries && !e.is_builder() {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            "[{}] Request failed: {}, retrying after {}ms (attempt {}/{})",
                            request_id,
                            e,
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        request_id = %request_id,
                        error = %e,
                        url = %url,
                        total_attempts = attempt + 1,
                        "API request failed after all retries"
                    );
                    return Err(SessionError::from_reqwest(e));
                }
            }
        }
    }

    /// Exponential backoff: base_delay * 2^attempt, saturating
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        self.base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
