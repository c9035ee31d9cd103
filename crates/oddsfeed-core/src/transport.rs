//! HTTP transport for recovery requests.
//!
//! Recovery requests are body-less `POST`s; the only thing the issuer cares
//! about is whether the API accepted them. Socket-level concerns (pooling,
//! TLS, timeouts) belong to `reqwest`, configured once from [`ApiConfig`].

use async_trait::async_trait;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ApiError;

const ACCESS_TOKEN_HEADER: &str = "x-access-token";

/// Sends recovery requests to the control API.
#[async_trait]
pub trait RecoveryTransport: Send + Sync {
    /// POST to `url` and return the success status code.
    ///
    /// # Errors
    ///
    /// Any non-success status, time-out, or transport failure.
    async fn post(&self, url: &Url) -> Result<u16, ApiError>;
}

/// [`RecoveryTransport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpRecoveryTransport {
    http_client: reqwest::Client,
    access_token: Option<String>,
}

impl HttpRecoveryTransport {
    /// Build the transport from API configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Configuration`] if the HTTP client cannot be created.
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("oddsfeed-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl RecoveryTransport for HttpRecoveryTransport {
    async fn post(&self, url: &Url) -> Result<u16, ApiError> {
        let mut request = self.http_client.post(url.clone());
        if let Some(token) = &self.access_token {
            request = request.header(ACCESS_TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    url: url.to_string(),
                }
            } else {
                ApiError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(ApiError::HttpError {
                url: url.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        Ok(status.as_u16())
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
