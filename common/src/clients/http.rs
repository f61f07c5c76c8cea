// Shared reqwest wrapper: timeout, status classification and retry

use crate::config::HttpConfig;
use crate::errors::ClientError;
use crate::retry::{with_retry, ExponentialBackoff, RetryStrategy};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// HTTP client shared by all collaborator clients
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry: Arc<dyn RetryStrategy>,
}

impl HttpClient {
    pub fn new(http: &HttpConfig) -> Result<Self, ClientError> {
        Self::with_retry(http, Arc::new(ExponentialBackoff::from_settings(http)))
    }

    pub fn with_retry(
        http: &HttpConfig,
        retry: Arc<dyn RetryStrategy>,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_seconds))
            .user_agent(concat!("qem-gate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Setup(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, retry })
    }

    /// Underlying reqwest client, for building requests
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send the request produced by `build`, retrying transient failures
    ///
    /// `build` is called once per attempt so every attempt is freshly signed.
    pub async fn send<F>(&self, url: &str, build: F) -> Result<Response, ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        with_retry(self.retry.as_ref(), url, || {
            let request = build();
            async move {
                let response = request.send().await.map_err(|e| ClientError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
                check_status(url, response).await
            }
        })
        .await
    }

    /// Send and decode a JSON response body
    pub async fn json<T, F>(&self, url: &str, build: F) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let response = self.send(url, build).await?;
        response.json::<T>().await.map_err(|e| ClientError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }

    /// Send and return the response body as text
    pub async fn text<F>(&self, url: &str, build: F) -> Result<String, ClientError>
    where
        F: Fn() -> RequestBuilder,
    {
        let response = self.send(url, build).await?;
        response.text().await.map_err(|e| ClientError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

async fn check_status(url: &str, response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    debug!(url = url, status = status.as_u16(), "Collaborator responded");
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}
