// Transport adapter: HTTP requests against the reservations API with a fixed
// timeout and retry-on-transient-failure policy. No caching happens here.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ClientConfig, RetryConfig};
use crate::error::{ClientError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    // Safe to repeat after a server-side failure
    pub fn is_idempotent(self) -> bool {
        !matches!(self, Method::Post)
    }

    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, TransportError> {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, TransportError> {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn with_body<B: Serialize>(mut self, body: &B) -> Result<Self, TransportError> {
        let value =
            serde_json::to_value(body).map_err(|e| TransportError::Encode(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    // Sends the request, retrying transient failures. Non-2xx responses that
    // survive the retry policy come back as TransportError::Status.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;
}

// Network failures and 429 are always retried; 5xx only for idempotent methods;
// other 4xx never.
pub fn should_retry(method: Method, error: &TransportError) -> bool {
    match error {
        TransportError::Network(_) | TransportError::Timeout(_) => true,
        TransportError::Status { status: 429, .. } => true,
        TransportError::Status { status, .. } if *status >= 500 => method.is_idempotent(),
        _ => false,
    }
}

// Exponential backoff with jitter to prevent thundering herd
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}

// Runs `attempt` until it succeeds, fails permanently, or max_retries retries are spent
pub async fn send_with_retry<F, Fut>(
    config: &RetryConfig,
    method: Method,
    mut attempt: F,
) -> Result<ApiResponse, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ApiResponse, TransportError>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Ok(response) => return Ok(response),
            Err(err) if retries < config.max_retries && should_retry(method, &err) => {
                let backoff = calculate_backoff(retries, config);
                retries += 1;
                warn!(%method, error = %err, retry = retries, ?backoff, "retrying request");
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

// reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
    retry_config: RetryConfig,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.timeout_ms,
            retry_config: config.retry_config.clone(),
        })
    }

    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), &url)
            .query(&request.query);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        debug!(method = %request.method, %url, status = status.as_u16(), "response received");

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    fn map_error(&self, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout_ms)
        } else {
            TransportError::from(err)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let request = &request;
        send_with_retry(&self.retry_config, request.method, move || self.execute(request)).await
    }
}
