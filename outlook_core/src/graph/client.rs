use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use super::{GraphApi, GraphRequest};
use crate::config::OutlookConfig;
use crate::error::ConnectorError;
use crate::oauth::TokenProvider;

const MAX_RETRIES: usize = 3; // total attempts = 1 + retries
const INITIAL_BACKOFF_MS: u64 = 800;

/// reqwest-backed [`GraphApi`] with bearer auth and backoff on 429/5xx.
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl GraphClient {
    pub fn new(
        config: &OutlookConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("outlook-mcp/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConnectorError::Other(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.graph_base().to_string(),
            tokens,
        })
    }

    /// Absolute URL for a request path. Absolute paths (continuation links)
    /// must stay on the configured Graph host so the bearer token is never
    /// sent elsewhere.
    fn url_for(&self, request: &GraphRequest) -> Result<String, ConnectorError> {
        if !request.is_absolute() {
            return Ok(format!(
                "{}/{}",
                self.base_url,
                request.path.trim_start_matches('/')
            ));
        }
        let target = url::Url::parse(&request.path)
            .map_err(|e| ConnectorError::InvalidInput(format!("bad next link: {}", e)))?;
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| ConnectorError::InvalidInput(format!("bad base url: {}", e)))?;
        if target.host_str() != base.host_str() || target.scheme() != base.scheme() {
            return Err(ConnectorError::InvalidInput(format!(
                "refusing to follow link to foreign host: {}",
                target.host_str().unwrap_or_default()
            )));
        }
        Ok(request.path.clone())
    }

    fn build(&self, request: &GraphRequest, url: &str, token: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .bearer_auth(token);
        if !request.query.is_empty() {
            let pairs: Vec<(&str, &str)> = request.query.iter().collect();
            builder = builder.query(&pairs);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }
}

/// Pull `error.message` out of a Graph error payload, falling back to the raw body.
fn graph_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.chars().take(300).collect())
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("Retry-After")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// POST is not idempotent (`sendMail`, `move`, event responses). Such a
/// request may only be resent when Graph provably did not act on it.
fn is_idempotent(method: &Method) -> bool {
    *method != Method::POST
}

/// 429 means the request was rejected unprocessed; a 5xx may arrive after the
/// work was done.
fn retryable_status(method: &Method, status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || (status.is_server_error() && is_idempotent(method))
}

/// Connect failures happen before anything is sent; a timeout may not.
fn retryable_transport(method: &Method, err: &reqwest::Error) -> bool {
    err.is_connect() || (err.is_timeout() && is_idempotent(method))
}

#[async_trait]
impl GraphApi for GraphClient {
    async fn send(&self, request: GraphRequest) -> Result<Value, ConnectorError> {
        let url = self.url_for(&request)?;
        let token = self.tokens.access_token().await?;
        let mut delay_ms = INITIAL_BACKOFF_MS;

        for attempt in 0..=MAX_RETRIES {
            debug!(method = %request.method, url = %url, attempt, "graph request");
            let resp = match self.build(&request, &url, &token).send().await {
                Ok(r) => r,
                Err(e) => {
                    if attempt == MAX_RETRIES || !retryable_transport(&request.method, &e) {
                        return Err(ConnectorError::HttpRequest(e));
                    }
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = (delay_ms as f64 * 1.6) as u64;
                    continue;
                }
            };

            let status = resp.status();
            if retryable_status(&request.method, status) {
                if attempt < MAX_RETRIES {
                    let wait = retry_after(&resp).unwrap_or(Duration::from_millis(delay_ms));
                    warn!(status = status.as_u16(), wait_ms = wait.as_millis() as u64, "graph throttled, retrying");
                    sleep(wait).await;
                    delay_ms = (delay_ms as f64 * 1.8) as u64;
                    continue;
                }
            }

            let body = resp.text().await.map_err(ConnectorError::HttpRequest)?;
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ConnectorError::Authentication(format!(
                    "Graph rejected the access token ({}): {}",
                    status.as_u16(),
                    graph_error_message(&body)
                )));
            }
            if !status.is_success() {
                return Err(ConnectorError::Upstream {
                    status: status.as_u16(),
                    message: graph_error_message(&body),
                });
            }
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&body).map_err(ConnectorError::SerdeJson);
        }

        Err(ConnectorError::Other(format!(
            "Graph request to {} failed after {} attempts",
            url,
            MAX_RETRIES + 1
        )))
    }
}
