use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::LookupError;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

fn no_answer() -> String {
    "No remediation found.".to_string()
}

fn unknown_model() -> String {
    "unknown".to_string()
}

/// Answer returned by `POST /`. Missing fields take their fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupAnswer {
    #[serde(default = "no_answer")]
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "unknown_model")]
    pub model: String,
}

/// Subset of `GET /stats` we report at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupStats {
    #[serde(default)]
    pub total_documents: u64,
    #[serde(default)]
    pub llm_model: Option<String>,
}

#[derive(Serialize)]
struct LookupRequest<'a> {
    query: &'a str,
    n_results: u32,
}

/// Source of remediation answers for the worker pool.
#[async_trait]
pub trait RemediationLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<LookupAnswer, LookupError>;
}

/// HTTP client for the remediation lookup service.
#[derive(Debug, Clone)]
pub struct LookupClient {
    base: Url,
    http: Client,
    timeout: Duration,
    n_results: u32,
}

impl LookupClient {
    pub fn new(base_url: &str, timeout: Duration, n_results: u32) -> Result<Self, LookupError> {
        let trimmed = base_url.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/")).map_err(|e| LookupError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(LookupError::InvalidUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme {}", base.scheme()),
            });
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Connect(e.to_string()))?;

        Ok(Self {
            base,
            http,
            timeout,
            n_results,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn endpoint(&self, path: &str) -> Result<Url, LookupError> {
        self.base.join(path).map_err(|e| LookupError::InvalidUrl {
            url: format!("{}{path}", self.base),
            reason: e.to_string(),
        })
    }

    /// `GET /health` answered 200.
    pub async fn health(&self) -> bool {
        let Ok(url) = self.endpoint("health") else {
            return false;
        };
        match self.http.get(url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(error = %e, "health probe failed");
                false
            }
        }
    }

    pub async fn stats(&self) -> Result<LookupStats, LookupError> {
        let resp = self
            .http
            .get(self.endpoint("stats")?)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.decode(resp).await
    }

    fn transport_error(&self, e: reqwest::Error) -> LookupError {
        if e.is_timeout() {
            LookupError::Timeout(self.timeout)
        } else {
            LookupError::Connect(e.to_string())
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, LookupError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&body).map_err(|e| LookupError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RemediationLookup for LookupClient {
    async fn lookup(&self, query: &str) -> Result<LookupAnswer, LookupError> {
        let resp = self
            .http
            .post(self.base.clone())
            .json(&LookupRequest {
                query,
                n_results: self.n_results,
            })
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        self.decode(resp).await
    }
}
