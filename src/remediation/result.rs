use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LookupAnswer, LookupError};
use crate::detect::AlertRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationBody {
    pub answer: String,
    pub sources: Vec<String>,
    pub model: String,
}

impl From<LookupAnswer> for RemediationBody {
    fn from(a: LookupAnswer) -> Self {
        Self {
            answer: a.answer,
            sources: a.sources,
            model: a.model,
        }
    }
}

/// Outcome of one dispatched lookup, published keyed by service.
///
/// Success records carry `query` and `remediation`; failure records carry
/// `error` and `error_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationResult {
    pub original_alert: AlertRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<RemediationBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: ResultStatus,
}

impl RemediationResult {
    pub fn success(alert: AlertRecord, query: String, answer: LookupAnswer) -> Self {
        Self {
            original_alert: alert,
            query: Some(query),
            remediation: Some(answer.into()),
            error: None,
            error_type: None,
            timestamp: Utc::now(),
            status: ResultStatus::Success,
        }
    }

    pub fn failure(alert: AlertRecord, err: &LookupError) -> Self {
        Self {
            original_alert: alert,
            query: None,
            remediation: None,
            error: Some(err.to_string()),
            error_type: Some(err.error_type().to_string()),
            timestamp: Utc::now(),
            status: ResultStatus::Failed,
        }
    }

    pub fn service(&self) -> &str {
        &self.original_alert.service
    }

    /// One-line summary for logs.
    pub fn detail(&self) -> String {
        match (&self.remediation, &self.error) {
            (Some(body), _) => format!("{} sources, model {}", body.sources.len(), body.model),
            (None, Some(err)) => err.clone(),
            (None, None) => String::new(),
        }
    }
}
