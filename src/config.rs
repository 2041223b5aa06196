//! Pipeline configuration: TOML file, defaults, validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::Thresholds;
use crate::remediation::{DispatcherConfig, OverflowPolicy};
use crate::window::GroupBy;

/// Upper bound for `remediation.timeout_secs` (one day).
pub const MAX_LOOKUP_TIMEOUT_SECS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub kafka: KafkaConfig,
    pub window: WindowConfig,
    pub thresholds: Thresholds,
    pub remediation: RemediationConfig,
    pub publish: PublishConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaConfig {
    pub brokers: String,
    pub input_topic: String,
    pub output_topic: String,
    pub remediation_topic: String,
    pub group_id: String,
    /// Use a throwaway group so every retained record is read again.
    pub fresh_group: bool,
    pub commit_interval_ms: u64,
    pub offset_reset: String,
    pub security_protocol: Option<String>,
    pub sasl_mechanism: Option<String>,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// Passed through to librdkafka verbatim.
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".into(),
            input_topic: "raw_logs".into(),
            output_topic: "processed_alerts".into(),
            remediation_topic: "remediation_alerts".into(),
            group_id: "logpulse-stream".into(),
            fresh_group: false,
            commit_interval_ms: 1000,
            offset_reset: "earliest".into(),
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            properties: BTreeMap::new(),
        }
    }
}

impl KafkaConfig {
    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    /// Group id to join with. A fresh group gets a random suffix per call.
    pub fn effective_group_id(&self) -> String {
        if self.fresh_group {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{}-fresh-{}", self.group_id, &suffix[..8])
        } else {
            self.group_id.clone()
        }
    }

    #[cfg(feature = "kafka")]
    fn base_client_config(&self) -> rdkafka::config::ClientConfig {
        let mut cfg = rdkafka::config::ClientConfig::new();
        cfg.set("bootstrap.servers", &self.brokers);
        if let Some(v) = &self.security_protocol {
            cfg.set("security.protocol", v);
        }
        if let Some(v) = &self.sasl_mechanism {
            cfg.set("sasl.mechanisms", v);
        }
        if let Some(v) = &self.sasl_username {
            cfg.set("sasl.username", v);
        }
        if let Some(v) = &self.sasl_password {
            cfg.set("sasl.password", v);
        }
        for (k, v) in &self.properties {
            cfg.set(k, v);
        }
        cfg
    }

    #[cfg(feature = "kafka")]
    pub fn consumer_config(&self, group_id: &str) -> rdkafka::config::ClientConfig {
        let mut cfg = self.base_client_config();
        cfg.set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.offset_reset);
        cfg
    }

    #[cfg(feature = "kafka")]
    pub fn producer_config(&self) -> rdkafka::config::ClientConfig {
        let mut cfg = self.base_client_config();
        cfg.set("message.timeout.ms", "30000");
        cfg
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    pub duration_secs: u64,
    pub group_by: GroupBy,
    /// Flush open windows after this much input silence. 0 disables.
    pub idle_close_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration_secs: 15,
            group_by: GroupBy::Global,
            idle_close_secs: 0,
        }
    }
}

impl WindowConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn idle_close(&self) -> Option<Duration> {
        (self.idle_close_secs > 0).then(|| Duration::from_secs(self.idle_close_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemediationConfig {
    /// Lookup service base URL. Unset disables remediation.
    pub base_url: Option<String>,
    pub pool_size: usize,
    pub timeout_secs: u64,
    pub n_results: u32,
    /// Unset leaves the queue unbounded.
    pub queue_capacity: Option<usize>,
    pub overflow: OverflowPolicy,
    pub health_check: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            pool_size: 1,
            timeout_secs: 120,
            n_results: 5,
            queue_capacity: None,
            overflow: OverflowPolicy::Reject,
            health_check: true,
        }
    }
}

impl RemediationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            pool_size: self.pool_size,
            lookup_timeout: self.timeout(),
            queue_capacity: self.queue_capacity,
            overflow: self.overflow,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// When false alerts are classified and counted but not published.
    pub enabled: bool,
    pub retry_backoff_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_backoff_ms: 100,
        }
    }
}

impl PublishConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub bind: Option<String>,
}

impl PipelineConfig {
    /// Defaults when `path` is `None`, otherwise the file merged over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn remediation_enabled(&self) -> bool {
        self.remediation.base_url.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.window.duration_secs == 0 {
            return invalid("window.duration_secs must be greater than 0".into());
        }
        let rate = self.thresholds.error_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return invalid(format!("thresholds.error_rate must be within [0, 1], got {rate}"));
        }
        if self.kafka.input_topic.trim().is_empty()
            || self.kafka.output_topic.trim().is_empty()
            || self.kafka.remediation_topic.trim().is_empty()
        {
            return invalid("kafka topic names must not be empty".into());
        }
        if self.kafka.group_id.trim().is_empty() {
            return invalid("kafka.group_id must not be empty".into());
        }

        let r = &self.remediation;
        if r.pool_size == 0 {
            return invalid("remediation.pool_size must be greater than 0".into());
        }
        if r.timeout_secs == 0 || r.timeout_secs > MAX_LOOKUP_TIMEOUT_SECS {
            return invalid(format!(
                "remediation.timeout_secs must be within 1..={MAX_LOOKUP_TIMEOUT_SECS}, got {}",
                r.timeout_secs
            ));
        }
        if r.queue_capacity == Some(0) {
            return invalid("remediation.queue_capacity must be greater than 0".into());
        }
        if let Some(url) = &r.base_url {
            match reqwest::Url::parse(url) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                Ok(u) => return invalid(format!("remediation.base_url: unsupported scheme {}", u.scheme())),
                Err(e) => return invalid(format!("remediation.base_url {url:?}: {e}")),
            }
        }

        if let Some(bind) = &self.api.bind {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                return invalid(format!("api.bind {bind:?} is not a socket address"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.window.duration_secs, 15);
        assert_eq!(cfg.thresholds.spike_error_count, 5);
        assert_eq!(cfg.thresholds.error_rate, 0.1);
        assert_eq!(cfg.remediation.pool_size, 1);
        assert_eq!(cfg.remediation.timeout_secs, 120);
        assert_eq!(cfg.kafka.commit_interval_ms, 1000);
        assert_eq!(cfg.kafka.remediation_topic, "remediation_alerts");
        assert!(!cfg.remediation_enabled());
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[window]
duration_secs = 30
group_by = "service"

[thresholds]
spike_error_count = 10

[remediation]
base_url = "http://localhost:8000"
queue_capacity = 64
overflow = "block"
"#
        )
        .unwrap();

        let cfg = PipelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.window.duration(), Duration::from_secs(30));
        assert_eq!(cfg.window.group_by, GroupBy::Service);
        assert_eq!(cfg.thresholds.spike_error_count, 10);
        assert_eq!(cfg.thresholds.error_rate, 0.1);
        assert!(cfg.remediation_enabled());
        assert_eq!(cfg.remediation.dispatcher_config().queue_capacity, Some(64));
        assert_eq!(cfg.remediation.overflow, OverflowPolicy::Block);
        assert_eq!(cfg.kafka.brokers, "localhost:9092");
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]\nduraton_secs = 3").unwrap();
        assert!(matches!(
            PipelineConfig::load(Some(file.path())),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = PipelineConfig::load(Some(Path::new("/nonexistent/logpulse.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn validation_failures() {
        let cases: Vec<Box<dyn Fn(&mut PipelineConfig)>> = vec![
            Box::new(|c| c.window.duration_secs = 0),
            Box::new(|c| c.thresholds.error_rate = 1.5),
            Box::new(|c| c.thresholds.error_rate = f64::NAN),
            Box::new(|c| c.remediation.pool_size = 0),
            Box::new(|c| c.remediation.timeout_secs = 0),
            Box::new(|c| c.remediation.timeout_secs = u64::MAX),
            Box::new(|c| c.remediation.queue_capacity = Some(0)),
            Box::new(|c| c.remediation.base_url = Some("not a url".into())),
            Box::new(|c| c.remediation.base_url = Some("ftp://rag".into())),
            Box::new(|c| c.kafka.input_topic = " ".into()),
            Box::new(|c| c.api.bind = Some("localhost".into())),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut cfg = PipelineConfig::default();
            mutate(&mut cfg);
            assert!(
                matches!(cfg.validate(), Err(ConfigError::Invalid(_))),
                "case {i} should fail validation"
            );
        }
    }

    #[test]
    fn fresh_group_gets_unique_suffix() {
        let kafka = KafkaConfig {
            fresh_group: true,
            ..KafkaConfig::default()
        };
        let a = kafka.effective_group_id();
        let b = kafka.effective_group_id();
        assert!(a.starts_with("logpulse-stream-fresh-"));
        assert_eq!(a.len(), "logpulse-stream-fresh-".len() + 8);
        assert_ne!(a, b);
        assert_eq!(KafkaConfig::default().effective_group_id(), "logpulse-stream");
    }
}
