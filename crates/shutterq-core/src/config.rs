//! Pipeline configuration.
//!
//! Defaults cover a phone-sized deployment. A JSON file may override any
//! subset of fields, and `SHUTTERQ_*` environment variables override both.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::RetryPolicy;
use crate::transform::{ToneMap, TransformConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidVar {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub multiplier: f64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            multiplier: 2.0,
            max_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on simultaneous uploads (and worker count).
    pub max_concurrent: usize,

    /// Sent attempts before a retryable failure becomes terminal.
    pub max_attempts: u32,

    pub backoff: BackoffConfig,

    pub upload_timeout_ms: u64,

    /// How long uploaded records are kept before pruning.
    pub retention_secs: u64,

    pub retention_sweep_secs: u64,

    pub drain_on_enqueue: bool,

    pub transform: TransformConfig,

    /// Root of the task and payload stores.
    pub data_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_attempts: 3,
            backoff: BackoffConfig::default(),
            upload_timeout_ms: 30_000,
            retention_secs: 86_400,
            retention_sweep_secs: 600,
            drain_on_enqueue: true,
            transform: TransformConfig::default(),
            data_dir: PathBuf::from("./shutterq-data"),
        }
    }
}

impl PipelineConfig {
    /// Load a JSON file; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `SHUTTERQ_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overridden_by(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup` (keyed by `SHUTTERQ_*` names), then validate.
    pub fn overridden_by(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        set(&lookup, "SHUTTERQ_MAX_CONCURRENT", &mut self.max_concurrent)?;
        set(&lookup, "SHUTTERQ_MAX_ATTEMPTS", &mut self.max_attempts)?;
        set(&lookup, "SHUTTERQ_BACKOFF_BASE_MS", &mut self.backoff.base_ms)?;
        set(&lookup, "SHUTTERQ_BACKOFF_MULTIPLIER", &mut self.backoff.multiplier)?;
        set(&lookup, "SHUTTERQ_BACKOFF_MAX_MS", &mut self.backoff.max_ms)?;
        set(&lookup, "SHUTTERQ_UPLOAD_TIMEOUT_MS", &mut self.upload_timeout_ms)?;
        set(&lookup, "SHUTTERQ_RETENTION_SECS", &mut self.retention_secs)?;
        set(&lookup, "SHUTTERQ_RETENTION_SWEEP_SECS", &mut self.retention_sweep_secs)?;
        set(&lookup, "SHUTTERQ_DRAIN_ON_ENQUEUE", &mut self.drain_on_enqueue)?;
        set(&lookup, "SHUTTERQ_MAX_LONG_EDGE", &mut self.transform.max_long_edge)?;
        set(&lookup, "SHUTTERQ_JPEG_QUALITY", &mut self.transform.quality)?;
        set(&lookup, "SHUTTERQ_DATA_DIR", &mut self.data_dir)?;

        if let Some(value) = lookup("SHUTTERQ_TONE") {
            self.transform.tone = match value.trim() {
                "" | "none" => None,
                other => Some(other.parse::<ToneMap>().map_err(|e| ConfigError::InvalidVar {
                    key: "SHUTTERQ_TONE",
                    value: value.clone(),
                    reason: e.to_string(),
                })?),
            };
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if !(1..=100).contains(&self.transform.quality) {
            return invalid("transform.quality must be within 1..=100");
        }
        if self.transform.max_long_edge == 0 {
            return invalid("transform.max_long_edge must be at least 1");
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return invalid("backoff.multiplier must be at least 1.0");
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            return invalid("backoff.max_ms must not be below backoff.base_ms");
        }
        if self.upload_timeout_ms == 0 {
            return invalid("upload_timeout_ms must be at least 1");
        }
        if self.retention_sweep_secs == 0 {
            return invalid("retention_sweep_secs must be at least 1");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff.base_ms),
            multiplier: self.backoff.multiplier,
            max_delay: Duration::from_millis(self.backoff.max_ms),
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn retention_sweep(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    pub fn payloads_dir(&self) -> PathBuf {
        self.data_dir.join("payloads")
    }
}

fn set<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = lookup(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidVar {
                key,
                value: value.clone(),
                reason: e.to_string(),
            })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid_and_match_documented_schedule() {
        let config = PipelineConfig::default();
        config.validate().unwrap();

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
        assert_eq!(config.tasks_dir(), PathBuf::from("./shutterq-data/tasks"));
    }

    #[test]
    fn env_overrides_apply() {
        let config = PipelineConfig::default()
            .overridden_by(vars(&[
                ("SHUTTERQ_MAX_CONCURRENT", "5"),
                ("SHUTTERQ_BACKOFF_BASE_MS", "100"),
                ("SHUTTERQ_DRAIN_ON_ENQUEUE", "false"),
                ("SHUTTERQ_TONE", "mono"),
                ("SHUTTERQ_DATA_DIR", "/tmp/q"),
            ]))
            .unwrap();

        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.backoff.base_ms, 100);
        assert!(!config.drain_on_enqueue);
        assert_eq!(config.transform.tone, Some(ToneMap::Mono));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/q"));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn unparsable_env_value_names_the_key() {
        let err = PipelineConfig::default()
            .overridden_by(vars(&[("SHUTTERQ_MAX_ATTEMPTS", "many")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidVar { key: "SHUTTERQ_MAX_ATTEMPTS", .. }));
    }

    #[rstest]
    #[case("SHUTTERQ_MAX_CONCURRENT", "0")]
    #[case("SHUTTERQ_MAX_ATTEMPTS", "0")]
    #[case("SHUTTERQ_JPEG_QUALITY", "0")]
    #[case("SHUTTERQ_MAX_LONG_EDGE", "0")]
    #[case("SHUTTERQ_BACKOFF_MULTIPLIER", "0.5")]
    #[case("SHUTTERQ_BACKOFF_MAX_MS", "10")]
    #[case("SHUTTERQ_UPLOAD_TIMEOUT_MS", "0")]
    fn out_of_range_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let err = PipelineConfig::default()
            .overridden_by(vars(&[(key, value)]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn json_file_overrides_subset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutterq.json");
        std::fs::write(
            &path,
            r#"{ "max_concurrent": 2, "transform": { "quality": 70, "tone": "warm" } }"#,
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();

        assert_eq!(config.max_concurrent, 2);
        assert_eq!(config.transform.quality, 70);
        assert_eq!(config.transform.tone, Some(ToneMap::Warm));
        assert_eq!(config.transform.max_long_edge, 2048);
        assert_eq!(config.upload_timeout_ms, 30_000);
    }

    #[test]
    fn missing_or_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let missing = PipelineConfig::from_json_file(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ max_concurrent: ").unwrap();
        assert!(matches!(
            PipelineConfig::from_json_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
