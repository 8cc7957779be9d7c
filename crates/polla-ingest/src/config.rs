//! Pipeline configuration: defaults, JSON file, `POLLA_*` environment.
//!
//! Resolution order is defaults, then file, then environment, then the
//! caller's explicit overrides (the CLI flags).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::model::SourceId;
use crate::parse::ParserKind;

pub const DEFAULT_USER_AGENT: &str = "polla-ingest/0.1 (+https://github.com/polla-transparency)";
pub const DEFAULT_PRIMARY_URL: &str = "https://resultadoslotochile.com/pozo-para-el-proximo-sorteo/";
pub const DEFAULT_FALLBACK_URL: &str = "https://www.openloto.cl/pozo-del-loto.html";

fn default_discover_limit() -> usize {
    3
}

/// One configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,
    pub parser: ParserKind,
    /// Page to fetch directly.
    #[serde(default)]
    pub url: Option<String>,
    /// Index page listing result articles, used when `url` is unset.
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default = "default_discover_limit")]
    pub discover_limit: usize,
}

impl SourceConfig {
    pub fn direct(id: SourceId, parser: ParserKind, url: &str) -> Self {
        Self {
            id,
            parser,
            url: Some(url.to_string()),
            index_url: None,
            discover_limit: default_discover_limit(),
        }
    }
}

/// Everything a run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// In priority order.
    pub sources: Vec<SourceConfig>,
    /// Source id to URL, replacing the configured location.
    pub source_overrides: HashMap<String, String>,
    pub mismatch_threshold: f64,
    /// Extra attempts after the first failed fetch.
    pub retries: u32,
    pub timeout_secs: u64,
    pub retry_backoff_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub fail_fast: bool,
    pub force_publish: bool,
    pub user_agent: String,
    pub requests_per_second: Option<f64>,
    pub run_deadline_secs: u64,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig::direct(
                    SourceId::Primary,
                    ParserKind::PozoTable,
                    DEFAULT_PRIMARY_URL,
                ),
                SourceConfig::direct(
                    SourceId::Fallback,
                    ParserKind::PozoTable,
                    DEFAULT_FALLBACK_URL,
                ),
            ],
            source_overrides: HashMap::new(),
            mismatch_threshold: 0.05,
            retries: 2,
            timeout_secs: 20,
            retry_backoff_ms: 2_000,
            rate_limit_backoff_ms: 60_000,
            fail_fast: false,
            force_publish: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            requests_per_second: None,
            run_deadline_secs: 300,
            output_dir: PathBuf::from("artifacts"),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigurationError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigurationError(format!("{name}: cannot parse {raw:?}")))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigurationError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigurationError(format!("{name}: expected a boolean, got {raw:?}"))),
    }
}

/// Split a `source=url` override.
pub fn parse_override(raw: &str) -> Result<(String, String), ConfigurationError> {
    match raw.split_once('=') {
        Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => {
            Ok((id.trim().to_string(), url.trim().to_string()))
        }
        _ => Err(ConfigurationError(format!(
            "override must look like source=url, got {raw:?}"
        ))),
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| ConfigurationError(format!("invalid config {}: {e}", path.display())))
    }

    /// Apply `POLLA_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigurationError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `POLLA_*` variables from an arbitrary lookup.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigurationError> {
        if let Some(v) = lookup("POLLA_MISMATCH_THRESHOLD") {
            self.mismatch_threshold = parse_env("POLLA_MISMATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("POLLA_RETRIES") {
            self.retries = parse_env("POLLA_RETRIES", &v)?;
        }
        if let Some(v) = lookup("POLLA_TIMEOUT") {
            self.timeout_secs = parse_env("POLLA_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("POLLA_FAIL_FAST") {
            self.fail_fast = parse_bool("POLLA_FAIL_FAST", &v)?;
        }
        if let Some(v) = lookup("POLLA_FORCE_PUBLISH") {
            self.force_publish = parse_bool("POLLA_FORCE_PUBLISH", &v)?;
        }
        if let Some(v) = lookup("POLLA_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("POLLA_RPS") {
            self.requests_per_second = Some(parse_env("POLLA_RPS", &v)?);
        }
        if let Some(v) = lookup("POLLA_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Reject configurations a run cannot start with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.mismatch_threshold.is_finite() || self.mismatch_threshold < 0.0 {
            return Err(ConfigurationError(format!(
                "mismatch_threshold must be a non-negative number, got {}",
                self.mismatch_threshold
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigurationError("timeout_secs must be positive".into()));
        }
        if self.run_deadline_secs == 0 {
            return Err(ConfigurationError("run_deadline_secs must be positive".into()));
        }
        if let Some(rps) = self.requests_per_second {
            if !rps.is_finite() || rps <= 0.0 {
                return Err(ConfigurationError(format!(
                    "requests_per_second must be positive, got {rps}"
                )));
            }
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigurationError("user_agent must not be empty".into()));
        }
        if self.sources.is_empty() {
            return Err(ConfigurationError("no sources configured".into()));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.id) {
                return Err(ConfigurationError(format!("duplicate source id {}", source.id)));
            }
            if self.override_for(source.id).is_none()
                && source.url.is_none()
                && source.index_url.is_none()
            {
                return Err(ConfigurationError(format!(
                    "source {} has neither url nor index_url",
                    source.id
                )));
            }
        }

        for name in self.source_overrides.keys() {
            match SourceId::from_name(name) {
                Some(id) if seen.contains(&id) => {}
                _ => {
                    return Err(ConfigurationError(format!(
                        "override names unknown source {name:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    /// The operator-supplied URL for `id`, if any.
    pub fn override_for(&self, id: SourceId) -> Option<&str> {
        self.source_overrides
            .iter()
            .find(|(name, _)| SourceId::from_name(name) == Some(id))
            .map(|(_, url)| url.as_str())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_millis(self.rate_limit_backoff_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sources[0].id, SourceId::Primary);
        assert_eq!(config.mismatch_threshold, 0.05);
        assert_eq!(config.rate_limit_backoff(), Duration::from_secs(60));
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = PipelineConfig::default();
        config
            .apply_env_from(env(&[
                ("POLLA_MISMATCH_THRESHOLD", "0.1"),
                ("POLLA_RETRIES", "0"),
                ("POLLA_FAIL_FAST", "true"),
                ("POLLA_RPS", "0.5"),
                ("POLLA_OUTPUT_DIR", "/tmp/polla"),
            ]))
            .unwrap();
        assert_eq!(config.mismatch_threshold, 0.1);
        assert_eq!(config.retries, 0);
        assert!(config.fail_fast);
        assert!(!config.force_publish);
        assert_eq!(config.requests_per_second, Some(0.5));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/polla"));
    }

    #[test]
    fn test_apply_env_rejects_garbage() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env_from(env(&[("POLLA_RETRIES", "many")]))
            .unwrap_err();
        assert!(err.0.contains("POLLA_RETRIES"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.mismatch_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.requests_per_second = Some(0.0);
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sources[1].id = SourceId::Primary;
        assert!(config.validate().unwrap_err().0.contains("duplicate"));

        let mut config = PipelineConfig::default();
        config
            .source_overrides
            .insert("tertiary".into(), "https://x.test".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_override_satisfies_missing_url() {
        let mut config = PipelineConfig::default();
        config.sources[0].url = None;
        assert!(config.validate().is_err());
        config
            .source_overrides
            .insert("primary".into(), "https://mirror.test/pozo".into());
        config.validate().unwrap();
        assert_eq!(config.override_for(SourceId::Primary), Some("https://mirror.test/pozo"));
        assert_eq!(config.override_for(SourceId::Fallback), None);
    }

    #[test]
    fn test_from_file_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polla.json");
        std::fs::write(
            &path,
            r#"{
                "mismatch_threshold": 0.2,
                "sources": [
                    {"id": "primary", "parser": "t13", "index_url": "https://www.t13.cl/etiqueta/loto"},
                    {"id": "fallback", "parser": "horas24", "url": "https://www.24horas.cl/x"}
                ]
            }"#,
        )
        .unwrap();
        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.mismatch_threshold, 0.2);
        assert_eq!(config.retries, 2);
        assert_eq!(config.sources[0].parser, ParserKind::T13);
        assert_eq!(config.sources[0].discover_limit, 3);
        config.validate().unwrap();

        std::fs::write(&path, "{not json").unwrap();
        assert!(PipelineConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_parse_override() {
        assert_eq!(
            parse_override("fallback=https://a.test/x?y=1").unwrap(),
            ("fallback".to_string(), "https://a.test/x?y=1".to_string())
        );
        assert!(parse_override("fallback").is_err());
        assert!(parse_override("=https://a.test").is_err());
    }
}
