use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{SearchMode, SearchTerm};
use crate::error::KiraError;
use crate::orchestrator::SearchSettings;
use crate::query::FEATURE_ENDPOINT;
use crate::rate_limit::RateLimitPolicy;
use crate::retry::RetryPolicy;
use crate::transport::DEFAULT_BASE_URL;

pub const CONFIG_FILE: &str = "kira-fs.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub terms: Vec<TermEntry>,
    #[serde(default)]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub roster: Option<PathBuf>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default)]
    pub result_limit: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

/// A bare term uses the run-wide `mode`.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TermEntry {
    Shorthand(String),
    Detailed(TermEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TermEntryObject {
    pub term: String,
    #[serde(default)]
    pub mode: Option<SearchMode>,
}

/// Durations are in seconds.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub base_timeout: Option<f64>,
    #[serde(default)]
    pub max_timeout: Option<f64>,
    #[serde(default)]
    pub base_delay: Option<f64>,
    #[serde(default)]
    pub max_delay: Option<f64>,
    #[serde(default)]
    pub jitter: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RateLimitSection {
    #[serde(default)]
    pub base_delay: Option<f64>,
    #[serde(default)]
    pub jitter: Option<f64>,
    #[serde(default)]
    pub tier1_failures: Option<u32>,
    #[serde(default)]
    pub tier1_factor: Option<f64>,
    #[serde(default)]
    pub tier2_failures: Option<u32>,
    #[serde(default)]
    pub tier2_factor: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub terms: Vec<SearchTerm>,
    pub roster: Option<PathBuf>,
    pub limit: Option<usize>,
    pub base_url: String,
    pub search: SearchSettings,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitPolicy,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|err| KiraError::ConfigParse(err.to_string()))?;
        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let mut terms = Vec::new();
        let mut term_modes = BTreeMap::new();
        for entry in &config.terms {
            match entry {
                TermEntry::Shorthand(value) => terms.push(value.parse::<SearchTerm>()?),
                TermEntry::Detailed(obj) => {
                    let term = obj.term.parse::<SearchTerm>()?;
                    if let Some(mode) = obj.mode {
                        term_modes.entry(term.clone()).or_insert(mode);
                    }
                    terms.push(term);
                }
            }
        }

        let defaults = SearchSettings::default();
        let search = SearchSettings {
            mode: config.mode.unwrap_or(defaults.mode),
            term_modes,
            batch_size: config.batch_size.unwrap_or(defaults.batch_size),
            max_workers: config.max_workers.unwrap_or(defaults.max_workers),
            result_limit: config.result_limit.unwrap_or(defaults.result_limit),
            endpoint: FEATURE_ENDPOINT.to_string(),
        };

        let retry_defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: config.retry.max_retries.unwrap_or(retry_defaults.max_retries),
            base_timeout: seconds("retry.base_timeout", config.retry.base_timeout)?
                .unwrap_or(retry_defaults.base_timeout),
            max_timeout: seconds("retry.max_timeout", config.retry.max_timeout)?
                .unwrap_or(retry_defaults.max_timeout),
            base_delay: seconds("retry.base_delay", config.retry.base_delay)?
                .unwrap_or(retry_defaults.base_delay),
            max_delay: seconds("retry.max_delay", config.retry.max_delay)?
                .unwrap_or(retry_defaults.max_delay),
            jitter: seconds("retry.jitter", config.retry.jitter)?.unwrap_or(retry_defaults.jitter),
        };

        let rate_defaults = RateLimitPolicy::default();
        let section = &config.rate_limit;
        let rate_limit = RateLimitPolicy {
            base_delay: seconds("rate_limit.base_delay", section.base_delay)?
                .unwrap_or(rate_defaults.base_delay),
            jitter: seconds("rate_limit.jitter", section.jitter)?.unwrap_or(rate_defaults.jitter),
            tier1_failures: section
                .tier1_failures
                .unwrap_or(rate_defaults.tier1_failures),
            tier1_factor: factor("rate_limit.tier1_factor", section.tier1_factor)?
                .unwrap_or(rate_defaults.tier1_factor),
            tier2_failures: section
                .tier2_failures
                .unwrap_or(rate_defaults.tier2_failures),
            tier2_factor: factor("rate_limit.tier2_factor", section.tier2_factor)?
                .unwrap_or(rate_defaults.tier2_factor),
        };

        let resolved = ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            terms,
            roster: config.roster,
            limit: config.limit,
            base_url: config
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            search,
            retry,
            rate_limit,
        };
        resolved.validate()?;
        Ok(resolved)
    }
}

impl ResolvedConfig {
    /// Checks the settings that can also be changed after loading, such as
    /// command-line overrides.
    pub fn validate(&self) -> Result<(), KiraError> {
        if self.search.batch_size == 0 {
            return Err(KiraError::InvalidBatchSize);
        }
        if self.search.max_workers == 0 {
            return Err(KiraError::InvalidWorkerCount);
        }
        if self.search.result_limit == 0 {
            return Err(KiraError::InvalidConfig(
                "result_limit must be greater than zero".to_string(),
            ));
        }
        if self.retry.base_timeout.is_zero() || self.retry.max_timeout < self.retry.base_timeout {
            return Err(KiraError::InvalidConfig(
                "retry.max_timeout must be at least retry.base_timeout (> 0)".to_string(),
            ));
        }
        Ok(())
    }
}

fn seconds(field: &str, value: Option<f64>) -> Result<Option<Duration>, KiraError> {
    match value {
        None => Ok(None),
        Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|_| {
            KiraError::InvalidConfig(format!(
                "{field} must be a non-negative number of seconds, got {secs}"
            ))
        }),
    }
}

fn factor(field: &str, value: Option<f64>) -> Result<Option<f64>, KiraError> {
    match value {
        None => Ok(None),
        Some(factor) if factor.is_finite() && factor >= 1.0 => Ok(Some(factor)),
        Some(factor) => Err(KiraError::InvalidConfig(format!(
            "{field} must be >= 1.0, got {factor}"
        ))),
    }
}
