//! Application and per-board configuration.
//!
//! `AppConfig` lives in `<config dir>/tubescope/config.toml`; every field has a
//! default so a missing file is fine. `TUBESCOPE_API_URL` and `TUBESCOPE_BOARD`
//! override the file. `BoardConfig` is the board's own `config.json` (keyword
//! weights, thresholds, scoring weights) as written by the ingestion side.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    api::{ApiSettings, DEFAULT_API_BASE_URL},
    error::{Result, TubescopeError},
    filter::ProductKeywords,
    rank::{RankThresholds, ScoringConfig, ScoringWeights},
};

pub const API_URL_ENV: &str = "TUBESCOPE_API_URL";
pub const BOARD_ENV: &str = "TUBESCOPE_BOARD";

/// Board keyword weights at or above this count as core keywords.
pub const CORE_KEYWORD_WEIGHT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub board_id: String,
    pub conversion_poll_secs: u64,
    pub conversion_max_attempts: u32,
    pub report_poll_secs: u64,
    pub report_max_attempts: u32,
    pub status_poll_secs: u64,
    pub status_max_attempts: u32,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub product_keywords: Vec<String>,
    pub pending_store: Option<PathBuf>,
    pub scoring: ScoringConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            board_id: "temp".to_string(),
            conversion_poll_secs: 5,
            conversion_max_attempts: 120,
            report_poll_secs: 5,
            report_max_attempts: 720,
            status_poll_secs: 2,
            status_max_attempts: 1800,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
            product_keywords: Vec::new(),
            pending_store: None,
            scoring: ScoringConfig::default(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tubescope").join("config.toml"))
}

impl AppConfig {
    /// Loads the file at `path` (or the default location), then applies env
    /// overrides. A missing file yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "config: loading");
                Self::from_toml_str(&std::fs::read_to_string(&path)?)?
            }
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(board) = lookup(BOARD_ENV).filter(|v| !v.trim().is_empty()) {
            self.board_id = board.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.board_id.trim().is_empty() {
            return Err(TubescopeError::config("board_id must not be empty"));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(TubescopeError::config("api_base_url must not be empty"));
        }
        self.scoring.thresholds.validate()
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            base_url: self.api_base_url.clone(),
            board_id: self.board_id.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn conversion_poll(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.conversion_poll_secs),
            max_attempts: self.conversion_max_attempts,
        }
    }

    pub fn report_poll(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.report_poll_secs),
            max_attempts: self.report_max_attempts,
        }
    }

    pub fn status_poll(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.status_poll_secs),
            max_attempts: self.status_max_attempts,
        }
    }

    pub fn product_keywords(&self) -> ProductKeywords {
        ProductKeywords::new(&self.product_keywords)
    }

    pub fn pending_store_path(&self) -> PathBuf {
        self.pending_store
            .clone()
            .unwrap_or_else(crate::store::default_store_path)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BoardConfig {
    #[serde(default)]
    pub keywords: BTreeMap<String, f64>,
    #[serde(default)]
    pub thresholds: Option<RankThresholds>,
    #[serde(default)]
    pub weights: Option<ScoringWeights>,
}

impl BoardConfig {
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        if let Some(thresholds) = &config.thresholds {
            thresholds.validate()?;
        }
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        Self::from_json_str(&tokio::fs::read_to_string(path).await?)
    }

    /// Layers the board's keywords, thresholds and weights over `base`.
    pub fn scoring(&self, base: &ScoringConfig) -> ScoringConfig {
        let mut scoring = base.clone();
        if !self.keywords.is_empty() {
            let (core, secondary): (Vec<_>, Vec<_>) = self
                .keywords
                .iter()
                .partition(|(_, weight)| **weight >= CORE_KEYWORD_WEIGHT);
            scoring.core_keywords = core.into_iter().map(|(k, _)| k.clone()).collect();
            scoring.secondary_keywords = secondary.into_iter().map(|(k, _)| k.clone()).collect();
        }
        if let Some(thresholds) = self.thresholds {
            scoring.thresholds = thresholds;
        }
        if let Some(weights) = self.weights {
            scoring.weights = weights;
        }
        scoring
    }

    pub fn product_keywords(&self) -> ProductKeywords {
        ProductKeywords::new(self.keywords.keys())
    }
}
