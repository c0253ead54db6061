use figment::{providers::Env, Figment};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::id::IdStrategy;
use crate::sniff::{ContentFilter, FilterPolicy};

/// Read from Rocket's figment (`Rocket.toml`, `ROCKET_*`), with `PIMBIN_*`
/// environment variables taking precedence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PimbinConfig {
    pub database_url: String,
    pub uploads_dir: PathBuf,
    /// public prefix of paste urls
    pub base_url: String,
    /// in bytes, whole multipart body
    pub max_body_size: u64,
    /// `filter_types` is an allow-list when set, a deny-list otherwise
    pub filter_allow: bool,
    pub filter_types: Vec<String>,
    pub id_strategy: IdStrategy,
    pub id_interval_ms: u64,
}

impl Default for PimbinConfig {
    fn default() -> Self {
        Self {
            database_url: "pimbin.db".to_string(),
            uploads_dir: PathBuf::from("uploads"),
            base_url: "http://localhost:8000/".to_string(),
            max_body_size: 512_000_000,
            filter_allow: false,
            filter_types: Vec::new(),
            id_strategy: IdStrategy::default(),
            id_interval_ms: 1000,
        }
    }
}

pub fn figment() -> Figment {
    rocket::Config::figment().merge(Env::prefixed("PIMBIN_").global())
}

impl PimbinConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, figment::Error> {
        let mut config: PimbinConfig = figment.extract()?;
        if !config.base_url.ends_with('/') {
            config.base_url.push('/');
        }
        Ok(config)
    }

    pub fn content_filter(&self) -> ContentFilter {
        let policy = if self.filter_allow {
            FilterPolicy::Allow
        } else {
            FilterPolicy::Deny
        };
        ContentFilter::new(policy, &self.filter_types)
    }

    pub fn id_interval(&self) -> Duration {
        Duration::from_millis(self.id_interval_ms.max(1))
    }
}
