//! Service configuration loaded from TOML.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{ResourceType, Style};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub providers: ProviderConfig,
    pub retry: RetryPolicy,
    pub styling: StyleTable,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub data_dir: PathBuf,
    pub resource_ttl_hours: i64,
    pub query_ttl_hours: i64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/refuge"),
            resource_ttl_hours: 7 * 24,
            query_ttl_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

impl CacheConfig {
    pub fn resource_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.resource_ttl_hours)
    }

    pub fn query_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.query_ttl_hours)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub base_radius_degrees: f64,
    pub km_per_degree: f64,
    /// Candidates scoring below this are dropped
    pub min_confidence: f64,
    pub normalize_concurrency: usize,
    pub geo_cache_min_hits: usize,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_radius_degrees: 0.01,
            km_per_degree: 111.0,
            min_confidence: 0.15,
            normalize_concurrency: 8,
            geo_cache_min_hits: 1,
            min_zoom: 0.0,
            max_zoom: 22.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProviderConfig {
    pub user_agent: String,
    pub overpass_url: String,
    pub overpass_timeout_secs: u64,
    pub nominatim_url: String,
    pub reverse_timeout_secs: u64,
    pub forward_timeout_secs: u64,
    pub nominatim_requests_per_second: u32,
    pub places_url: String,
    pub places_api_key: Option<String>,
    pub places_timeout_secs: u64,
    pub places_min_radius_m: f64,
    pub places_max_radius_m: f64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            user_agent: "Refuge/0.1 (resource locator)".to_string(),
            overpass_url: "https://overpass-api.de/api/interpreter".to_string(),
            overpass_timeout_secs: 30,
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            reverse_timeout_secs: 3,
            forward_timeout_secs: 5,
            nominatim_requests_per_second: 1,
            places_url: "https://maps.googleapis.com/maps/api/place/nearbysearch/json"
                .to_string(),
            places_api_key: None,
            places_timeout_secs: 10,
            places_min_radius_m: 10_000.0,
            places_max_radius_m: 50_000.0,
        }
    }
}

impl ProviderConfig {
    pub fn reverse_timeout(&self) -> Duration {
        Duration::from_secs(self.reverse_timeout_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

/// Exponential backoff for rate-limited provider calls
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Color/icon table keyed by resource type name
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StyleTable {
    pub types: HashMap<String, Style>,
    pub fallback: Style,
}

impl Default for StyleTable {
    fn default() -> Self {
        let types = HashMap::from([
            ("legal".to_string(), Style::new("#8b5cf6", "⚖️")),
            ("shelter".to_string(), Style::new("#3b82f6", "🏠")),
            ("healthcare".to_string(), Style::new("#ef4444", "🏥")),
            ("food".to_string(), Style::new("#22c55e", "🍽️")),
        ]);

        Self {
            types,
            fallback: Style::new("#666666", "📍"),
        }
    }
}

impl StyleTable {
    pub fn style_for(&self, resource_type: ResourceType) -> &Style {
        self.style_for_name(resource_type.as_str())
    }

    /// Unknown names get the neutral fallback
    pub fn style_for_name(&self, name: &str) -> &Style {
        self.types.get(name).unwrap_or(&self.fallback)
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Load from `path` if given, else defaults; fill the Places key from the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };

        if config.providers.places_api_key.is_none() {
            config.providers.places_api_key = std::env::var("GOOGLE_PLACES_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [search]
            min_confidence = 0.05

            [cache]
            query_ttl_hours = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.search.min_confidence, 0.05);
        assert_eq!(config.search.base_radius_degrees, 0.01);
        assert_eq!(config.cache.query_ttl_hours, 6);
        assert_eq!(config.cache.resource_ttl_hours, 168);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 100,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_style_table_fallback() {
        let table = StyleTable::default();
        assert_eq!(table.style_for(ResourceType::Legal).color, "#8b5cf6");
        assert_eq!(table.style_for(ResourceType::Food).icon, "🍽️");
        assert_eq!(table.style_for_name("parking").color, "#666666");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refuge.toml");
        fs::write(&path, "[providers]\noverpass_timeout_secs = 12\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.providers.overpass_timeout_secs, 12);
        assert_eq!(config.providers.reverse_timeout_secs, 3);
    }
}
