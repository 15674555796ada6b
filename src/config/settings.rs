//! Application settings.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::models::{InstanceRecord, Source};
use crate::rate_limit::{BackoffConfig, LimitConfig};
use crate::registry::RegistryConfig;
use crate::scheduler::{CronSchedule, SchedulerConfig, SchedulesConfig};
use crate::scrapers::ScraperConfig;

use super::ConfigError;

/// Per-source limits plus the optional shared window store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Redis URL shared by every instance's window counters.
    pub redis_url: Option<String>,
    pub stats: LimitConfig,
    pub wiki: LimitConfig,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            stats: LimitConfig::default_for(Source::Stats),
            wiki: LimitConfig::default_for(Source::Wiki),
        }
    }
}

impl LimitsConfig {
    pub fn by_source(&self) -> HashMap<Source, LimitConfig> {
        HashMap::from([
            (Source::Stats, self.stats.clone()),
            (Source::Wiki, self.wiki.clone()),
        ])
    }
}

/// Application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Registry identity; a random `collector-*` id when unset.
    pub instance_id: Option<String>,
    /// Player ranking pages split across active instances.
    pub total_pages: u32,
    /// Detail-fetch workers per fan-out.
    pub worker_count: usize,
    pub scheduler: SchedulerConfig,
    pub backoff: BackoffConfig,
    pub limits: LimitsConfig,
    pub cache: CacheConfig,
    pub registry: RegistryConfig,
    pub scrapers: ScraperConfig,
    pub schedules: SchedulesConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instance_id: None,
            total_pages: 10,
            worker_count: 4,
            scheduler: SchedulerConfig::default(),
            backoff: BackoffConfig::default(),
            limits: LimitsConfig::default(),
            cache: CacheConfig::default(),
            registry: RegistryConfig::default(),
            scrapers: ScraperConfig::default(),
            schedules: SchedulesConfig::default(),
        }
    }
}

impl Settings {
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
        let settings = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Apply `ROSTERWATCH_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|s| !s.trim().is_empty());

        if let Some(url) = get("ROSTERWATCH_REDIS_URL") {
            tracing::debug!("Using ROSTERWATCH_REDIS_URL from environment");
            self.cache.redis_url = Some(url.clone());
            self.registry.redis_url = Some(url.clone());
            self.limits.redis_url = Some(url);
        }
        if let Some(id) = get("ROSTERWATCH_INSTANCE_ID") {
            self.instance_id = Some(id);
        }
        if let Some(count) = parse_var(&get, "ROSTERWATCH_WORKER_COUNT")? {
            self.worker_count = count;
        }
        if let Some(pages) = parse_var(&get, "ROSTERWATCH_TOTAL_PAGES")? {
            self.total_pages = pages;
        }
        if let Some(retries) = parse_var(&get, "ROSTERWATCH_MAX_RETRIES")? {
            self.scheduler.retry.max_retries = retries;
        }
        if let Some(step) = parse_var(&get, "ROSTERWATCH_PRIORITY_DECAY")? {
            self.scheduler.retry.decay_step = step;
        }

        let spacing: Option<u64> = parse_var(&get, "ROSTERWATCH_WIKI_SPACING_MS")?;
        let parse_spacing: Option<u64> = parse_var(&get, "ROSTERWATCH_WIKI_PARSE_SPACING_MS")?;
        if spacing.is_some() || parse_spacing.is_some() {
            let (current_min, current_parse) = match &self.limits.wiki {
                LimitConfig::Spacing {
                    min_spacing_ms,
                    parse_spacing_ms,
                } => (*min_spacing_ms, *parse_spacing_ms),
                LimitConfig::Window { .. } => match LimitConfig::default_for(Source::Wiki) {
                    LimitConfig::Spacing {
                        min_spacing_ms,
                        parse_spacing_ms,
                    } => (min_spacing_ms, parse_spacing_ms),
                    LimitConfig::Window { .. } => (0, 0),
                },
            };
            self.limits.wiki = LimitConfig::Spacing {
                min_spacing_ms: spacing.unwrap_or(current_min),
                parse_spacing_ms: parse_spacing.unwrap_or(current_parse),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_pages == 0 {
            return Err(ConfigError::Invalid("total_pages must be at least 1".into()));
        }
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid("worker_count must be at least 1".into()));
        }
        if self.registry.heartbeat_interval_secs == 0
            || self.registry.heartbeat_interval_secs >= self.registry.heartbeat_ttl_secs
        {
            return Err(ConfigError::Invalid(format!(
                "registry.heartbeat_interval_secs ({}) must be non-zero and below heartbeat_ttl_secs ({})",
                self.registry.heartbeat_interval_secs, self.registry.heartbeat_ttl_secs
            )));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::Invalid(
                "backoff.base_delay_ms exceeds backoff.max_delay_ms".into(),
            ));
        }
        for (source, limit) in self.limits.by_source() {
            limit
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("limits.{}: {}", source, e)))?;
        }
        for expr in [
            &self.schedules.daily_basic,
            &self.schedules.weekly_player_details,
            &self.schedules.biweekly_earnings,
            &self.schedules.daily_tournaments,
            &self.schedules.weekly_teams,
        ] {
            CronSchedule::parse(expr).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(InstanceRecord::generate_id)
    }
}

fn parse_var<T, G>(get: &G, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[tokio::test]
    async fn test_load_partial_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
total_pages = 25

[scheduler.retry]
max_retries = 5

[limits.stats]
kind = "window"
tiers = [{{ requests = 10, period_ms = 1000 }}]

[schedules]
weekly_teams = "0 30 7 * * Tue"
"#
        )
        .unwrap();

        let settings = Settings::load_from_path(file.path()).await.unwrap();
        assert_eq!(settings.total_pages, 25);
        assert_eq!(settings.scheduler.retry.max_retries, 5);
        assert_eq!(settings.scheduler.retry.decay_step, 1);
        assert_eq!(settings.schedules.weekly_teams, "0 30 7 * * Tue");
        assert_eq!(settings.limits.wiki, LimitConfig::default_for(Source::Wiki));
        assert!(settings.validate().is_ok());
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Settings::load_from_path(&dir.path().join("nope.toml")).await;
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn test_bad_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "total_pages = \"many\"").unwrap();
        let result = Settings::load_from_path(file.path()).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("ROSTERWATCH_REDIS_URL", "redis://cache:6379"),
                ("ROSTERWATCH_INSTANCE_ID", "collector-2"),
                ("ROSTERWATCH_WORKER_COUNT", "8"),
                ("ROSTERWATCH_MAX_RETRIES", "2"),
                ("ROSTERWATCH_PRIORITY_DECAY", "3"),
                ("ROSTERWATCH_WIKI_PARSE_SPACING_MS", "45000"),
                ("ROSTERWATCH_TOTAL_PAGES", ""),
            ]))
            .unwrap();

        assert_eq!(settings.cache.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(settings.registry.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(settings.instance_id(), "collector-2");
        assert_eq!(settings.worker_count, 8);
        assert_eq!(settings.total_pages, 10);
        assert_eq!(settings.scheduler.retry.max_retries, 2);
        assert_eq!(settings.scheduler.retry.decay_step, 3);
        assert_eq!(
            settings.limits.wiki,
            LimitConfig::Spacing {
                min_spacing_ms: 2_000,
                parse_spacing_ms: 45_000,
            }
        );
    }

    #[test]
    fn test_env_value_must_parse() {
        let mut settings = Settings::default();
        let result = settings.apply_env(env(&[("ROSTERWATCH_WORKER_COUNT", "lots")]));
        assert!(matches!(result, Err(ConfigError::Env { var, .. }) if var == "ROSTERWATCH_WORKER_COUNT"));
    }

    #[test]
    fn test_heartbeat_must_beat_ttl() {
        let mut settings = Settings::default();
        settings.registry.heartbeat_interval_secs = settings.registry.heartbeat_ttl_secs;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let mut settings = Settings::default();
        settings.schedules.daily_tournaments = "daily".to_string();
        assert!(settings.validate().is_err());
    }
}
