use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::controller::ControllerConfig;
use crate::fetcher::FetcherConfig;

/// Global configuration loaded from `~/.config/dmscrape/config.toml`.
///
/// Everything here has a workable default; the file mainly exists to tune
/// pacing for mirrors of the host that throttle differently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Comment host to scrape.
    pub host: String,
    pub port: u16,
    pub user_agent: String,
    /// Maximum simultaneous workers (connections) per run.
    pub max_workers: usize,
    pub connect_timeout_secs: f64,
    pub read_timeout_secs: f64,
    /// Seconds between requests outside rush hours.
    pub normal_interval: f64,
    /// Seconds between requests during rush hours.
    pub busy_interval: f64,
    /// Fractional hours bounding the host's rush window; may wrap midnight.
    pub rush_start_hour: f64,
    pub rush_end_hour: f64,
    /// IANA zone the rush hours are expressed in; empty means local time.
    pub time_zone: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        let fetcher = FetcherConfig::default();
        let controller = ControllerConfig::default();
        Self {
            host: fetcher.host,
            port: fetcher.port,
            user_agent: fetcher.user_agent,
            max_workers: 6,
            connect_timeout_secs: fetcher.connect_timeout.as_secs_f64(),
            read_timeout_secs: fetcher.read_timeout.as_secs_f64(),
            normal_interval: controller.normal_interval,
            busy_interval: controller.busy_interval,
            rush_start_hour: controller.rush_start,
            rush_end_hour: controller.rush_end,
            time_zone: "Asia/Shanghai".to_string(),
        }
    }
}

impl ScrapeConfig {
    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            host: self.host.clone(),
            port: self.port,
            user_agent: self.user_agent.clone(),
            connect_timeout: Duration::from_secs_f64(self.connect_timeout_secs),
            read_timeout: Duration::from_secs_f64(self.read_timeout_secs),
        }
    }

    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let time_zone = if self.time_zone.is_empty() {
            None
        } else {
            Some(
                self.time_zone
                    .parse()
                    .map_err(|e| anyhow::anyhow!("unknown time zone {:?}: {e}", self.time_zone))?,
            )
        };
        Ok(ControllerConfig {
            normal_interval: self.normal_interval,
            busy_interval: self.busy_interval,
            rush_start: self.rush_start_hour,
            rush_end: self.rush_end_hour,
            time_zone,
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("dmscrape")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<ScrapeConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = ScrapeConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: ScrapeConfig =
        toml::from_str(&data).with_context(|| format!("invalid config at {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ScrapeConfig::default();
        assert_eq!(cfg.host, "comment.bilibili.com");
        assert_eq!(cfg.port, 80);
        assert_eq!(cfg.max_workers, 6);
        assert_eq!(cfg.read_timeout_secs, 14.0);
        assert_eq!(cfg.time_zone, "Asia/Shanghai");
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = ScrapeConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ScrapeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.host, cfg.host);
        assert_eq!(parsed.max_workers, cfg.max_workers);
        assert_eq!(parsed.busy_interval, cfg.busy_interval);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: ScrapeConfig = toml::from_str("max_workers = 12").unwrap();
        assert_eq!(cfg.max_workers, 12);
        assert_eq!(cfg.host, "comment.bilibili.com");
    }

    #[test]
    fn controller_config_parses_the_zone() {
        let cfg = ScrapeConfig::default();
        let controller = cfg.controller_config().unwrap();
        assert_eq!(controller.time_zone, Some(chrono_tz::Asia::Shanghai));

        let mut bad = ScrapeConfig::default();
        bad.time_zone = "Mars/Olympus_Mons".to_string();
        assert!(bad.controller_config().is_err());
    }
}
