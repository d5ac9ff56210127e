// src/config.rs

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use uuid::Uuid;

use crate::services::orchestrator::ScrapeFailurePolicy;

/// Tunables the pipeline itself needs, independent of where it runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Month windows fetched at the same time.
    pub scrape_workers: usize,
    /// Minimum spacing between outbound scrape requests. Zero disables the limiter.
    pub scrape_interval: Duration,
    pub scrape_failure_policy: ScrapeFailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scrape_workers: 5,
            scrape_interval: Duration::from_millis(1000),
            scrape_failure_policy: ScrapeFailurePolicy::default(),
        }
    }
}

/// Everything the worker binary reads from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub hospital_id: Uuid,
    pub created_by: Uuid,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub ods_path: PathBuf,
    pub scrape_file: Option<PathBuf>,
    pub people_file: Option<PathBuf>,
    pub deadline: Option<Duration>,
    pub promote: bool,
    pub pipeline: PipelineConfig,
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s.trim(), "%Y/%m/%d"))
        .map_err(|e| format!("invalid date '{}': {}", s, e))
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| get(key).filter(|v| !v.trim().is_empty()).ok_or_else(|| anyhow!("{key} must be set"));
        let parsed_or = |key: &str, default: u64| get(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default);
        let uuid = |key: &str| -> anyhow::Result<Uuid> {
            let raw = required(key)?;
            Uuid::from_str(raw.trim()).with_context(|| format!("{key} must be a UUID, got '{raw}'"))
        };
        let day = |key: &str| -> anyhow::Result<NaiveDate> {
            let raw = required(key)?;
            parse_day(&raw).map_err(|e| anyhow!("{key}: {e}"))
        };

        let window_start = day("SCHEDCU_WINDOW_START")?;
        let window_end = day("SCHEDCU_WINDOW_END")?;
        if window_end < window_start {
            anyhow::bail!("SCHEDCU_WINDOW_END ({window_end}) is before SCHEDCU_WINDOW_START ({window_start})");
        }

        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            scrape_workers: parsed_or("SCHEDCU_SCRAPE_WORKERS", defaults.scrape_workers as u64).max(1) as usize,
            scrape_interval: Duration::from_millis(parsed_or(
                "SCHEDCU_SCRAPE_INTERVAL_MS",
                defaults.scrape_interval.as_millis() as u64,
            )),
            scrape_failure_policy: defaults.scrape_failure_policy,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parsed_or("SCHEDCU_DB_MAX_CONNECTIONS", 10).clamp(1, u32::MAX as u64) as u32,
            run_migrations: get("SCHEDCU_RUN_MIGRATIONS").and_then(|s| parse_flag(&s)).unwrap_or(true),
            hospital_id: uuid("SCHEDCU_HOSPITAL_ID")?,
            created_by: uuid("SCHEDCU_CREATED_BY")?,
            window_start,
            window_end,
            ods_path: PathBuf::from(required("SCHEDCU_ODS_PATH")?),
            scrape_file: get("SCHEDCU_SCRAPE_FILE").filter(|s| !s.trim().is_empty()).map(PathBuf::from),
            people_file: get("SCHEDCU_PEOPLE_FILE").filter(|s| !s.trim().is_empty()).map(PathBuf::from),
            deadline: get("SCHEDCU_DEADLINE_SECS")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            promote: get("SCHEDCU_PROMOTE").and_then(|s| parse_flag(&s)).unwrap_or(false),
            pipeline,
        })
    }
}
