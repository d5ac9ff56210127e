// src/main.rs

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use schedcu_import::config::AppConfig;
use schedcu_import::db;
use schedcu_import::repository::postgres::PgStore;
use schedcu_import::scrape::{AliasDirectory, RecordSetProvider};
use schedcu_import::services::{OdsSource, ScheduleImportOrchestrator, ScrapeImportService, WorkflowRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    // Initialize DB pool
    let pool = db::connect(&config).await?;
    let repos = PgStore::new(pool).repositories();

    // Scrape source is optional; without one the run is spreadsheet-only
    let scrape = match &config.scrape_file {
        Some(path) => {
            let provider = RecordSetProvider::from_file(path)
                .with_context(|| format!("loading scrape records from {}", path.display()))?;
            let directory = match &config.people_file {
                Some(p) => AliasDirectory::from_file(p)
                    .with_context(|| format!("loading person directory from {}", p.display()))?,
                None => AliasDirectory::new(),
            };
            Some(ScrapeImportService::new(
                repos.clone(),
                Arc::new(provider),
                Arc::new(directory),
                &config.pipeline,
            ))
        }
        None => None,
    };

    let orchestrator = ScheduleImportOrchestrator::new(repos, scrape, config.pipeline.scrape_failure_policy);

    let cancel = CancellationToken::new();
    if let Some(deadline) = config.deadline {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!(secs = deadline.as_secs(), "deadline reached, cancelling import");
            token.cancel();
        });
    }

    let request = WorkflowRequest {
        hospital_id: config.hospital_id,
        effective_start: config.window_start,
        effective_end: config.window_end,
        created_by: config.created_by,
        ods: OdsSource::file(&config.ods_path),
    };
    let result = orchestrator.execute_import(request, &cancel).await;
    cancel.cancel();

    if config.promote {
        match result.schedule_version_id {
            Some(id) if result.success && result.validation.is_promotable() => {
                let v = orchestrator.versions().promote_and_archive_others(id, config.created_by).await?;
                info!(version_id = %v.id, "version promoted to production");
            }
            _ => warn!("run is not promotable; version left in staging"),
        }
    }

    println!("{}", serde_json::to_string_pretty(&result.report())?);
    if !result.success {
        anyhow::bail!(result
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "import workflow failed".to_string()));
    }
    Ok(())
}
