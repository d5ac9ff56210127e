// src/db/mod.rs

use anyhow::Context;
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::config::AppConfig;

pub async fn connect(config: &AppConfig) -> anyhow::Result<Pool<Postgres>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("connecting to PostgreSQL (check DATABASE_URL)")?;

    info!(max_connections = config.db_max_connections, "connected to PostgreSQL");

    if config.run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("running schema migrations")?;
        info!("schema migrations applied");
    }

    Ok(pool)
}
