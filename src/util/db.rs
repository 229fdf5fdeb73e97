use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::util::env::env_flag;

const INGEST_SCHEMA: &str = include_str!("../../migrations/0001_ingest_schema.sql");
const INGEST_SCHEMA_VERSION: i64 = 1;

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        auto_migrate: bool,
    ) -> Result<Self> {
        let mut connect_options =
            PgConnectOptions::from_str(database_url).context("parse database url")?;

        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        if !env_flag("USE_PREPARED", false) {
            // PgBouncer txn mode safe
            connect_options = connect_options.statement_cache_capacity(0);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await
            .context("connect to postgres")?;
        info!("connected to db");

        if auto_migrate {
            info!("applying ingest schema (AUTO_MIGRATE=on)");
            Self::apply_schema(&pool).await?;
        } else {
            info!("AUTO_MIGRATE disabled; skipping schema bootstrap");
        }
        Ok(Self { pool })
    }

    /// Bootstrap the ingest tables once; later runs see the recorded version and skip.
    async fn apply_schema(pool: &PgPool) -> Result<()> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _ingest_schema_versions (
                version BIGINT PRIMARY KEY,
                installed_at TIMESTAMPTZ NOT NULL DEFAULT now()
             )",
        )
        .execute(pool)
        .await?;

        let applied: Option<i64> =
            sqlx::query_scalar("SELECT version FROM _ingest_schema_versions WHERE version = $1")
                .persistent(false)
                .bind(INGEST_SCHEMA_VERSION)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            info!(version = INGEST_SCHEMA_VERSION, "ingest schema up-to-date");
            return Ok(());
        }

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(INGEST_SCHEMA)
            .execute(&mut *tx)
            .await
            .context("apply 0001_ingest_schema.sql")?;
        sqlx::query("INSERT INTO _ingest_schema_versions (version) VALUES ($1)")
            .persistent(false)
            .bind(INGEST_SCHEMA_VERSION)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(version = INGEST_SCHEMA_VERSION, "ingest schema applied");
        Ok(())
    }
}
