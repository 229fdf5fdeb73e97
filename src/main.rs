use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use gamestats_ingest::config::IngestConfig;
use gamestats_ingest::database_ops::assets::{AssetRefresh, ChannelAssetRefresh};
use gamestats_ingest::database_ops::destiny::DestinyClient;
use gamestats_ingest::database_ops::fetch::ResponseCache;
use gamestats_ingest::database_ops::halo5::Halo5Client;
use gamestats_ingest::database_ops::memory_store::MemoryStore;
use gamestats_ingest::database_ops::pg_store::PgStore;
use gamestats_ingest::database_ops::store::IngestStore;
use gamestats_ingest::models::Platform;
use gamestats_ingest::util::db::Db;
use gamestats_ingest::util::env as env_util;
use gamestats_ingest::logging;
use serde_json::Value;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gamestats", version, about = "Destiny and Halo 5 stats ingestion")]
struct Cli {
    /// Keep all writes in memory instead of Postgres (dry run)
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a Destiny post-game carnage report
    DestinyGame {
        instance_id: String,
        /// raid, flawless, pvp or trials; inferred from the activity mode when omitted
        #[arg(long = "type")]
        kind: Option<String>,
    },
    /// Re-tag a stored Destiny game
    DestinyClassify {
        instance_id: String,
        kind: String,
        /// Raid Tuesday number or Trials passage id
        #[arg(long)]
        detail: Option<i32>,
    },
    /// Re-fetch a stored Destiny game and replace its players
    DestinyRefresh { instance_id: String },
    /// Refresh a Destiny account summary and its characters
    DestinyAccount {
        gamertag: String,
        #[arg(long, default_value = "xbox")]
        platform: String,
    },
    /// Current exotic sale items
    DestinySaleCatalog,
    /// Ingest a Halo 5 match, optionally with its event timeline
    Halo5Game {
        match_id: String,
        #[arg(long = "type", default_value = "arena")]
        kind: String,
        #[arg(long, action = ArgAction::SetTrue)]
        events: bool,
    },
    /// Refresh a Halo 5 player's service records
    Halo5Account { gamertag: String },
    /// CSR leaderboard for a season and playlist
    Halo5Leaderboard {
        season_id: String,
        playlist_id: String,
    },
    /// One page of a player's recent matches
    Halo5History {
        gamertag: String,
        /// Comma-separated: arena, warzone, custom, campaign
        #[arg(long, default_value = "arena")]
        modes: String,
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
    /// Sync season and playlist metadata
    Halo5Metadata,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    logging::init_tracing(logging::DEFAULT_FILTER)?;
    env_util::preflight_check(
        "gamestats",
        &[],
        &[
            "BUNGIE_API_KEY",
            "BUNGIE_BASE_URL",
            "HALO5_API_KEY",
            "HALO5_BASE_URL",
            "DATABASE_URL",
            "AUTO_MIGRATE",
        ],
    )?;

    let cli = Cli::parse();
    let config = IngestConfig::from_env();
    let store = open_store(&config, cli.memory).await?;

    let (assets, mut refresh_rx) = ChannelAssetRefresh::new();
    let drain = tokio::spawn(async move {
        let mut requested = 0usize;
        while let Some(request) = refresh_rx.recv().await {
            info!(
                game = ?request.game,
                account_id = request.account_id,
                gamertag = %request.gamertag,
                "asset refresh requested"
            );
            requested += 1;
        }
        requested
    });

    let output = run(cli.command, &config, store, Arc::new(assets)).await;
    // Every sender lives inside the clients dropped by `run`.
    let requested = drain.await.context("asset refresh drain panicked")?;
    if requested > 0 {
        info!(requested, "asset refreshes left for the media worker");
    }

    println!("{}", serde_json::to_string_pretty(&output?)?);
    Ok(())
}

async fn open_store(config: &IngestConfig, memory: bool) -> Result<Arc<dyn IngestStore>> {
    if memory {
        info!("using in-memory store; nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let database_url = env_util::db_url()
        .context("database URL not configured; set DATABASE_URL or pass --memory")?;
    let db = Db::connect(&database_url, config.db_max_connections, config.auto_migrate)
        .await
        .context("Db::connect failed")?;
    info!(max_conns = config.db_max_connections, "database connected");
    Ok(Arc::new(PgStore::new(&db)))
}

async fn run(
    command: Command,
    config: &IngestConfig,
    store: Arc<dyn IngestStore>,
    assets: Arc<dyn AssetRefresh>,
) -> Result<Value> {
    let cache = Arc::new(ResponseCache::new());
    let destiny = || {
        DestinyClient::new(
            config,
            Arc::new(DestinyClient::http_transport(config)),
            cache.clone(),
            store.clone(),
            assets.clone(),
        )
    };
    let halo5 = || {
        Halo5Client::new(
            config,
            Arc::new(Halo5Client::http_transport(config)),
            cache.clone(),
            store.clone(),
            assets.clone(),
        )
    };

    let value = match command {
        Command::DestinyGame { instance_id, kind } => {
            serde_json::to_value(destiny().ingest_match(kind.as_deref(), &instance_id).await?)?
        }
        Command::DestinyClassify {
            instance_id,
            kind,
            detail,
        } => serde_json::to_value(destiny().classify_game(&instance_id, &kind, detail).await?)?,
        Command::DestinyRefresh { instance_id } => {
            serde_json::to_value(destiny().refresh_match(&instance_id).await?)?
        }
        Command::DestinyAccount { gamertag, platform } => {
            let platform = Platform::parse(&platform)
                .ok_or_else(|| anyhow!("unknown platform {platform:?}; use xbox or psn"))?;
            serde_json::to_value(destiny().ingest_account_profile(&gamertag, platform).await?)?
        }
        Command::DestinySaleCatalog => serde_json::to_value(destiny().sale_catalog().await?)?,
        Command::Halo5Game {
            match_id,
            kind,
            events,
        } => serde_json::to_value(halo5().ingest_match(&kind, &match_id, events).await?)?,
        Command::Halo5Account { gamertag } => {
            serde_json::to_value(halo5().ingest_account_profile(&gamertag).await?)?
        }
        Command::Halo5Leaderboard {
            season_id,
            playlist_id,
        } => serde_json::to_value(halo5().leaderboard(&season_id, &playlist_id).await?)?,
        Command::Halo5History {
            gamertag,
            modes,
            page,
        } => serde_json::to_value(halo5().match_history(&gamertag, &modes, page).await?)?,
        Command::Halo5Metadata => serde_json::to_value(halo5().sync_metadata().await?)?,
    };
    Ok(value)
}
