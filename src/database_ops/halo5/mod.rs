//! Halo 5 integration against the Halo API: carnage reports, event
//! timelines, service records, leaderboards and match history.

pub mod events;
pub mod normalize;
pub mod payload;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::database_ops::assets::AssetRefresh;
use crate::database_ops::dedup::{DedupGuard, MatchLookup};
use crate::database_ops::drift::DriftTracker;
use crate::database_ops::fetch::{
    HttpTransport, IngestPass, JsonTransport, RemoteFetcher, ResponseCache,
};
use crate::database_ops::identity::{IdentityLookup, IdentityResolver, UpstreamIdentity};
use crate::database_ops::store::IngestStore;
use crate::database_ops::writer::TransactionalWriter;
use crate::error::{IngestError, IngestResult, Missing};
use crate::models::{
    Game, Halo5Profile, Halo5ProfileDraft, MapVariant, MatchDraft, MatchEvent, MatchKind,
    Platform, StoredMatch,
};
use crate::normalization::GamertagKey;

use self::events::{AccountIndex, GameEventsPayload};
use self::normalize::{LeaderboardEntry, MatchSummary};
use self::payload::{
    ArenaServiceRecord, CarnageReport, LeaderboardResponse, MapVariantMetadata,
    MatchHistoryResponse, PlaylistMetadata, SeasonMetadata, ServiceRecordResponse,
    ServiceRecordResult, WarzoneServiceRecord,
};

pub const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const PER_PAGE: u32 = 9;

const EVENTS_TTL: Duration = Duration::from_secs(2 * 60);
const SERVICE_RECORD_TTL: Duration = Duration::from_secs(2 * 60);
const LEADERBOARD_TTL: Duration = Duration::from_secs(2 * 60);
const HISTORY_TTL: Duration = Duration::from_secs(3 * 60);
const HISTORY_MODES: [&str; 4] = ["arena", "warzone", "custom", "campaign"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchHistoryPage {
    pub page: u32,
    pub result_count: i64,
    pub results: Vec<MatchSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetadataSync {
    pub seasons: usize,
    pub playlists: usize,
}

pub struct Halo5Client {
    fetcher: RemoteFetcher,
    store: Arc<dyn IngestStore>,
    assets: Arc<dyn AssetRefresh>,
    resolver: IdentityResolver,
    dedup: DedupGuard,
    drift: DriftTracker,
    writer: TransactionalWriter,
    base_url: String,
    version: i32,
}

impl Halo5Client {
    pub fn new(
        config: &IngestConfig,
        transport: Arc<dyn JsonTransport>,
        cache: Arc<ResponseCache>,
        store: Arc<dyn IngestStore>,
        assets: Arc<dyn AssetRefresh>,
    ) -> Self {
        Self {
            fetcher: RemoteFetcher::new(transport, cache.clone()),
            resolver: IdentityResolver::new(store.clone(), assets.clone(), Game::Halo5),
            dedup: DedupGuard::new(store.clone()),
            drift: DriftTracker::new(config.inactivity_ceiling),
            writer: TransactionalWriter::new(cache),
            store,
            assets,
            base_url: config.halo5_base_url.clone(),
            version: config.halo_version,
        }
    }

    /// reqwest transport signed with the Halo API subscription key.
    pub fn http_transport(config: &IngestConfig) -> HttpTransport {
        HttpTransport::new(
            API_KEY_HEADER,
            config.halo5_api_key.clone(),
            config.http_timeout,
            &config.user_agent,
        )
    }

    fn carnage_url(&self, kind: MatchKind, match_id: &str) -> String {
        format!("{}/stats/h5/{}/matches/{match_id}", self.base_url, kind.as_str())
    }

    fn events_url(&self, match_id: &str) -> String {
        format!("{}/stats/h5/matches/{match_id}/events", self.base_url)
    }

    fn arena_record_url(&self, players: &str) -> String {
        format!("{}/stats/h5/servicerecords/arena?players={players}", self.base_url)
    }

    fn warzone_record_url(&self, player: &str) -> String {
        format!("{}/stats/h5/servicerecords/warzone?players={player}", self.base_url)
    }

    fn map_variant_url(&self, id: &str) -> String {
        format!("{}/metadata/h5/metadata/map-variants/{id}", self.base_url)
    }

    fn leaderboard_url(&self, season_id: &str, playlist_id: &str) -> String {
        format!(
            "{}/stats/h5/player-leaderboards/csr/{season_id}/{playlist_id}",
            self.base_url
        )
    }

    fn history_url(&self, player: &str, modes: &str, start: u32) -> String {
        format!(
            "{}/stats/h5/players/{player}/matches?modes={modes}&start={start}&count={PER_PAGE}",
            self.base_url
        )
    }

    fn metadata_url(&self, resource: &str) -> String {
        format!("{}/metadata/h5/metadata/{resource}", self.base_url)
    }

    /// Store an arena or warzone match. With `with_events`, a stored match
    /// lacking its timeline gets only the timeline backfilled.
    #[instrument(skip(self))]
    pub async fn ingest_match(
        &self,
        type_id: &str,
        match_id: &str,
        with_events: bool,
    ) -> IngestResult<StoredMatch> {
        let kind = parse_match_type(type_id)?;
        let match_id = parse_match_id(match_id)?;

        match self.dedup.check_match(&match_id, with_events).await? {
            MatchLookup::Complete(stored) => Ok(stored),
            MatchLookup::NeedsEvents(_) => {
                let pass = IngestPass::new();
                self.writer
                    .run(&pass, async {
                        let payload = self.fetch_events(&pass, &match_id).await?;
                        let events = self.resolve_timeline(&pass, &payload).await?;
                        let stored = self.store.replace_match_events(&match_id, &events).await?;
                        info!(
                            match_id = %match_id,
                            events = stored.events.len(),
                            "halo 5 events backfilled"
                        );
                        Ok(stored)
                    })
                    .await
            }
            MatchLookup::Absent => {
                let pass = IngestPass::new();
                self.writer
                    .run(&pass, self.fetch_and_store(&pass, kind, &match_id, with_events))
                    .await
            }
        }
    }

    async fn fetch_and_store(
        &self,
        pass: &IngestPass,
        kind: MatchKind,
        match_id: &str,
        with_events: bool,
    ) -> IngestResult<StoredMatch> {
        // Completeness is known before anything is written.
        let timeline = if with_events {
            Some(self.fetch_events(pass, match_id).await?)
        } else {
            None
        };

        let report: CarnageReport = self
            .fetcher
            .fetch(pass, &self.carnage_url(kind, match_id), None)
            .await?;
        if let Some(variant) = &report.map_variant_id {
            self.check_or_insert_map_variant(pass, variant).await?;
        }
        self.preload_accounts(pass, &report).await?;

        let mut players = Vec::with_capacity(report.player_stats.len());
        for (index, stat) in report.player_stats.iter().enumerate() {
            if !normalize::is_participant(stat) {
                debug!(match_id, gamertag = %stat.player.gamertag, "skipping zero-stat player");
                continue;
            }
            let account = self
                .resolver
                .ensure_account(pass, &stat.player.gamertag, Platform::Xbox)
                .await?;
            players.push(normalize::player_row(match_id, &report, index, stat, account.id));
        }

        let events = match &timeline {
            Some(payload) => Some(self.resolve_timeline(pass, payload).await?),
            None => None,
        };
        let draft = MatchDraft {
            record: normalize::match_record(match_id, kind, self.version, &report),
            pvp: None,
            teams: normalize::teams(&report.team_stats),
            players,
        };
        let stored = self.store.write_match(&draft, events.as_deref()).await?;
        info!(
            match_id,
            kind = kind.as_str(),
            players = stored.players.len(),
            events = stored.events.len(),
            "halo 5 match stored"
        );
        Ok(stored)
    }

    async fn fetch_events(
        &self,
        pass: &IngestPass,
        match_id: &str,
    ) -> IngestResult<GameEventsPayload> {
        let payload: GameEventsPayload = self
            .fetcher
            .fetch(pass, &self.events_url(match_id), Some(EVENTS_TTL))
            .await?;
        if !payload.is_complete_set_of_events {
            warn!(match_id, events = payload.game_events.len(), "incomplete event set");
            return Err(IngestError::IncompleteEventSet(match_id.to_string()));
        }
        Ok(payload)
    }

    async fn resolve_timeline(
        &self,
        pass: &IngestPass,
        payload: &GameEventsPayload,
    ) -> IngestResult<Vec<MatchEvent>> {
        let mut accounts = AccountIndex::new();
        for tag in payload.distinct_gamertags() {
            let account = self.resolver.ensure_account(pass, &tag, Platform::Xbox).await?;
            accounts.insert(GamertagKey::new(&tag).seo().to_string(), account.id);
        }
        events::build_timeline(payload, &accounts)
            .map_err(|tag| IngestError::NotFound(Missing::Player(tag)))
    }

    /// Players without a local account are created from one bulk service
    /// record call; their profiles start at the inactivity ceiling so the
    /// next refresh pass picks them up.
    async fn preload_accounts(
        &self,
        pass: &IngestPass,
        report: &CarnageReport,
    ) -> IngestResult<()> {
        let mut unknown: Vec<GamertagKey> = Vec::new();
        for stat in report.player_stats.iter().filter(|s| normalize::is_participant(s)) {
            let key = GamertagKey::new(&stat.player.gamertag);
            if key.is_empty() || unknown.contains(&key) {
                continue;
            }
            if self.resolver.find_local(pass, &key, Platform::Xbox).await?.is_none() {
                unknown.push(key);
            }
        }
        if unknown.is_empty() {
            return Ok(());
        }

        let url = self.arena_record_url(&unknown.iter().map(GamertagKey::for_api).join(","));
        let response: ServiceRecordResponse<ArenaServiceRecord> =
            self.fetcher.fetch(pass, &url, None).await?;
        for result in response.results {
            let gamertag = result.id.clone();
            let record = result
                .into_record()
                .ok_or_else(|| IngestError::NotFound(Missing::Player(gamertag.clone())))?;
            let account = self
                .resolver
                .ensure_account(pass, &gamertag, Platform::Xbox)
                .await?;
            let mut profile = Halo5Profile {
                account_id: account.id,
                ..Halo5Profile::default()
            };
            let playlists = normalize::apply_arena_record(&mut profile, &record, self.version);
            profile.inactive_counter = self.drift.ceiling();
            self.store
                .write_halo5_profile(&Halo5ProfileDraft {
                    profile,
                    playlists: vec![playlists],
                })
                .await?;
        }
        debug!(count = unknown.len(), "halo 5 players preloaded");
        Ok(())
    }

    async fn check_or_insert_map_variant(
        &self,
        pass: &IngestPass,
        variant_id: &str,
    ) -> IngestResult<MapVariant> {
        if let Some(variant) = self.store.find_map_variant(variant_id).await? {
            return Ok(variant);
        }
        let meta: MapVariantMetadata = self
            .fetcher
            .fetch(pass, &self.map_variant_url(variant_id), None)
            .await?;
        let name = meta
            .name
            .ok_or_else(|| IngestError::NotFound(Missing::MapVariant(variant_id.to_string())))?;
        let variant = MapVariant {
            content_id: meta.content_id.unwrap_or_else(|| variant_id.to_string()),
            name,
            map_id: meta.map_id,
            description: meta.description,
        };
        Ok(self.store.insert_map_variant(&variant).await?)
    }

    /// Refresh the arena, season and warzone records of a player.
    #[instrument(skip(self))]
    pub async fn ingest_account_profile(&self, gamertag: &str) -> IngestResult<Halo5Profile> {
        let pass = IngestPass::new();
        self.writer
            .run(&pass, self.sync_profile(&pass, gamertag))
            .await
    }

    async fn sync_profile(&self, pass: &IngestPass, gamertag: &str) -> IngestResult<Halo5Profile> {
        let account = self
            .resolver
            .resolve_account(pass, gamertag, Platform::Xbox, self)
            .await?;
        let previous = self.store.find_halo5_profile(account.id).await?;
        let tag = GamertagKey::new(&account.gamertag).for_api();

        let current = match self
            .service_record::<ArenaServiceRecord>(
                pass,
                &self.arena_record_url(&tag),
                &account.gamertag,
                Some(SERVICE_RECORD_TTL),
            )
            .await
        {
            Err(IngestError::NotFound(missing)) => {
                if let Some(mut profile) = previous {
                    warn!(account_id = account.id, "service record unavailable; disabling profile");
                    profile.disabled = true;
                    self.store
                        .write_halo5_profile(&Halo5ProfileDraft {
                            profile,
                            playlists: Vec::new(),
                        })
                        .await?;
                }
                return Err(IngestError::NotFound(missing));
            }
            other => other?,
        };

        let force = previous.as_ref().is_some_and(|p| p.version != self.version);
        let now = Utc::now();
        let mut seasons = Vec::new();
        for season in self.store.list_seasons().await? {
            let updated = self
                .store
                .playlist_stats_updated_at(account.id, &season.content_id)
                .await?;
            if !normalize::season_needs_pull(&season, updated, force, now) {
                continue;
            }
            let url = format!("{}&seasonId={}", self.arena_record_url(&tag), season.content_id);
            seasons.push(
                self.service_record::<ArenaServiceRecord>(pass, &url, &account.gamertag, None)
                    .await?,
            );
        }

        let warzone = self
            .service_record::<WarzoneServiceRecord>(
                pass,
                &self.warzone_record_url(&tag),
                &account.gamertag,
                None,
            )
            .await?;

        let mut profile = previous.clone().unwrap_or_else(|| Halo5Profile {
            account_id: account.id,
            ..Halo5Profile::default()
        });
        profile.disabled = false;
        profile.inactive_counter = self.drift.update_activity(
            pass,
            &format!("halo5:{}", account.id),
            profile.inactive_counter,
            previous.as_ref().and_then(|p| p.xp).as_ref(),
            &current.xp,
        );

        let mut playlists = Vec::with_capacity(seasons.len() + 1);
        for record in &seasons {
            playlists.push(normalize::apply_arena_record(&mut profile, record, self.version));
        }
        playlists.push(normalize::apply_arena_record(&mut profile, &current, self.version));
        profile.warzone = Some(normalize::warzone(&warzone.warzone_stat));
        let written = self
            .store
            .write_halo5_profile(&Halo5ProfileDraft { profile, playlists })
            .await?;

        self.assets.schedule(Game::Halo5, &account);
        info!(
            account_id = account.id,
            seasons = seasons.len(),
            inactive_counter = written.inactive_counter,
            "halo 5 profile refreshed"
        );
        Ok(written)
    }

    async fn service_record<T: DeserializeOwned>(
        &self,
        pass: &IngestPass,
        url: &str,
        gamertag: &str,
        ttl: Option<Duration>,
    ) -> IngestResult<T> {
        let response: ServiceRecordResponse<T> = self.fetcher.fetch(pass, url, ttl).await?;
        response
            .results
            .into_iter()
            .next()
            .and_then(ServiceRecordResult::into_record)
            .ok_or_else(|| IngestError::NotFound(Missing::Player(gamertag.to_string())))
    }

    /// CSR leaderboard for a locally known season and playlist.
    #[instrument(skip(self))]
    pub async fn leaderboard(
        &self,
        season_id: &str,
        playlist_id: &str,
    ) -> IngestResult<Vec<LeaderboardEntry>> {
        let season = self
            .store
            .find_season(season_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(Missing::Season(season_id.to_string())))?;
        let playlist = self
            .store
            .find_playlist(playlist_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(Missing::Playlist(playlist_id.to_string())))?;

        let pass = IngestPass::new();
        let url = self.leaderboard_url(&season.content_id, &playlist.content_id);
        self.writer
            .run(&pass, async {
                let response: LeaderboardResponse =
                    self.fetcher.fetch(&pass, &url, Some(LEADERBOARD_TTL)).await?;
                if response.result_count <= 0 || response.results.is_empty() {
                    return Err(IngestError::NotFound(Missing::Leaderboard {
                        season: season.content_id.clone(),
                        playlist: playlist.content_id.clone(),
                    }));
                }
                Ok(response
                    .results
                    .iter()
                    .map(normalize::leaderboard_entry)
                    .collect())
            })
            .await
    }

    /// One page of a locally known player's recent matches. `modes` is a
    /// comma-separated list of arena, warzone, custom and campaign.
    #[instrument(skip(self))]
    pub async fn match_history(
        &self,
        gamertag: &str,
        modes: &str,
        page: u32,
    ) -> IngestResult<MatchHistoryPage> {
        let modes = parse_history_modes(modes)?;
        let pass = IngestPass::new();
        let key = GamertagKey::new(gamertag);
        let account = self
            .resolver
            .find_local(&pass, &key, Platform::Xbox)
            .await?
            .ok_or_else(|| IngestError::NotFound(Missing::Player(key.display().to_string())))?;

        let url = self.history_url(
            &GamertagKey::new(&account.gamertag).for_api(),
            &modes,
            PER_PAGE.saturating_mul(page),
        );
        self.writer
            .run(&pass, async {
                let response: MatchHistoryResponse =
                    self.fetcher.fetch(&pass, &url, Some(HISTORY_TTL)).await?;
                Ok(MatchHistoryPage {
                    page,
                    result_count: response.result_count,
                    results: response.results.iter().map(normalize::match_summary).collect(),
                })
            })
            .await
    }

    /// Pull season and playlist metadata into the local tables.
    #[instrument(skip(self))]
    pub async fn sync_metadata(&self) -> IngestResult<MetadataSync> {
        let pass = IngestPass::new();
        self.writer
            .run(&pass, async {
                let seasons: Vec<SeasonMetadata> = self
                    .fetcher
                    .fetch(&pass, &self.metadata_url("seasons"), None)
                    .await?;
                let playlists: Vec<PlaylistMetadata> = self
                    .fetcher
                    .fetch(&pass, &self.metadata_url("playlists"), None)
                    .await?;
                for season in &seasons {
                    self.store.upsert_season(&normalize::season(season)).await?;
                }
                for playlist in &playlists {
                    self.store.upsert_playlist(&normalize::playlist(playlist)).await?;
                }
                Ok(MetadataSync {
                    seasons: seasons.len(),
                    playlists: playlists.len(),
                })
            })
            .await
    }
}

#[async_trait::async_trait]
impl IdentityLookup for Halo5Client {
    async fn lookup_identity(
        &self,
        pass: &IngestPass,
        key: &GamertagKey,
        _platform: Platform,
    ) -> IngestResult<Option<UpstreamIdentity>> {
        let url = self.arena_record_url(&key.for_api());
        let response: ServiceRecordResponse<ArenaServiceRecord> = self
            .fetcher
            .fetch(pass, &url, Some(SERVICE_RECORD_TTL))
            .await?;
        Ok(response
            .results
            .into_iter()
            .next()
            .filter(|result| result.result_code == 0)
            .map(|result| UpstreamIdentity {
                display_name: result.id,
                platform: Platform::Xbox,
                membership_id: None,
            }))
    }
}

fn parse_match_type(raw: &str) -> IngestResult<MatchKind> {
    match MatchKind::parse(raw) {
        Some(kind @ (MatchKind::Arena | MatchKind::Warzone)) => Ok(kind),
        _ => Err(IngestError::InvalidRequest(format!(
            "Halo 5 match type must be arena or warzone, got {raw:?}"
        ))),
    }
}

fn parse_match_id(raw: &str) -> IngestResult<String> {
    Uuid::parse_str(raw.trim())
        .map(|id| id.hyphenated().to_string())
        .map_err(|_| {
            IngestError::InvalidRequest(format!("Halo 5 match id must be a GUID, got {raw:?}"))
        })
}

fn parse_history_modes(raw: &str) -> IngestResult<String> {
    let modes: Vec<String> = raw
        .split(',')
        .map(|mode| mode.trim().to_ascii_lowercase())
        .filter(|mode| !mode.is_empty())
        .collect();
    if modes.is_empty() {
        return Err(IngestError::InvalidRequest("no match history modes given".into()));
    }
    if let Some(bad) = modes.iter().find(|mode| !HISTORY_MODES.contains(&mode.as_str())) {
        return Err(IngestError::InvalidRequest(format!("unknown match history mode {bad:?}")));
    }
    Ok(modes.join(","))
}
