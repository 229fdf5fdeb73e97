use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{
    Account, DestinyProfileDraft, Halo5Profile, Halo5ProfileDraft, MapVariant, MatchDraft,
    MatchEvent, MatchHeader, MatchKind, NewAccount, Platform, Playlist, Season,
    StoredDestinyProfile, StoredMatch,
};

/// Persistence seam for the ingestion pipeline.
///
/// Every `write_*` method is one atomic unit: either the aggregate and all of
/// its children land, or nothing does. Uniqueness violations surface as
/// [`StoreError::Conflict`](crate::error::StoreError::Conflict).
#[async_trait::async_trait]
pub trait IngestStore: Send + Sync {
    async fn find_account_by_id(&self, id: i64) -> StoreResult<Option<Account>>;
    async fn find_account_by_seo(&self, seo: &str, platform: Platform)
        -> StoreResult<Option<Account>>;
    async fn find_account_by_membership(&self, membership_id: &str)
        -> StoreResult<Option<Account>>;
    async fn create_account(&self, account: &NewAccount) -> StoreResult<Account>;
    async fn rename_account(&self, id: i64, gamertag: &str, seo: &str) -> StoreResult<Account>;
    async fn attach_membership(&self, id: i64, membership_id: &str) -> StoreResult<Account>;
    /// Detach `membership_id` from account `from` and attach it to `to` in one
    /// unit. Returns the receiving account.
    async fn move_membership(&self, from: i64, to: i64, membership_id: &str)
        -> StoreResult<Account>;

    /// Stored match with players, teams, PvP result and events.
    async fn find_match(&self, instance_id: &str) -> StoreResult<Option<StoredMatch>>;
    /// Insert or replace a match by instance id. Prior players, teams and PvP
    /// result are removed first; events are replaced only when `events` is given.
    async fn write_match(
        &self,
        draft: &MatchDraft,
        events: Option<&[MatchEvent]>,
    ) -> StoreResult<StoredMatch>;
    async fn replace_match_events(
        &self,
        instance_id: &str,
        events: &[MatchEvent],
    ) -> StoreResult<StoredMatch>;
    async fn update_match_classification(
        &self,
        instance_id: &str,
        kind: MatchKind,
        header: &MatchHeader,
    ) -> StoreResult<Option<StoredMatch>>;

    async fn find_destiny_profile(&self, account_id: i64)
        -> StoreResult<Option<StoredDestinyProfile>>;
    /// Upsert the profile and its characters, deleting characters not in the draft.
    async fn write_destiny_profile(
        &self,
        draft: &DestinyProfileDraft,
    ) -> StoreResult<StoredDestinyProfile>;

    async fn find_halo5_profile(&self, account_id: i64) -> StoreResult<Option<Halo5Profile>>;
    /// Upsert the profile; when playlists are given, rows for that season and
    /// season-less rows are replaced.
    async fn write_halo5_profile(&self, draft: &Halo5ProfileDraft) -> StoreResult<Halo5Profile>;
    /// Latest playlist-stats write for the account in `season_id`.
    async fn playlist_stats_updated_at(
        &self,
        account_id: i64,
        season_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    async fn list_seasons(&self) -> StoreResult<Vec<Season>>;
    async fn find_season(&self, content_id: &str) -> StoreResult<Option<Season>>;
    async fn upsert_season(&self, season: &Season) -> StoreResult<()>;
    async fn find_playlist(&self, content_id: &str) -> StoreResult<Option<Playlist>>;
    async fn upsert_playlist(&self, playlist: &Playlist) -> StoreResult<()>;
    async fn find_map_variant(&self, content_id: &str) -> StoreResult<Option<MapVariant>>;
    /// Insert unless present; returns the stored row.
    async fn insert_map_variant(&self, variant: &MapVariant) -> StoreResult<MapVariant>;
}
