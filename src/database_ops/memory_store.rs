use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::database_ops::store::IngestStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Account, DestinyCharacter, DestinyProfile, DestinyProfileDraft, Halo5Profile,
    Halo5ProfileDraft, MapVariant, MatchDraft, MatchEvent, MatchHeader, MatchKind, NewAccount,
    Platform, PlaylistStats, Playlist, Season, StoredDestinyProfile, StoredMatch,
};

#[derive(Default)]
struct State {
    next_account_id: i64,
    next_match_id: i64,
    accounts: Vec<Account>,
    matches: HashMap<String, StoredMatch>,
    destiny_profiles: HashMap<i64, DestinyProfile>,
    characters: HashMap<String, (i64, DestinyCharacter)>,
    halo5_profiles: HashMap<i64, Halo5Profile>,
    playlist_stats: Vec<(i64, PlaylistStats, DateTime<Utc>)>,
    seasons: HashMap<String, Season>,
    playlists: HashMap<String, Playlist>,
    map_variants: HashMap<String, MapVariant>,
}

impl State {
    fn account(&self, id: i64) -> StoreResult<&Account> {
        self.accounts
            .iter()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::MissingReference(format!("account {id}")))
    }

    fn account_mut(&mut self, id: i64) -> StoreResult<&mut Account> {
        self.accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::MissingReference(format!("account {id}")))
    }

    fn check_accounts_exist(&self, ids: impl IntoIterator<Item = i64>) -> StoreResult<()> {
        for id in ids {
            self.account(id)?;
        }
        Ok(())
    }

    fn destiny_aggregate(&self, account_id: i64) -> Option<StoredDestinyProfile> {
        let profile = self.destiny_profiles.get(&account_id)?.clone();
        let mut characters: Vec<DestinyCharacter> = self
            .characters
            .values()
            .filter(|(owner, _)| *owner == account_id)
            .map(|(_, c)| c.clone())
            .collect();
        characters.sort_by_key(|c| c.slot);
        Some(StoredDestinyProfile {
            profile,
            characters,
        })
    }
}

/// In-process store with the same uniqueness and atomicity rules as the
/// Postgres store. Writes validate everything before mutating so a failed
/// write leaves no partial state.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Decode("memory store lock poisoned".into()))
    }

    pub fn account_count(&self) -> usize {
        self.state().map(|s| s.accounts.len()).unwrap_or(0)
    }

    pub fn match_count(&self) -> usize {
        self.state().map(|s| s.matches.len()).unwrap_or(0)
    }

    pub fn event_count(&self) -> usize {
        self.state()
            .map(|s| s.matches.values().map(|m| m.events.len()).sum())
            .unwrap_or(0)
    }

    pub fn playlist_stats_for(&self, account_id: i64) -> Vec<PlaylistStats> {
        self.state()
            .map(|s| {
                s.playlist_stats
                    .iter()
                    .filter(|(owner, _, _)| *owner == account_id)
                    .map(|(_, stats, _)| stats.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn events_reference_accounts(events: &[MatchEvent]) -> Vec<i64> {
    events
        .iter()
        .flat_map(|e| e.detail.actor().into_iter().chain(e.assists.iter().copied()))
        .collect()
}

#[async_trait::async_trait]
impl IngestStore for MemoryStore {
    async fn find_account_by_id(&self, id: i64) -> StoreResult<Option<Account>> {
        Ok(self.state()?.accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn find_account_by_seo(
        &self,
        seo: &str,
        platform: Platform,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .state()?
            .accounts
            .iter()
            .find(|a| a.seo == seo && a.platform == platform)
            .cloned())
    }

    async fn find_account_by_membership(
        &self,
        membership_id: &str,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .state()?
            .accounts
            .iter()
            .find(|a| a.membership_id.as_deref() == Some(membership_id))
            .cloned())
    }

    async fn create_account(&self, account: &NewAccount) -> StoreResult<Account> {
        // Let racing resolvers interleave between their lookup and this insert.
        tokio::task::yield_now().await;
        let mut state = self.state()?;
        if state
            .accounts
            .iter()
            .any(|a| a.seo == account.seo && a.platform == account.platform)
        {
            return Err(StoreError::Conflict("accounts_seo_platform_key".into()));
        }
        if let Some(membership) = &account.membership_id {
            if state
                .accounts
                .iter()
                .any(|a| a.membership_id.as_ref() == Some(membership))
            {
                return Err(StoreError::Conflict("accounts_membership_id_key".into()));
            }
        }
        state.next_account_id += 1;
        let now = Utc::now();
        let created = Account {
            id: state.next_account_id,
            gamertag: account.gamertag.clone(),
            seo: account.seo.clone(),
            platform: account.platform,
            membership_id: account.membership_id.clone(),
            created_at: now,
            updated_at: now,
        };
        state.accounts.push(created.clone());
        Ok(created)
    }

    async fn rename_account(&self, id: i64, gamertag: &str, seo: &str) -> StoreResult<Account> {
        let mut state = self.state()?;
        let platform = state.account(id)?.platform;
        if state
            .accounts
            .iter()
            .any(|a| a.id != id && a.seo == seo && a.platform == platform)
        {
            return Err(StoreError::Conflict("accounts_seo_platform_key".into()));
        }
        let account = state.account_mut(id)?;
        account.gamertag = gamertag.to_string();
        account.seo = seo.to_string();
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn attach_membership(&self, id: i64, membership_id: &str) -> StoreResult<Account> {
        let mut state = self.state()?;
        if state
            .accounts
            .iter()
            .any(|a| a.id != id && a.membership_id.as_deref() == Some(membership_id))
        {
            return Err(StoreError::Conflict("accounts_membership_id_key".into()));
        }
        let account = state.account_mut(id)?;
        account.membership_id = Some(membership_id.to_string());
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn move_membership(
        &self,
        from: i64,
        to: i64,
        membership_id: &str,
    ) -> StoreResult<Account> {
        let mut state = self.state()?;
        state.account(to)?;
        if state.account(from)?.membership_id.as_deref() != Some(membership_id) {
            return Err(StoreError::MissingReference(format!(
                "membership {membership_id} on account {from}"
            )));
        }
        let now = Utc::now();
        let source = state.account_mut(from)?;
        source.membership_id = None;
        source.updated_at = now;
        let target = state.account_mut(to)?;
        target.membership_id = Some(membership_id.to_string());
        target.updated_at = now;
        Ok(target.clone())
    }

    async fn find_match(&self, instance_id: &str) -> StoreResult<Option<StoredMatch>> {
        Ok(self.state()?.matches.get(instance_id).cloned())
    }

    async fn write_match(
        &self,
        draft: &MatchDraft,
        events: Option<&[MatchEvent]>,
    ) -> StoreResult<StoredMatch> {
        let mut state = self.state()?;
        state.check_accounts_exist(draft.players.iter().map(|p| p.account_id))?;
        if let Some(events) = events {
            state.check_accounts_exist(events_reference_accounts(events))?;
        }

        let instance_id = draft.record.instance_id.clone();
        let existing = state
            .matches
            .get(&instance_id)
            .map(|m| (m.id, m.events.clone()));
        let (id, prior_events) = match existing {
            Some(found) => found,
            None => {
                state.next_match_id += 1;
                (state.next_match_id, Vec::new())
            }
        };
        let stored = StoredMatch {
            id,
            record: draft.record.clone(),
            pvp: draft.pvp.clone(),
            teams: draft.teams.clone(),
            players: draft.players.clone(),
            events: events.map(<[MatchEvent]>::to_vec).unwrap_or(prior_events),
        };
        state.matches.insert(instance_id, stored.clone());
        Ok(stored)
    }

    async fn replace_match_events(
        &self,
        instance_id: &str,
        events: &[MatchEvent],
    ) -> StoreResult<StoredMatch> {
        let mut state = self.state()?;
        state.check_accounts_exist(events_reference_accounts(events))?;
        let stored = state
            .matches
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::MissingReference(format!("match {instance_id}")))?;
        stored.events = events.to_vec();
        Ok(stored.clone())
    }

    async fn update_match_classification(
        &self,
        instance_id: &str,
        kind: MatchKind,
        header: &MatchHeader,
    ) -> StoreResult<Option<StoredMatch>> {
        let mut state = self.state()?;
        Ok(state.matches.get_mut(instance_id).map(|stored| {
            stored.record.kind = kind;
            stored.record.header = header.clone();
            stored.clone()
        }))
    }

    async fn find_destiny_profile(
        &self,
        account_id: i64,
    ) -> StoreResult<Option<StoredDestinyProfile>> {
        Ok(self.state()?.destiny_aggregate(account_id))
    }

    async fn write_destiny_profile(
        &self,
        draft: &DestinyProfileDraft,
    ) -> StoreResult<StoredDestinyProfile> {
        let mut state = self.state()?;
        let account_id = draft.profile.account_id;
        state.account(account_id)?;
        if let Some((owner, c)) = draft.characters.iter().find_map(|c| {
            state
                .characters
                .get(&c.character_id)
                .filter(|(owner, _)| *owner != account_id)
        }) {
            return Err(StoreError::Conflict(format!(
                "destiny_characters_pkey {} owned by account {owner}",
                c.character_id
            )));
        }

        state
            .destiny_profiles
            .insert(account_id, draft.profile.clone());
        state.characters.retain(|id, (owner, _)| {
            *owner != account_id || draft.characters.iter().any(|c| &c.character_id == id)
        });
        for character in &draft.characters {
            let mut character = character.clone();
            if let Some((_, stored)) = state.characters.get(&character.character_id) {
                character.highest_light = character.highest_light.max(stored.highest_light);
            }
            state
                .characters
                .insert(character.character_id.clone(), (account_id, character));
        }
        state
            .destiny_aggregate(account_id)
            .ok_or_else(|| StoreError::MissingReference(format!("destiny profile {account_id}")))
    }

    async fn find_halo5_profile(&self, account_id: i64) -> StoreResult<Option<Halo5Profile>> {
        Ok(self.state()?.halo5_profiles.get(&account_id).cloned())
    }

    async fn write_halo5_profile(&self, draft: &Halo5ProfileDraft) -> StoreResult<Halo5Profile> {
        let mut state = self.state()?;
        let account_id = draft.profile.account_id;
        state.account(account_id)?;
        state
            .halo5_profiles
            .insert(account_id, draft.profile.clone());
        for playlists in &draft.playlists {
            let season = playlists.season_id.clone();
            state.playlist_stats.retain(|(owner, stats, _)| {
                *owner != account_id || !(stats.season_id.is_none() || stats.season_id == season)
            });
            let now = Utc::now();
            for stats in &playlists.stats {
                state.playlist_stats.push((account_id, stats.clone(), now));
            }
        }
        Ok(draft.profile.clone())
    }

    async fn playlist_stats_updated_at(
        &self,
        account_id: i64,
        season_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self
            .state()?
            .playlist_stats
            .iter()
            .filter(|(owner, stats, _)| {
                *owner == account_id && stats.season_id.as_deref() == Some(season_id)
            })
            .map(|(_, _, at)| *at)
            .max())
    }

    async fn list_seasons(&self) -> StoreResult<Vec<Season>> {
        let mut seasons: Vec<Season> = self.state()?.seasons.values().cloned().collect();
        seasons.sort_by(|a, b| a.start_date.cmp(&b.start_date));
        Ok(seasons)
    }

    async fn find_season(&self, content_id: &str) -> StoreResult<Option<Season>> {
        Ok(self.state()?.seasons.get(content_id).cloned())
    }

    async fn upsert_season(&self, season: &Season) -> StoreResult<()> {
        self.state()?
            .seasons
            .insert(season.content_id.clone(), season.clone());
        Ok(())
    }

    async fn find_playlist(&self, content_id: &str) -> StoreResult<Option<Playlist>> {
        Ok(self.state()?.playlists.get(content_id).cloned())
    }

    async fn upsert_playlist(&self, playlist: &Playlist) -> StoreResult<()> {
        self.state()?
            .playlists
            .insert(playlist.content_id.clone(), playlist.clone());
        Ok(())
    }

    async fn find_map_variant(&self, content_id: &str) -> StoreResult<Option<MapVariant>> {
        Ok(self.state()?.map_variants.get(content_id).cloned())
    }

    async fn insert_map_variant(&self, variant: &MapVariant) -> StoreResult<MapVariant> {
        Ok(self
            .state()?
            .map_variants
            .entry(variant.content_id.clone())
            .or_insert_with(|| variant.clone())
            .clone())
    }
}
