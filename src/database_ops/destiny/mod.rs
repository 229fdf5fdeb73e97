//! Destiny integration against the Bungie Platform API: post-game carnage
//! reports, account summaries, player search and the Xûr sale catalog.

pub mod gametype;
pub mod normalize;
pub mod payload;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument};

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
    Account, DestinyHeader, DestinyProfile, DestinyProfileDraft, Game, MatchDraft, MatchHeader,
    MatchKind, Platform, StoredDestinyProfile, StoredMatch,
};
use crate::normalization::GamertagKey;

use self::normalize::SaleItem;
use self::payload::{
    AccountSummary, BungieEnvelope, CarnageReport, DataWrapper, SearchResult, UserInfo,
    VendorData, SYSTEM_DISABLED,
};

pub const API_KEY_HEADER: &str = "X-API-Key";

const REPORT_TTL: Duration = Duration::from_secs(60 * 60);
const SEARCH_TTL: Duration = Duration::from_secs(60 * 60);
const SALE_CATALOG_TTL: Duration = Duration::from_secs(120 * 60);

pub struct DestinyClient {
    fetcher: RemoteFetcher,
    store: Arc<dyn IngestStore>,
    resolver: IdentityResolver,
    dedup: DedupGuard,
    drift: DriftTracker,
    writer: TransactionalWriter,
    base_url: String,
    version: i32,
}

impl DestinyClient {
    pub fn new(
        config: &IngestConfig,
        transport: Arc<dyn JsonTransport>,
        cache: Arc<ResponseCache>,
        store: Arc<dyn IngestStore>,
        assets: Arc<dyn AssetRefresh>,
    ) -> Self {
        Self {
            fetcher: RemoteFetcher::new(transport, cache.clone()),
            resolver: IdentityResolver::new(store.clone(), assets, Game::Destiny),
            dedup: DedupGuard::new(store.clone()),
            drift: DriftTracker::new(config.inactivity_ceiling),
            writer: TransactionalWriter::new(cache),
            store,
            base_url: config.bungie_base_url.clone(),
            version: config.app_version,
        }
    }

    /// reqwest transport signed with the Bungie API key.
    pub fn http_transport(config: &IngestConfig) -> HttpTransport {
        HttpTransport::new(
            API_KEY_HEADER,
            config.bungie_api_key.clone(),
            config.http_timeout,
            &config.user_agent,
        )
    }

    fn report_url(&self, instance_id: &str) -> String {
        format!(
            "{}/Destiny/Stats/PostGameCarnageReport/{instance_id}/",
            self.base_url
        )
    }

    fn search_url(&self, key: &GamertagKey, platform: Platform) -> String {
        format!(
            "{}/Destiny/SearchDestinyPlayer/{}/{}/",
            self.base_url,
            platform.code(),
            key.for_api()
        )
    }

    fn summary_url(&self, platform: Platform, membership_id: &str) -> String {
        format!(
            "{}/Destiny/{}/Account/{membership_id}/Summary/",
            self.base_url,
            platform.code()
        )
    }

    fn sale_catalog_url(&self) -> String {
        format!("{}/Destiny/Advisors/Xur/", self.base_url)
    }

    /// Store a game by instance id. Already-stored games are returned as-is
    /// without touching upstream.
    #[instrument(skip(self))]
    pub async fn ingest_match(
        &self,
        type_hint: Option<&str>,
        instance_id: &str,
    ) -> IngestResult<StoredMatch> {
        let hint = parse_hint(type_hint)?;
        let instance_id = validate_instance_id(instance_id)?;

        if let MatchLookup::Complete(stored) = self.dedup.check_match(instance_id, false).await? {
            return Ok(stored);
        }

        let pass = IngestPass::new();
        self.writer
            .run(&pass, async {
                let url = self.report_url(instance_id);
                let report = self.fetch_report(&pass, &url, instance_id, Some(REPORT_TTL)).await?;
                let kind = gametype::classify(hint, report.activity_details.mode);
                let header = DestinyHeader {
                    reference_id: report.activity_details.reference_id,
                    raid_tuesday: None,
                    passage_id: None,
                };
                let draft = self.build_draft(&url, &report, kind, header).await?;
                let stored = self.store.write_match(&draft, None).await?;
                info!(
                    instance_id,
                    kind = kind.as_str(),
                    players = stored.players.len(),
                    "destiny game stored"
                );
                Ok(stored)
            })
            .await
    }

    /// Re-fetch a stored game and replace its players and PvP result, keeping
    /// its classification.
    #[instrument(skip(self))]
    pub async fn refresh_match(&self, instance_id: &str) -> IngestResult<StoredMatch> {
        let instance_id = validate_instance_id(instance_id)?;
        let stored = self
            .store
            .find_match(instance_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(Missing::Match(instance_id.to_string())))?;
        let header = destiny_header(&stored)?;

        let pass = IngestPass::new();
        self.writer
            .run(&pass, async {
                let url = self.report_url(instance_id);
                let report = self.fetch_report(&pass, &url, instance_id, None).await?;
                let header = DestinyHeader {
                    reference_id: report.activity_details.reference_id,
                    ..header
                };
                let draft = self
                    .build_draft(&url, &report, stored.record.kind, header)
                    .await?;
                Ok(self.store.write_match(&draft, None).await?)
            })
            .await
    }

    /// Re-tag a stored game. `detail` is the raid Tuesday for raids and the
    /// passage id for Trials of Osiris; other kinds clear both.
    #[instrument(skip(self))]
    pub async fn classify_game(
        &self,
        instance_id: &str,
        kind: &str,
        detail: Option<i32>,
    ) -> IngestResult<StoredMatch> {
        let kind = parse_hint(Some(kind))?;
        let instance_id = validate_instance_id(instance_id)?;
        let not_found = || IngestError::NotFound(Missing::Match(instance_id.to_string()));

        let stored = self.store.find_match(instance_id).await?.ok_or_else(not_found)?;
        let mut header = destiny_header(&stored)?;
        header.raid_tuesday = None;
        header.passage_id = None;
        match kind {
            MatchKind::Raid => header.raid_tuesday = detail,
            MatchKind::TrialsOfOsiris => header.passage_id = detail,
            _ => {}
        }

        self.store
            .update_match_classification(instance_id, kind, &MatchHeader::Destiny(header))
            .await?
            .ok_or_else(not_found)
    }

    /// Pull the account summary and rewrite the profile and its characters.
    #[instrument(skip(self))]
    pub async fn ingest_account_profile(
        &self,
        gamertag: &str,
        platform: Platform,
    ) -> IngestResult<StoredDestinyProfile> {
        let pass = IngestPass::new();
        self.writer
            .run(&pass, self.sync_profile(&pass, gamertag, platform))
            .await
    }

    /// Exotic gear currently on sale. `None` when the vendor is away.
    #[instrument(skip(self))]
    pub async fn sale_catalog(&self) -> IngestResult<Option<Vec<SaleItem>>> {
        let pass = IngestPass::new();
        let url = self.sale_catalog_url();
        self.writer
            .run(&pass, async {
                let envelope: BungieEnvelope<DataWrapper<VendorData>> = self
                    .fetcher
                    .fetch(&pass, &url, Some(SALE_CATALOG_TTL))
                    .await?;
                if envelope.error_code == SYSTEM_DISABLED {
                    return Err(IngestError::upstream(&url, "SystemDisabled"));
                }
                Ok(envelope
                    .response
                    .and_then(|wrapper| wrapper.data)
                    .map(|data| normalize::exotic_sale_items(&data)))
            })
            .await
    }

    async fn fetch_report(
        &self,
        pass: &IngestPass,
        url: &str,
        instance_id: &str,
        ttl: Option<Duration>,
    ) -> IngestResult<CarnageReport> {
        let envelope: BungieEnvelope<DataWrapper<CarnageReport>> =
            self.fetcher.fetch(pass, url, ttl).await?;
        envelope
            .into_response(url, Missing::Match(instance_id.to_string()))?
            .data
            .ok_or_else(|| IngestError::NotFound(Missing::Match(instance_id.to_string())))
    }

    async fn build_draft(
        &self,
        url: &str,
        report: &CarnageReport,
        kind: MatchKind,
        header: DestinyHeader,
    ) -> IngestResult<MatchDraft> {
        let mut players = Vec::with_capacity(report.entries.len());
        for entry in &report.entries {
            let account = self
                .account_for(url, &entry.player.destiny_user_info)
                .await?;
            players.push(normalize::player_row(entry, account.id));
        }
        let players = normalize::retain_participants(players);

        let pvp = report
            .activity_details
            .mode
            .filter(|mode| gametype::is_pvp(*mode))
            .map(|mode| normalize::pvp_result(mode, &report.teams));

        Ok(MatchDraft {
            record: normalize::match_record(report, kind, self.version, &players, header),
            pvp,
            teams: Vec::new(),
            players,
        })
    }

    /// Account for a player embedded in a report, created on first sight and
    /// then read back once by membership id. A known membership reported under
    /// a different tag is renamed on the way through.
    async fn account_for(&self, url: &str, user: &UserInfo) -> IngestResult<Account> {
        let key = GamertagKey::new(&user.display_name);
        if let Some(account) = self
            .store
            .find_account_by_membership(&user.membership_id)
            .await?
        {
            if key.is_empty() || (account.seo == key.seo() && account.gamertag == key.display()) {
                return Ok(account);
            }
        }
        let platform = Platform::from_code(user.membership_type).ok_or_else(|| {
            IngestError::upstream(
                url,
                format!("unknown membership type {}", user.membership_type),
            )
        })?;
        self.resolver
            .resolve_identity(&UpstreamIdentity {
                display_name: user.display_name.clone(),
                platform,
                membership_id: Some(user.membership_id.clone()),
            })
            .await?;
        self.store
            .find_account_by_membership(&user.membership_id)
            .await?
            .ok_or_else(|| IngestError::NotFound(Missing::Player(user.display_name.clone())))
    }

    async fn sync_profile(
        &self,
        pass: &IngestPass,
        gamertag: &str,
        platform: Platform,
    ) -> IngestResult<StoredDestinyProfile> {
        let mut account = self
            .resolver
            .resolve_account(pass, gamertag, platform, self)
            .await?;
        if account.membership_id.is_none() {
            let key = GamertagKey::new(gamertag);
            let identity = self
                .lookup_identity(pass, &key, account.platform)
                .await?
                .ok_or_else(|| IngestError::NotFound(Missing::Player(key.display().to_string())))?;
            account = self.resolver.resolve_identity(&identity).await?;
        }
        let membership_id = account
            .membership_id
            .clone()
            .ok_or_else(|| IngestError::NotFound(Missing::Player(account.gamertag.clone())))?;

        let url = self.summary_url(account.platform, &membership_id);
        let envelope: BungieEnvelope<DataWrapper<AccountSummary>> =
            self.fetcher.fetch(pass, &url, None).await?;
        let summary = envelope
            .into_response(&url, Missing::Player(account.gamertag.clone()))?
            .data
            .ok_or_else(|| IngestError::NotFound(Missing::Player(account.gamertag.clone())))?;

        let stored = self.store.find_destiny_profile(account.id).await?;
        let characters = summary
            .characters
            .iter()
            .take(normalize::MAX_CHARACTERS)
            .enumerate()
            .map(|(slot, character)| {
                let previous = stored.as_ref().and_then(|profile| {
                    profile
                        .characters
                        .iter()
                        .find(|c| c.character_id == character.character_base.character_id)
                });
                normalize::build_character(slot as i16, character, previous)
                    .map_err(|reason| IngestError::upstream(&url, reason))
            })
            .collect::<IngestResult<Vec<_>>>()?;

        let observation = normalize::observe_characters(stored.as_ref(), &characters);
        let inactive_counter = self.drift.apply(
            pass,
            &format!("destiny:{}", account.id),
            stored.as_ref().map_or(0, |s| s.profile.inactive_counter),
            observation,
        );

        let currencies = summary
            .inventory
            .as_ref()
            .map(|inventory| inventory.currencies.as_slice())
            .unwrap_or_default();
        let draft = DestinyProfileDraft {
            profile: DestinyProfile {
                account_id: account.id,
                clan_name: summary.clan_name.clone(),
                clan_tag: summary.clan_tag.clone(),
                glimmer: currencies.first().map(|c| c.value),
                legendary_marks: currencies.get(1).map(|c| c.value),
                grimoire: summary.grimoire_score,
                character_ids: characters.iter().map(|c| c.character_id.clone()).collect(),
                inactive_counter,
            },
            characters,
        };
        let written = self.store.write_destiny_profile(&draft).await?;
        debug!(
            account_id = account.id,
            characters = written.characters.len(),
            inactive_counter,
            "destiny profile written"
        );
        Ok(written)
    }
}

#[async_trait::async_trait]
impl IdentityLookup for DestinyClient {
    async fn lookup_identity(
        &self,
        pass: &IngestPass,
        key: &GamertagKey,
        platform: Platform,
    ) -> IngestResult<Option<UpstreamIdentity>> {
        let url = self.search_url(key, platform);
        let envelope: BungieEnvelope<Vec<SearchResult>> =
            self.fetcher.fetch(pass, &url, Some(SEARCH_TTL)).await?;
        let results = match envelope.into_response(&url, Missing::Player(key.display().to_string()))
        {
            Ok(results) => results,
            Err(IngestError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(results.into_iter().next().map(|hit| UpstreamIdentity {
            platform: Platform::from_code(hit.membership_type).unwrap_or(platform),
            display_name: hit.display_name,
            membership_id: Some(hit.membership_id),
        }))
    }
}

fn parse_hint(hint: Option<&str>) -> IngestResult<MatchKind> {
    let Some(raw) = hint else {
        return Ok(MatchKind::Unclassified);
    };
    MatchKind::parse(raw)
        .filter(|kind| gametype::is_destiny_kind(*kind))
        .ok_or_else(|| {
            IngestError::InvalidRequest(format!("unrecognized Destiny game type {raw:?}"))
        })
}

fn validate_instance_id(raw: &str) -> IngestResult<&str> {
    let id = raw.trim();
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IngestError::InvalidRequest(format!(
            "Destiny instance id must be numeric, got {raw:?}"
        )));
    }
    Ok(id)
}

fn destiny_header(stored: &StoredMatch) -> IngestResult<DestinyHeader> {
    match &stored.record.header {
        MatchHeader::Destiny(header) => Ok(header.clone()),
        MatchHeader::Halo5(_) => Err(IngestError::InvalidRequest(format!(
            "match {} is not a Destiny game",
            stored.record.instance_id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::assets::NoopAssetRefresh;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::database_ops::test_support::ScriptedTransport;
    use crate::models::{CharacterStats, DestinyCharacter, Equipment, LevelProgress, NewAccount};
    use serde_json::{json, Value};

    const BASE: &str = "https://bungie.test/Platform";
    const REPORT: &str = "https://bungie.test/Platform/Destiny/Stats/PostGameCarnageReport/4242/";
    const MEMBERSHIP: &str = "4611686018";
    const SUMMARY: &str = "https://bungie.test/Platform/Destiny/1/Account/4611686018/Summary/";

    struct Harness {
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryStore>,
        client: DestinyClient,
    }

    fn harness() -> Harness {
        let transport = Arc::new(ScriptedTransport::new());
        let store = Arc::new(MemoryStore::new());
        let config = IngestConfig {
            bungie_base_url: BASE.into(),
            ..IngestConfig::default()
        };
        let client = DestinyClient::new(
            &config,
            transport.clone(),
            Arc::new(ResponseCache::new()),
            store.clone(),
            Arc::new(NoopAssetRefresh),
        );
        Harness {
            transport,
            store,
            client,
        }
    }

    fn stat(value: f64) -> Value {
        json!({"basic": {"value": value}})
    }

    fn entry(n: usize, kills: f64, deaths: f64, score: f64, duration: f64) -> Value {
        json!({
            "player": {
                "destinyUserInfo": {
                    "membershipType": 1,
                    "membershipId": format!("46{n}"),
                    "displayName": format!("Guardian {n}")
                },
                "characterLevel": 40
            },
            "characterId": format!("23{n}"),
            "values": {
                "assists": stat(1.0),
                "deaths": stat(deaths),
                "kills": stat(kills),
                "completed": stat(1.0),
                "score": stat(score),
                "team": stat(16.0),
                "activityDurationSeconds": stat(duration)
            }
        })
    }

    fn report() -> Value {
        json!({
            "ErrorCode": 1,
            "Response": {"data": {
                "period": "2015-09-15T01:04:23Z",
                "activityDetails": {"referenceId": 2_659_248_068u64, "instanceId": "4242", "mode": 10},
                "entries": [
                    entry(1, 10.0, 2.0, 0.0, 640.0),
                    entry(2, 8.0, 4.0, 0.0, 640.0),
                    entry(3, 3.0, 7.0, 0.0, 640.0),
                    entry(4, 1.0, 1.0, 0.0, 612.0),
                    entry(5, 0.0, 1.0, 0.0, 58.0),
                    entry(6, 0.0, 0.0, 0.0, 58.0)
                ],
                "teams": [
                    {"teamId": 16, "standing": stat(1.0), "score": stat(40.0)},
                    {"teamId": 17, "standing": stat(2.0), "score": stat(30.0)}
                ]
            }}
        })
    }

    #[tokio::test]
    async fn ingest_is_idempotent_and_skips_upstream_when_stored() {
        let h = harness();
        h.transport.respond(REPORT, report());

        let first = h.client.ingest_match(None, "4242").await.expect("ingest");
        assert_eq!(first.record.kind, MatchKind::Pvp);
        assert_eq!(first.players.len(), 5);
        assert_eq!(first.record.duration_seconds, Some(640));
        let pvp = first.pvp.as_ref().expect("pvp result");
        assert_eq!(pvp.winner_team, None);
        assert_eq!(pvp.loser_team, Some(16));

        let second = h.client.ingest_match(None, "4242").await.expect("again");
        assert_eq!(second.id, first.id);
        assert_eq!(h.transport.total_calls(), 1);
        assert_eq!(h.store.match_count(), 1);
    }

    #[tokio::test]
    async fn bad_hint_or_id_is_rejected_before_any_fetch() {
        let h = harness();
        let err = h.client.ingest_match(Some("warzone"), "4242").await.expect_err("hint");
        assert!(matches!(err, IngestError::InvalidRequest(_)));
        let err = h.client.ingest_match(None, "not-a-number").await.expect_err("id");
        assert!(matches!(err, IngestError::InvalidRequest(_)));
        assert_eq!(h.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_writes_nothing() {
        let h = harness();
        h.transport.fail(REPORT);
        let err = h.client.ingest_match(None, "4242").await.expect_err("fails");
        assert!(err.is_retryable());
        assert_eq!(h.store.match_count(), 0);
    }

    #[tokio::test]
    async fn known_membership_under_new_tag_is_renamed() {
        let h = harness();
        let seeded = h
            .store
            .create_account(&NewAccount {
                gamertag: "Old Name".into(),
                seo: "old-name".into(),
                platform: Platform::Xbox,
                membership_id: Some("461".into()),
            })
            .await
            .expect("seed");
        h.transport.respond(REPORT, report());

        let stored = h.client.ingest_match(None, "4242").await.expect("ingest");
        assert!(stored.players.iter().any(|p| p.account_id == seeded.id));

        let account = h
            .store
            .find_account_by_membership("461")
            .await
            .expect("lookup")
            .expect("still attached");
        assert_eq!(account.id, seeded.id);
        assert_eq!(account.gamertag, "Guardian 1");
        assert_eq!(account.seo, "guardian-1");
    }

    #[tokio::test]
    async fn classify_and_refresh_require_a_stored_game() {
        let h = harness();
        let err = h.client.classify_game("4242", "raid", Some(3)).await.expect_err("absent");
        assert!(matches!(err, IngestError::NotFound(Missing::Match(_))));
        let err = h.client.refresh_match("4242").await.expect_err("absent");
        assert!(matches!(err, IngestError::NotFound(Missing::Match(_))));

        h.transport.respond(REPORT, report());
        h.client.ingest_match(Some("pvp"), "4242").await.expect("ingest");
        let tagged = h.client.classify_game("4242", "raid", Some(3)).await.expect("classify");
        assert_eq!(tagged.record.kind, MatchKind::Raid);
        match tagged.record.header {
            MatchHeader::Destiny(header) => assert_eq!(header.raid_tuesday, Some(3)),
            other => panic!("unexpected header {other:?}"),
        }

        let refreshed = h.client.refresh_match("4242").await.expect("refresh");
        assert_eq!(refreshed.record.kind, MatchKind::Raid);
        assert_eq!(refreshed.players.len(), 5);
    }

    fn character(id: &str, minutes: i64, highest_light: i32) -> DestinyCharacter {
        DestinyCharacter {
            character_id: id.into(),
            membership_id: MEMBERSHIP.into(),
            slot: 0,
            level: 40,
            light: highest_light,
            highest_light,
            minutes_played: minutes,
            minutes_played_last_session: 0,
            last_played: None,
            class_hash: 0,
            race_hash: 0,
            gender_hash: 0,
            emblem_hash: 0,
            stats: CharacterStats::default(),
            progress: LevelProgress::default(),
            equipment: Equipment::default(),
        }
    }

    fn summary_character(id: &str, minutes: i64, light: i64) -> Value {
        let equipment: Vec<Value> = (0..12).map(|i| json!({"itemHash": 500 + i})).collect();
        json!({
            "characterBase": {
                "membershipId": MEMBERSHIP,
                "characterId": id,
                "dateLastPlayed": "2015-11-01T20:00:00Z",
                "minutesPlayedThisSession": "30",
                "minutesPlayedTotal": minutes.to_string(),
                "raceHash": 1,
                "genderHash": 2,
                "classHash": 3,
                "stats": {
                    "STAT_DEFENSE": {"value": 1},
                    "STAT_INTELLECT": {"value": 2},
                    "STAT_DISCIPLINE": {"value": 3},
                    "STAT_STRENGTH": {"value": 4},
                    "STAT_LIGHT": {"value": light}
                },
                "peerView": {"equipment": equipment}
            },
            "levelProgression": {"level": 40, "nextLevelAt": 0, "progressToNextLevel": 0},
            "characterLevel": 40,
            "emblemHash": 77
        })
    }

    fn summary(characters: Vec<Value>) -> Value {
        json!({
            "ErrorCode": 1,
            "Response": {"data": {
                "clanName": "Fireteam",
                "clanTag": "FT",
                "inventory": {"currencies": [
                    {"itemHash": 3_159_615_086u64, "value": 25000},
                    {"itemHash": 2_534_352_370u64, "value": 150}
                ]},
                "grimoireScore": 4200,
                "characters": characters
            }}
        })
    }

    async fn seeded_account(h: &Harness, stored: Vec<DestinyCharacter>, counter: i32) -> i64 {
        let account = h
            .store
            .create_account(&NewAccount {
                gamertag: "Panda Love".into(),
                seo: "panda-love".into(),
                platform: Platform::Xbox,
                membership_id: Some(MEMBERSHIP.into()),
            })
            .await
            .expect("account");
        h.store
            .write_destiny_profile(&DestinyProfileDraft {
                profile: DestinyProfile {
                    account_id: account.id,
                    character_ids: stored.iter().map(|c| c.character_id.clone()).collect(),
                    inactive_counter: counter,
                    ..DestinyProfile::default()
                },
                characters: stored,
            })
            .await
            .expect("profile");
        account.id
    }

    #[tokio::test]
    async fn surplus_character_slots_are_pruned() {
        let h = harness();
        let stored = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|id| character(id, 100, 300))
            .collect();
        seeded_account(&h, stored, 0).await;
        h.transport.respond(
            SUMMARY,
            summary(vec![
                summary_character("a", 100, 300),
                summary_character("b", 100, 300),
                summary_character("c", 100, 300),
            ]),
        );

        let profile = h
            .client
            .ingest_account_profile("Panda Love", Platform::Xbox)
            .await
            .expect("profile");
        let mut ids: Vec<&str> = profile
            .characters
            .iter()
            .map(|c| c.character_id.as_str())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(profile.profile.glimmer, Some(25000));
        assert_eq!(profile.profile.legendary_marks, Some(150));
        assert_eq!(profile.profile.grimoire, 4200);
    }

    #[tokio::test]
    async fn unchanged_minutes_advance_the_counter_and_changes_reset_it() {
        let h = harness();
        seeded_account(&h, vec![character("a", 100, 320)], 100).await;

        h.transport.respond(SUMMARY, summary(vec![summary_character("a", 100, 300)]));
        let idle = h
            .client
            .ingest_account_profile("Panda Love", Platform::Xbox)
            .await
            .expect("idle");
        assert_eq!(idle.profile.inactive_counter, 101);
        assert_eq!(idle.characters[0].light, 300);
        assert_eq!(idle.characters[0].highest_light, 320);

        h.transport.respond(SUMMARY, summary(vec![summary_character("a", 150, 330)]));
        let active = h
            .client
            .ingest_account_profile("Panda Love", Platform::Xbox)
            .await
            .expect("active");
        assert_eq!(active.profile.inactive_counter, 0);
        assert_eq!(active.characters[0].highest_light, 330);
    }

    #[tokio::test]
    async fn account_without_membership_gets_it_from_search() {
        let h = harness();
        let bare = h
            .store
            .create_account(&NewAccount {
                gamertag: "Panda Love".into(),
                seo: "panda-love".into(),
                platform: Platform::Xbox,
                membership_id: None,
            })
            .await
            .expect("account");
        h.transport.respond(
            "https://bungie.test/Platform/Destiny/SearchDestinyPlayer/1/Panda%20Love/",
            json!({"ErrorCode": 1, "Response": [
                {"membershipType": 1, "membershipId": MEMBERSHIP, "displayName": "Panda Love"}
            ]}),
        );
        h.transport.respond(SUMMARY, summary(vec![summary_character("a", 10, 5)]));

        let profile = h
            .client
            .ingest_account_profile("Panda Love", Platform::Xbox)
            .await
            .expect("profile");
        assert_eq!(profile.profile.account_id, bare.id);
        assert_eq!(profile.profile.inactive_counter, 0);
        let account = h
            .store
            .find_account_by_id(bare.id)
            .await
            .expect("lookup")
            .expect("account");
        assert_eq!(account.membership_id.as_deref(), Some(MEMBERSHIP));
    }

    #[tokio::test]
    async fn sale_catalog_is_cached_and_empty_vendor_is_none() {
        let h = harness();
        let url = "https://bungie.test/Platform/Destiny/Advisors/Xur/";
        h.transport.respond(url, json!({"ErrorCode": 1, "Response": {}}));
        assert_eq!(h.client.sale_catalog().await.expect("catalog"), None);
        assert_eq!(h.client.sale_catalog().await.expect("cached"), None);
        assert_eq!(h.transport.calls(url), 1);
    }
}
