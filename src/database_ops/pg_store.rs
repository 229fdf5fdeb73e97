use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, QueryBuilder, Row};
use tracing::{debug, instrument};

use crate::database_ops::store::IngestStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Account, CharacterStats, DestinyCharacter, DestinyProfile, DestinyProfileDraft, Equipment,
    EventDetail, Game, Halo5Profile, Halo5ProfileDraft, HighestCsr, LevelProgress, MapVariant,
    MatchDraft, MatchEvent, MatchHeader, MatchKind, MatchPlayer, MatchRecord, MatchTeam,
    NewAccount, Platform, Playlist, PlayerExtras, PvpResult, Season, ServiceTotals,
    StoredDestinyProfile, StoredMatch, WarzoneTotals,
};
use crate::util::db::Db;

/// Postgres-backed store. Each aggregate write runs in its own transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(db: &Db) -> Self {
        Self {
            pool: db.pool.clone(),
        }
    }
}

/// Unique violations become `Conflict` so callers can recover; everything else
/// stays a database error.
fn map_unique(e: sqlx::Error) -> StoreError {
    let constraint = match &e {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => Some(
            db_err
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| "unique".to_string()),
        ),
        _ => None,
    };
    match constraint {
        Some(name) => StoreError::Conflict(name),
        None => StoreError::Database(e),
    }
}

fn account_from_row(row: &PgRow) -> StoreResult<Account> {
    let code: i16 = row.try_get("platform")?;
    let platform = Platform::from_code(code.into())
        .ok_or_else(|| StoreError::Decode(format!("unknown platform code {code}")))?;
    Ok(Account {
        id: row.try_get("id")?,
        gamertag: row.try_get("gamertag")?,
        seo: row.try_get("seo")?,
        platform,
        membership_id: row.try_get("membership_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, gamertag, seo, platform, membership_id, created_at, updated_at";

fn character_from_row(row: &PgRow) -> StoreResult<DestinyCharacter> {
    Ok(DestinyCharacter {
        character_id: row.try_get("character_id")?,
        membership_id: row.try_get("membership_id")?,
        slot: row.try_get("slot")?,
        level: row.try_get("level")?,
        light: row.try_get("light")?,
        highest_light: row.try_get("highest_light")?,
        minutes_played: row.try_get("minutes_played")?,
        minutes_played_last_session: row.try_get("minutes_played_last_session")?,
        last_played: row.try_get("last_played")?,
        class_hash: row.try_get("class_hash")?,
        race_hash: row.try_get("race_hash")?,
        gender_hash: row.try_get("gender_hash")?,
        emblem_hash: row.try_get("emblem_hash")?,
        stats: row.try_get::<Json<CharacterStats>, _>("stats")?.0,
        progress: row.try_get::<Json<LevelProgress>, _>("progress")?.0,
        equipment: row.try_get::<Json<Equipment>, _>("equipment")?.0,
    })
}

fn halo5_profile_from_row(row: &PgRow) -> StoreResult<Halo5Profile> {
    Ok(Halo5Profile {
        account_id: row.try_get("account_id")?,
        version: row.try_get("version")?,
        xp: row.try_get("xp")?,
        spartan_rank: row.try_get("spartan_rank")?,
        season_id: row.try_get("season_id")?,
        arena: row.try_get::<Json<ServiceTotals>, _>("arena")?.0,
        highest_csr: row
            .try_get::<Option<Json<HighestCsr>>, _>("highest_csr")?
            .map(|j| j.0),
        warzone: row
            .try_get::<Option<Json<WarzoneTotals>>, _>("warzone")?
            .map(|j| j.0),
        inactive_counter: row.try_get("inactive_counter")?,
        disabled: row.try_get("disabled")?,
    })
}

fn season_from_row(row: &PgRow) -> StoreResult<Season> {
    Ok(Season {
        content_id: row.try_get("content_id")?,
        name: row.try_get("name")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        is_active: row.try_get("is_active")?,
    })
}

async fn load_match(
    conn: &mut PgConnection,
    instance_id: &str,
) -> StoreResult<Option<StoredMatch>> {
    let Some(row) = sqlx::query(
        "SELECT id, game, instance_id, kind, mode, occurred_at, version, duration_seconds, mercy, header
         FROM matches WHERE instance_id = $1",
    )
    .persistent(false)
    .bind(instance_id)
    .fetch_optional(&mut *conn)
    .await?
    else {
        return Ok(None);
    };

    let id: i64 = row.try_get("id")?;
    let game_code: i16 = row.try_get("game")?;
    let game = Game::from_code(game_code.into())
        .ok_or_else(|| StoreError::Decode(format!("unknown game code {game_code}")))?;
    let kind_raw: String = row.try_get("kind")?;
    let kind = MatchKind::parse(&kind_raw)
        .ok_or_else(|| StoreError::Decode(format!("unknown match kind {kind_raw}")))?;
    let record = MatchRecord {
        game,
        instance_id: row.try_get("instance_id")?,
        kind,
        mode: row.try_get("mode")?,
        occurred_at: row.try_get("occurred_at")?,
        version: row.try_get("version")?,
        duration_seconds: row.try_get("duration_seconds")?,
        mercy: row.try_get("mercy")?,
        header: row.try_get::<Json<MatchHeader>, _>("header")?.0,
    };

    let pvp = sqlx::query(
        "SELECT gametype, winner_team, winner_points, loser_team, loser_points
         FROM match_pvp WHERE match_id = $1",
    )
    .persistent(false)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .map(|r| -> StoreResult<PvpResult> {
        Ok(PvpResult {
            gametype: r.try_get("gametype")?,
            winner_team: r.try_get("winner_team")?,
            winner_points: r.try_get("winner_points")?,
            loser_team: r.try_get("loser_team")?,
            loser_points: r.try_get("loser_points")?,
        })
    })
    .transpose()?;

    let teams = sqlx::query(
        "SELECT team_id, score, rank, round_stats FROM match_teams
         WHERE match_id = $1 ORDER BY rank, team_id",
    )
    .persistent(false)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| -> StoreResult<MatchTeam> {
        Ok(MatchTeam {
            team_id: r.try_get("team_id")?,
            score: r.try_get("score")?,
            rank: r.try_get("rank")?,
            round_stats: r.try_get("round_stats")?,
        })
    })
    .collect::<StoreResult<Vec<_>>>()?;

    let players = sqlx::query(
        "SELECT account_id, team, kills, deaths, assists, score, seconds_played,
                average_lifespan, duration_seconds, completed, extras
         FROM match_players WHERE match_id = $1 ORDER BY id",
    )
    .persistent(false)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| -> StoreResult<MatchPlayer> {
        Ok(MatchPlayer {
            account_id: r.try_get("account_id")?,
            team: r.try_get("team")?,
            kills: r.try_get("kills")?,
            deaths: r.try_get("deaths")?,
            assists: r.try_get("assists")?,
            score: r.try_get("score")?,
            seconds_played: r.try_get("seconds_played")?,
            average_lifespan: r.try_get("average_lifespan")?,
            duration_seconds: r.try_get("duration_seconds")?,
            completed: r.try_get("completed")?,
            extras: r.try_get::<Json<PlayerExtras>, _>("extras")?.0,
        })
    })
    .collect::<StoreResult<Vec<_>>>()?;

    let events = sqlx::query(
        "SELECT e.seq, e.seconds_since_start, e.detail,
                COALESCE(array_agg(a.account_id ORDER BY a.position)
                         FILTER (WHERE a.account_id IS NOT NULL), '{}') AS assists
         FROM match_events e
         LEFT JOIN match_event_assists a ON a.event_id = e.id
         WHERE e.match_id = $1
         GROUP BY e.id
         ORDER BY e.seq",
    )
    .persistent(false)
    .bind(id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|r| -> StoreResult<MatchEvent> {
        Ok(MatchEvent {
            seq: r.try_get("seq")?,
            seconds_since_start: r.try_get("seconds_since_start")?,
            detail: r.try_get::<Json<EventDetail>, _>("detail")?.0,
            assists: r.try_get("assists")?,
        })
    })
    .collect::<StoreResult<Vec<_>>>()?;

    Ok(Some(StoredMatch {
        id,
        record,
        pvp,
        teams,
        players,
        events,
    }))
}

async fn insert_events(
    conn: &mut PgConnection,
    match_id: i64,
    events: &[MatchEvent],
) -> StoreResult<()> {
    sqlx::query("DELETE FROM match_events WHERE match_id = $1")
        .persistent(false)
        .bind(match_id)
        .execute(&mut *conn)
        .await?;
    for event in events {
        let event_id: i64 = sqlx::query_scalar(
            "INSERT INTO match_events (match_id, seq, kind, seconds_since_start, actor_id, detail)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .persistent(false)
        .bind(match_id)
        .bind(event.seq)
        .bind(event.detail.kind())
        .bind(event.seconds_since_start)
        .bind(event.detail.actor())
        .bind(Json(&event.detail))
        .fetch_one(&mut *conn)
        .await
        .map_err(map_unique)?;

        if event.assists.is_empty() {
            continue;
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> =
            QueryBuilder::new("INSERT INTO match_event_assists (event_id, position, account_id) ");
        qb.push_values(event.assists.iter().enumerate(), |mut b, (position, account_id)| {
            b.push_bind(event_id)
                .push_bind(position as i32)
                .push_bind(*account_id);
        });
        qb.build().persistent(false).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn insert_playlist_stats(
    conn: &mut PgConnection,
    account_id: i64,
    season_id: Option<&str>,
    stats: &[crate::models::PlaylistStats],
) -> StoreResult<()> {
    sqlx::query(
        "DELETE FROM halo5_playlist_stats
         WHERE account_id = $1 AND (season_id IS NULL OR season_id = $2)",
    )
    .persistent(false)
    .bind(account_id)
    .bind(season_id)
    .execute(&mut *conn)
    .await?;
    if stats.is_empty() {
        return Ok(());
    }
    let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
        "INSERT INTO halo5_playlist_stats (account_id, playlist_id, season_id, measurement_matches_left, highest_csr, current_csr, csr_percentile, totals) ",
    );
    qb.push_values(stats, |mut b, s| {
        b.push_bind(account_id)
            .push_bind(&s.playlist_id)
            .push_bind(&s.season_id)
            .push_bind(s.measurement_matches_left)
            .push_bind(s.highest_csr.map(Json))
            .push_bind(s.current_csr.map(Json))
            .push_bind(s.csr_percentile)
            .push_bind(Json(s.totals));
    });
    qb.build().persistent(false).execute(&mut *conn).await?;
    Ok(())
}

#[async_trait::async_trait]
impl IngestStore for PgStore {
    async fn find_account_by_id(&self, id: i64) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        sqlx::query(&sql)
            .persistent(false)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn find_account_by_seo(
        &self,
        seo: &str,
        platform: Platform,
    ) -> StoreResult<Option<Account>> {
        let sql =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE seo = $1 AND platform = $2");
        sqlx::query(&sql)
            .persistent(false)
            .bind(seo)
            .bind(platform.code())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn find_account_by_membership(
        &self,
        membership_id: &str,
    ) -> StoreResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE membership_id = $1");
        sqlx::query(&sql)
            .persistent(false)
            .bind(membership_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    #[instrument(skip(self, account), fields(seo = %account.seo))]
    async fn create_account(&self, account: &NewAccount) -> StoreResult<Account> {
        let sql = format!(
            "INSERT INTO accounts (gamertag, seo, platform, membership_id)
             VALUES ($1, $2, $3, $4) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(&account.gamertag)
            .bind(&account.seo)
            .bind(account.platform.code())
            .bind(&account.membership_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_unique)?;
        account_from_row(&row)
    }

    async fn rename_account(&self, id: i64, gamertag: &str, seo: &str) -> StoreResult<Account> {
        let sql = format!(
            "UPDATE accounts SET gamertag = $2, seo = $3, updated_at = now()
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(id)
            .bind(gamertag)
            .bind(seo)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_unique)?
            .ok_or_else(|| StoreError::MissingReference(format!("account {id}")))?;
        account_from_row(&row)
    }

    async fn attach_membership(&self, id: i64, membership_id: &str) -> StoreResult<Account> {
        let sql = format!(
            "UPDATE accounts SET membership_id = $2, updated_at = now()
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(id)
            .bind(membership_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_unique)?
            .ok_or_else(|| StoreError::MissingReference(format!("account {id}")))?;
        account_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn move_membership(
        &self,
        from: i64,
        to: i64,
        membership_id: &str,
    ) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await?;
        let released = sqlx::query(
            "UPDATE accounts SET membership_id = NULL, updated_at = now()
             WHERE id = $1 AND membership_id = $2",
        )
        .persistent(false)
        .bind(from)
        .bind(membership_id)
        .execute(&mut *tx)
        .await?;
        if released.rows_affected() == 0 {
            return Err(StoreError::MissingReference(format!(
                "membership {membership_id} on account {from}"
            )));
        }

        let sql = format!(
            "UPDATE accounts SET membership_id = $2, updated_at = now()
             WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(to)
            .bind(membership_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_unique)?
            .ok_or_else(|| StoreError::MissingReference(format!("account {to}")))?;
        let account = account_from_row(&row)?;
        tx.commit().await?;
        Ok(account)
    }

    async fn find_match(&self, instance_id: &str) -> StoreResult<Option<StoredMatch>> {
        let mut conn = self.pool.acquire().await?;
        load_match(&mut conn, instance_id).await
    }

    #[instrument(skip(self, draft, events), fields(instance_id = %draft.record.instance_id))]
    async fn write_match(
        &self,
        draft: &MatchDraft,
        events: Option<&[MatchEvent]>,
    ) -> StoreResult<StoredMatch> {
        let record = &draft.record;
        let mut tx = self.pool.begin().await?;

        let match_id: i64 = sqlx::query_scalar(
            "INSERT INTO matches (game, instance_id, kind, mode, occurred_at, version, duration_seconds, mercy, header)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (instance_id) DO UPDATE SET
                game = EXCLUDED.game,
                kind = EXCLUDED.kind,
                mode = EXCLUDED.mode,
                occurred_at = EXCLUDED.occurred_at,
                version = EXCLUDED.version,
                duration_seconds = EXCLUDED.duration_seconds,
                mercy = EXCLUDED.mercy,
                header = EXCLUDED.header,
                updated_at = now()
             RETURNING id",
        )
        .persistent(false)
        .bind(record.game.code())
        .bind(&record.instance_id)
        .bind(record.kind.as_str())
        .bind(record.mode)
        .bind(record.occurred_at)
        .bind(record.version)
        .bind(record.duration_seconds)
        .bind(record.mercy)
        .bind(Json(&record.header))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_unique)?;

        for table in ["match_players", "match_teams", "match_pvp"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE match_id = $1"))
                .persistent(false)
                .bind(match_id)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(pvp) = &draft.pvp {
            sqlx::query(
                "INSERT INTO match_pvp (match_id, gametype, winner_team, winner_points, loser_team, loser_points)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .persistent(false)
            .bind(match_id)
            .bind(pvp.gametype)
            .bind(pvp.winner_team)
            .bind(pvp.winner_points)
            .bind(pvp.loser_team)
            .bind(pvp.loser_points)
            .execute(&mut *tx)
            .await?;
        }

        if !draft.teams.is_empty() {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> =
                QueryBuilder::new("INSERT INTO match_teams (match_id, team_id, score, rank, round_stats) ");
            qb.push_values(&draft.teams, |mut b, t| {
                b.push_bind(match_id)
                    .push_bind(t.team_id)
                    .push_bind(t.score)
                    .push_bind(t.rank)
                    .push_bind(&t.round_stats);
            });
            qb.build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .map_err(map_unique)?;
        }

        if !draft.players.is_empty() {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO match_players (match_id, account_id, team, kills, deaths, assists, score, seconds_played, average_lifespan, duration_seconds, completed, extras) ",
            );
            qb.push_values(&draft.players, |mut b, p| {
                b.push_bind(match_id)
                    .push_bind(p.account_id)
                    .push_bind(&p.team)
                    .push_bind(p.kills)
                    .push_bind(p.deaths)
                    .push_bind(p.assists)
                    .push_bind(p.score)
                    .push_bind(p.seconds_played)
                    .push_bind(p.average_lifespan)
                    .push_bind(p.duration_seconds)
                    .push_bind(p.completed)
                    .push_bind(Json(&p.extras));
            });
            qb.build().persistent(false).execute(&mut *tx).await?;
        }

        if let Some(events) = events {
            insert_events(&mut tx, match_id, events).await?;
        }

        let stored = load_match(&mut tx, &record.instance_id)
            .await?
            .ok_or_else(|| StoreError::MissingReference(format!("match {}", record.instance_id)))?;
        tx.commit().await?;
        debug!(match_id, players = stored.players.len(), "match written");
        Ok(stored)
    }

    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn replace_match_events(
        &self,
        instance_id: &str,
        events: &[MatchEvent],
    ) -> StoreResult<StoredMatch> {
        let mut tx = self.pool.begin().await?;
        let match_id: i64 =
            sqlx::query_scalar("SELECT id FROM matches WHERE instance_id = $1 FOR UPDATE")
                .persistent(false)
                .bind(instance_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::MissingReference(format!("match {instance_id}")))?;
        insert_events(&mut tx, match_id, events).await?;
        let stored = load_match(&mut tx, instance_id)
            .await?
            .ok_or_else(|| StoreError::MissingReference(format!("match {instance_id}")))?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn update_match_classification(
        &self,
        instance_id: &str,
        kind: MatchKind,
        header: &MatchHeader,
    ) -> StoreResult<Option<StoredMatch>> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE matches SET kind = $2, header = $3, updated_at = now() WHERE instance_id = $1",
        )
        .persistent(false)
        .bind(instance_id)
        .bind(kind.as_str())
        .bind(Json(header))
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        let stored = load_match(&mut tx, instance_id).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn find_destiny_profile(
        &self,
        account_id: i64,
    ) -> StoreResult<Option<StoredDestinyProfile>> {
        let Some(row) = sqlx::query(
            "SELECT account_id, clan_name, clan_tag, glimmer, legendary_marks, grimoire, character_ids, inactive_counter
             FROM destiny_profiles WHERE account_id = $1",
        )
        .persistent(false)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let profile = DestinyProfile {
            account_id: row.try_get("account_id")?,
            clan_name: row.try_get("clan_name")?,
            clan_tag: row.try_get("clan_tag")?,
            glimmer: row.try_get("glimmer")?,
            legendary_marks: row.try_get("legendary_marks")?,
            grimoire: row.try_get("grimoire")?,
            character_ids: row.try_get("character_ids")?,
            inactive_counter: row.try_get("inactive_counter")?,
        };
        let characters =
            sqlx::query("SELECT * FROM destiny_characters WHERE account_id = $1 ORDER BY slot")
                .persistent(false)
                .bind(account_id)
                .fetch_all(&self.pool)
                .await?
                .iter()
                .map(character_from_row)
                .collect::<StoreResult<Vec<_>>>()?;
        Ok(Some(StoredDestinyProfile {
            profile,
            characters,
        }))
    }

    #[instrument(skip(self, draft), fields(account_id = draft.profile.account_id))]
    async fn write_destiny_profile(
        &self,
        draft: &DestinyProfileDraft,
    ) -> StoreResult<StoredDestinyProfile> {
        let profile = &draft.profile;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO destiny_profiles (account_id, clan_name, clan_tag, glimmer, legendary_marks, grimoire, character_ids, inactive_counter)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (account_id) DO UPDATE SET
                clan_name = EXCLUDED.clan_name,
                clan_tag = EXCLUDED.clan_tag,
                glimmer = EXCLUDED.glimmer,
                legendary_marks = EXCLUDED.legendary_marks,
                grimoire = EXCLUDED.grimoire,
                character_ids = EXCLUDED.character_ids,
                inactive_counter = EXCLUDED.inactive_counter,
                updated_at = now()",
        )
        .persistent(false)
        .bind(profile.account_id)
        .bind(&profile.clan_name)
        .bind(&profile.clan_tag)
        .bind(profile.glimmer)
        .bind(profile.legendary_marks)
        .bind(profile.grimoire)
        .bind(&profile.character_ids)
        .bind(profile.inactive_counter)
        .execute(&mut *tx)
        .await?;

        for c in &draft.characters {
            let owned: Option<String> = sqlx::query_scalar(
                "INSERT INTO destiny_characters (character_id, account_id, membership_id, slot, level, light, highest_light,
                    minutes_played, minutes_played_last_session, last_played, class_hash, race_hash, gender_hash, emblem_hash,
                    stats, progress, equipment)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                 ON CONFLICT (character_id) DO UPDATE SET
                    membership_id = EXCLUDED.membership_id,
                    slot = EXCLUDED.slot,
                    level = EXCLUDED.level,
                    light = EXCLUDED.light,
                    highest_light = GREATEST(destiny_characters.highest_light, EXCLUDED.highest_light),
                    minutes_played = EXCLUDED.minutes_played,
                    minutes_played_last_session = EXCLUDED.minutes_played_last_session,
                    last_played = EXCLUDED.last_played,
                    class_hash = EXCLUDED.class_hash,
                    race_hash = EXCLUDED.race_hash,
                    gender_hash = EXCLUDED.gender_hash,
                    emblem_hash = EXCLUDED.emblem_hash,
                    stats = EXCLUDED.stats,
                    progress = EXCLUDED.progress,
                    equipment = EXCLUDED.equipment,
                    updated_at = now()
                 WHERE destiny_characters.account_id = EXCLUDED.account_id
                 RETURNING character_id",
            )
            .persistent(false)
            .bind(&c.character_id)
            .bind(profile.account_id)
            .bind(&c.membership_id)
            .bind(c.slot)
            .bind(c.level)
            .bind(c.light)
            .bind(c.highest_light)
            .bind(c.minutes_played)
            .bind(c.minutes_played_last_session)
            .bind(c.last_played)
            .bind(c.class_hash)
            .bind(c.race_hash)
            .bind(c.gender_hash)
            .bind(c.emblem_hash)
            .bind(Json(c.stats))
            .bind(Json(c.progress))
            .bind(Json(&c.equipment))
            .fetch_optional(&mut *tx)
            .await?;
            if owned.is_none() {
                return Err(StoreError::Conflict(format!(
                    "destiny_characters_pkey {} owned by another account",
                    c.character_id
                )));
            }
        }

        let keep: Vec<String> = draft
            .characters
            .iter()
            .map(|c| c.character_id.clone())
            .collect();
        let pruned = sqlx::query(
            "DELETE FROM destiny_characters WHERE account_id = $1 AND NOT (character_id = ANY($2))",
        )
        .persistent(false)
        .bind(profile.account_id)
        .bind(&keep)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        if pruned > 0 {
            debug!(pruned, "removed surplus characters");
        }

        self.find_destiny_profile(profile.account_id)
            .await?
            .ok_or_else(|| {
                StoreError::MissingReference(format!("destiny profile {}", profile.account_id))
            })
    }

    async fn find_halo5_profile(&self, account_id: i64) -> StoreResult<Option<Halo5Profile>> {
        sqlx::query("SELECT * FROM halo5_profiles WHERE account_id = $1")
            .persistent(false)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(halo5_profile_from_row)
            .transpose()
    }

    #[instrument(skip(self, draft), fields(account_id = draft.profile.account_id))]
    async fn write_halo5_profile(&self, draft: &Halo5ProfileDraft) -> StoreResult<Halo5Profile> {
        let p = &draft.profile;
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "INSERT INTO halo5_profiles (account_id, version, xp, spartan_rank, season_id, arena, highest_csr, warzone, inactive_counter, disabled)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (account_id) DO UPDATE SET
                version = EXCLUDED.version,
                xp = EXCLUDED.xp,
                spartan_rank = EXCLUDED.spartan_rank,
                season_id = EXCLUDED.season_id,
                arena = EXCLUDED.arena,
                highest_csr = EXCLUDED.highest_csr,
                warzone = EXCLUDED.warzone,
                inactive_counter = EXCLUDED.inactive_counter,
                disabled = EXCLUDED.disabled,
                updated_at = now()
             RETURNING *",
        )
        .persistent(false)
        .bind(p.account_id)
        .bind(p.version)
        .bind(p.xp)
        .bind(p.spartan_rank)
        .bind(&p.season_id)
        .bind(Json(p.arena))
        .bind(p.highest_csr.as_ref().map(Json))
        .bind(p.warzone.map(Json))
        .bind(p.inactive_counter)
        .bind(p.disabled)
        .fetch_one(&mut *tx)
        .await?;
        let stored = halo5_profile_from_row(&row)?;

        for playlists in &draft.playlists {
            insert_playlist_stats(
                &mut tx,
                p.account_id,
                playlists.season_id.as_deref(),
                &playlists.stats,
            )
            .await?;
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn playlist_stats_updated_at(
        &self,
        account_id: i64,
        season_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT max(updated_at) FROM halo5_playlist_stats WHERE account_id = $1 AND season_id = $2",
        )
        .persistent(false)
        .bind(account_id)
        .bind(season_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(at)
    }

    async fn list_seasons(&self) -> StoreResult<Vec<Season>> {
        sqlx::query("SELECT * FROM halo5_seasons ORDER BY start_date NULLS FIRST")
            .persistent(false)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(season_from_row)
            .collect()
    }

    async fn find_season(&self, content_id: &str) -> StoreResult<Option<Season>> {
        sqlx::query("SELECT * FROM halo5_seasons WHERE content_id = $1")
            .persistent(false)
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(season_from_row)
            .transpose()
    }

    async fn upsert_season(&self, season: &Season) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO halo5_seasons (content_id, name, start_date, end_date, is_active)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (content_id) DO UPDATE SET
                name = EXCLUDED.name, start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date, is_active = EXCLUDED.is_active",
        )
        .persistent(false)
        .bind(&season.content_id)
        .bind(&season.name)
        .bind(season.start_date)
        .bind(season.end_date)
        .bind(season.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_playlist(&self, content_id: &str) -> StoreResult<Option<Playlist>> {
        let row = sqlx::query("SELECT * FROM halo5_playlists WHERE content_id = $1")
            .persistent(false)
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> StoreResult<Playlist> {
            Ok(Playlist {
                content_id: r.try_get("content_id")?,
                name: r.try_get("name")?,
                game_mode: r.try_get("game_mode")?,
                is_ranked: r.try_get("is_ranked")?,
            })
        })
        .transpose()
    }

    async fn upsert_playlist(&self, playlist: &Playlist) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO halo5_playlists (content_id, name, game_mode, is_ranked)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (content_id) DO UPDATE SET
                name = EXCLUDED.name, game_mode = EXCLUDED.game_mode, is_ranked = EXCLUDED.is_ranked",
        )
        .persistent(false)
        .bind(&playlist.content_id)
        .bind(&playlist.name)
        .bind(&playlist.game_mode)
        .bind(playlist.is_ranked)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_map_variant(&self, content_id: &str) -> StoreResult<Option<MapVariant>> {
        let row = sqlx::query("SELECT * FROM halo5_map_variants WHERE content_id = $1")
            .persistent(false)
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| -> StoreResult<MapVariant> {
            Ok(MapVariant {
                content_id: r.try_get("content_id")?,
                name: r.try_get("name")?,
                map_id: r.try_get("map_id")?,
                description: r.try_get("description")?,
            })
        })
        .transpose()
    }

    async fn insert_map_variant(&self, variant: &MapVariant) -> StoreResult<MapVariant> {
        sqlx::query(
            "INSERT INTO halo5_map_variants (content_id, name, map_id, description)
             VALUES ($1, $2, $3, $4) ON CONFLICT (content_id) DO NOTHING",
        )
        .persistent(false)
        .bind(&variant.content_id)
        .bind(&variant.name)
        .bind(&variant.map_id)
        .bind(&variant.description)
        .execute(&self.pool)
        .await?;
        self.find_map_variant(&variant.content_id)
            .await?
            .ok_or_else(|| {
                StoreError::MissingReference(format!("map variant {}", variant.content_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::test_support::{arena_match, arena_player};
    use crate::util::env::db_url;
    use uuid::Uuid;

    #[test]
    fn non_database_errors_are_not_conflicts() {
        let err = map_unique(sqlx::Error::RowNotFound);
        assert!(!err.is_conflict());
        assert!(matches!(err, StoreError::Database(_)));
    }

    async fn live_store() -> PgStore {
        dotenv::dotenv().ok();
        let url = db_url().expect("DATABASE_URL");
        let db = Db::connect(&url, 2, true).await.expect("connect");
        PgStore::new(&db)
    }

    fn unique_account(prefix: &str, membership: Option<String>) -> NewAccount {
        let tag = format!("{prefix} {}", Uuid::new_v4().simple());
        NewAccount {
            seo: crate::normalization::seo_gamertag(&tag),
            gamertag: tag,
            platform: Platform::Xbox,
            membership_id: membership,
        }
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL in environment
    async fn duplicate_account_maps_to_conflict() {
        let store = live_store().await;
        let new = unique_account("Dup", Some(Uuid::new_v4().to_string()));
        store.create_account(&new).await.expect("first create");

        let err = store.create_account(&new).await.expect_err("second create");
        assert!(err.is_conflict(), "expected conflict, got {err:?}");
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL in environment
    async fn rewriting_a_match_replaces_child_rows() {
        let store = live_store().await;
        let first = store.create_account(&unique_account("Rw", None)).await.expect("first");
        let second = store.create_account(&unique_account("Rw", None)).await.expect("second");
        let instance_id = Uuid::new_v4().to_string();

        let players = vec![arena_player(first.id, 3, 1), arena_player(second.id, 1, 3)];
        let initial = store
            .write_match(&arena_match(&instance_id, players), None)
            .await
            .expect("initial write");
        assert_eq!(initial.players.len(), 2);

        store
            .write_match(&arena_match(&instance_id, vec![arena_player(second.id, 7, 2)]), None)
            .await
            .expect("rewrite");
        let stored = store
            .find_match(&instance_id)
            .await
            .expect("lookup")
            .expect("stored");
        assert_eq!(stored.id, initial.id);
        assert_eq!(stored.players.len(), 1);
        assert_eq!(stored.players[0].account_id, second.id);
        assert_eq!(stored.players[0].kills, 7);
    }

    #[tokio::test]
    #[ignore] // Requires DATABASE_URL in environment
    async fn membership_moves_between_accounts_atomically() {
        let store = live_store().await;
        let membership = Uuid::new_v4().to_string();
        let holder = store
            .create_account(&unique_account("Mv", Some(membership.clone())))
            .await
            .expect("holder");
        let bare = store.create_account(&unique_account("Mv", None)).await.expect("bare");

        let moved = store
            .move_membership(holder.id, bare.id, &membership)
            .await
            .expect("move");
        assert_eq!(moved.id, bare.id);
        let found = store
            .find_account_by_membership(&membership)
            .await
            .expect("lookup")
            .expect("attached");
        assert_eq!(found.id, bare.id);
    }
}
