use chrono::{DateTime, Utc};
use serde::Serialize;

use super::payload::{
    ArenaServiceRecord, CarnageReport, CsrPayload, HistoryEntry, LeaderboardRow, PlayerStat,
    SeasonMetadata, PlaylistMetadata, TeamStat, Totals, WarzoneStat,
};
use crate::models::{
    Csr, Game, Halo5Header, Halo5PlayerExtras, Halo5Profile, HighestCsr, MatchHeader, MatchKind,
    MatchPlayer, MatchRecord, MatchTeam, PlayerExtras, Playlist, PlaylistStats, Season,
    SeasonPlaylists, ServiceTotals, WarzoneTotals,
};
use crate::normalization::{iso8601_whole_seconds, parse_iso8601_seconds};

/// Placement matches a playlist requires before a real rating is shown.
const MEASUREMENT_MATCHES: i32 = 10;

pub fn csr(payload: &CsrPayload) -> Csr {
    Csr {
        tier: payload.tier,
        designation_id: payload.designation_id,
        csr: payload.csr,
        percent_to_next_tier: payload.percent_to_next_tier,
        rank: payload.rank,
    }
}

/// Current rating for a player row. While placement matches remain the tier
/// counts placement progress and the designation is "unranked".
pub fn player_csr(current: Option<&CsrPayload>, matches_left: Option<i32>) -> Option<Csr> {
    let mut rating = current.map(csr);
    if let Some(left) = matches_left.filter(|left| *left != 0) {
        let placement = rating.get_or_insert(Csr {
            tier: 0,
            designation_id: 0,
            csr: 0,
            percent_to_next_tier: 0,
            rank: None,
        });
        placement.designation_id = 0;
        placement.tier = MEASUREMENT_MATCHES - left;
    }
    rating
}

pub fn totals(payload: &Totals) -> ServiceTotals {
    ServiceTotals {
        kills: payload.total_kills,
        spartan_kills: payload.total_spartan_kills,
        headshots: payload.total_headshots,
        deaths: payload.total_deaths,
        assists: payload.total_assists,
        games_completed: payload.total_games_completed,
        games_won: payload.total_games_won,
        games_lost: payload.total_games_lost,
        games_tied: payload.total_games_tied,
        time_played_seconds: iso8601_whole_seconds(&payload.total_time_played).unwrap_or(0),
    }
}

pub fn teams(stats: &[TeamStat]) -> Vec<MatchTeam> {
    stats
        .iter()
        .map(|team| MatchTeam {
            team_id: team.team_id,
            score: team.score,
            rank: team.rank,
            round_stats: team.round_stats.clone(),
        })
        .collect()
}

/// Team label: the upstream team in team games, otherwise the player's own slot.
pub fn team_label(match_id: &str, is_team_game: bool, team_id: i32, index: usize) -> String {
    if is_team_game {
        format!("{match_id}_{team_id}")
    } else {
        format!("{match_id}_{index}")
    }
}

/// Halo 5 reports carry no per-player score, so a slot with neither kills
/// nor deaths never took part.
pub fn is_participant(stat: &PlayerStat) -> bool {
    stat.total_kills != 0 || stat.total_deaths != 0
}

pub fn player_row(
    match_id: &str,
    report: &CarnageReport,
    index: usize,
    stat: &PlayerStat,
    account_id: i64,
) -> MatchPlayer {
    MatchPlayer {
        account_id,
        team: Some(team_label(match_id, report.is_team_game, stat.team_id, index)),
        kills: stat.total_kills,
        deaths: stat.total_deaths,
        assists: stat.total_assists,
        score: 0,
        seconds_played: iso8601_whole_seconds(&stat.total_time_played),
        average_lifespan: stat
            .avg_life_time_of_player
            .as_deref()
            .and_then(parse_iso8601_seconds),
        duration_seconds: report.total_duration.as_deref().and_then(iso8601_whole_seconds),
        completed: !stat.dnf,
        extras: PlayerExtras::Halo5(Box::new(Halo5PlayerExtras {
            rank: stat.rank,
            dnf: stat.dnf,
            spartan_rank: stat.xp_info.spartan_rank,
            spartan_kills: stat.total_spartan_kills,
            headshots: stat.total_headshots,
            weapon_damage: stat.total_weapon_damage,
            shots_fired: stat.total_shots_fired,
            shots_landed: stat.total_shots_landed,
            melee_kills: stat.total_melee_kills,
            assassinations: stat.total_assassinations,
            ground_pound_kills: stat.total_ground_pound_kills,
            grenade_kills: stat.total_grenade_kills,
            power_weapon_kills: stat.total_power_weapon_kills,
            power_weapon_seconds: stat
                .total_power_weapon_possession_time
                .as_deref()
                .and_then(parse_iso8601_seconds),
            csr: player_csr(stat.current_csr.as_ref(), stat.measurement_matches_left),
            warzone_level: stat.warzone_level,
            total_pies: stat.warzone_level.and(stat.total_pies_earned),
        })),
    }
}

pub fn match_record(
    match_id: &str,
    kind: MatchKind,
    version: i32,
    report: &CarnageReport,
) -> MatchRecord {
    MatchRecord {
        game: Game::Halo5,
        instance_id: match_id.to_string(),
        kind,
        mode: None,
        occurred_at: None,
        version,
        duration_seconds: report.total_duration.as_deref().and_then(iso8601_whole_seconds),
        mercy: false,
        header: MatchHeader::Halo5(Halo5Header {
            map_variant_id: report.map_variant_id.clone(),
            game_variant_id: report.game_variant_id.clone(),
            playlist_id: report.playlist_id.clone(),
            map_id: report.map_id.clone(),
            game_base_variant_id: report.game_base_variant_id.clone(),
            season_id: report.season_id.clone(),
            is_team_game: report.is_team_game,
        }),
    }
}

/// Fold an arena service record into the profile and return the playlist rows
/// it carries for its season.
pub fn apply_arena_record(
    profile: &mut Halo5Profile,
    record: &ArenaServiceRecord,
    version: i32,
) -> SeasonPlaylists {
    let arena = &record.arena_stats;
    profile.version = version;
    profile.xp = Some(record.xp);
    profile.spartan_rank = record.spartan_rank;
    profile.season_id = arena.arena_playlist_stats_season_id.clone();
    profile.arena = totals(&arena.totals);
    if let Some(highest) = &arena.highest_csr_attained {
        profile.highest_csr = Some(HighestCsr {
            csr: csr(highest),
            playlist_id: arena.highest_csr_playlist_id.clone(),
            season_id: arena.highest_csr_season_id.clone(),
        });
    }

    SeasonPlaylists {
        season_id: arena.arena_playlist_stats_season_id.clone(),
        stats: arena
            .arena_playlist_stats
            .iter()
            .map(|playlist| PlaylistStats {
                playlist_id: playlist.playlist_id.clone(),
                season_id: arena.arena_playlist_stats_season_id.clone(),
                measurement_matches_left: playlist.measurement_matches_left,
                highest_csr: playlist.highest_csr.as_ref().map(csr),
                current_csr: playlist.csr.as_ref().map(csr),
                csr_percentile: playlist.csr_percentile,
                totals: totals(&playlist.totals),
            })
            .collect(),
    }
}

pub fn warzone(stat: &WarzoneStat) -> WarzoneTotals {
    WarzoneTotals {
        totals: totals(&stat.totals),
        pies_earned: stat.total_pies_earned,
    }
}

/// Whether a season's arena history should be (re)downloaded for an account.
pub fn season_needs_pull(
    season: &Season,
    stats_updated_at: Option<DateTime<Utc>>,
    force: bool,
    now: DateTime<Utc>,
) -> bool {
    if force {
        return true;
    }
    let settled = matches!(
        (stats_updated_at, season.end_date),
        (Some(updated), Some(end)) if updated >= end
    );
    !settled && !season.is_future(now)
}

pub fn season(meta: &SeasonMetadata) -> Season {
    Season {
        content_id: meta.content_id.clone(),
        name: meta.name.clone(),
        start_date: meta.start_date,
        end_date: meta.end_date,
        is_active: meta.is_active,
    }
}

pub fn playlist(meta: &PlaylistMetadata) -> Playlist {
    Playlist {
        content_id: meta.content_id.clone(),
        name: meta.name.clone(),
        game_mode: meta.game_mode.clone(),
        is_ranked: meta.is_ranked,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: i32,
    pub gamertag: String,
    pub csr: Csr,
}

pub fn leaderboard_entry(row: &LeaderboardRow) -> LeaderboardEntry {
    LeaderboardEntry {
        rank: row.rank,
        gamertag: row.player.gamertag.clone(),
        csr: csr(&row.score),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub match_id: String,
    pub game_mode: i32,
    pub playlist_id: Option<String>,
    pub map_id: Option<String>,
    pub season_id: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub rank: Option<i32>,
    pub result: Option<i32>,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
}

/// History rows are requested for a single player, so `Players[0]` is them.
pub fn match_summary(entry: &HistoryEntry) -> MatchSummary {
    let me = entry.players.first();
    MatchSummary {
        match_id: entry.id.match_id.clone(),
        game_mode: entry.id.game_mode,
        playlist_id: entry.hopper_id.clone(),
        map_id: entry.map_id.clone(),
        season_id: entry.season_id.clone(),
        completed_at: entry.match_completed_date.as_ref().map(|d| d.iso8601_date),
        duration_seconds: entry.match_duration.as_deref().and_then(iso8601_whole_seconds),
        rank: me.and_then(|p| p.rank),
        result: me.and_then(|p| p.result),
        kills: me.map_or(0, |p| p.total_kills),
        deaths: me.map_or(0, |p| p.total_deaths),
        assists: me.map_or(0, |p| p.total_assists),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rating(tier: i32) -> CsrPayload {
        CsrPayload {
            tier,
            designation_id: 4,
            csr: 0,
            percent_to_next_tier: 60,
            rank: None,
        }
    }

    #[test]
    fn placement_matches_override_tier_and_designation() {
        let placed = player_csr(Some(&rating(3)), Some(0)).expect("rated");
        assert_eq!((placed.tier, placed.designation_id), (3, 4));

        let placing = player_csr(Some(&rating(3)), Some(7)).expect("placing");
        assert_eq!((placing.tier, placing.designation_id), (3, 0));

        let fresh = player_csr(None, Some(9)).expect("placement only");
        assert_eq!(fresh.tier, 1);
        assert!(player_csr(None, None).is_none());
    }

    #[test]
    fn team_label_falls_back_to_player_slot_in_free_for_all() {
        assert_eq!(team_label("m", true, 1, 5), "m_1");
        assert_eq!(team_label("m", false, 1, 5), "m_5");
    }

    fn season_ending(end: Option<DateTime<Utc>>, start: Option<DateTime<Utc>>) -> Season {
        Season {
            content_id: "s".into(),
            name: "Season".into(),
            start_date: start,
            end_date: end,
            is_active: false,
        }
    }

    #[test]
    fn past_season_is_pulled_until_stats_postdate_its_end() {
        let now = Utc::now();
        let ended = season_ending(Some(now - Duration::days(30)), Some(now - Duration::days(90)));
        assert!(season_needs_pull(&ended, None, false, now));
        assert!(season_needs_pull(&ended, Some(now - Duration::days(40)), false, now));
        assert!(!season_needs_pull(&ended, Some(now - Duration::days(1)), false, now));
        assert!(season_needs_pull(&ended, Some(now - Duration::days(1)), true, now));

        let upcoming = season_ending(None, Some(now + Duration::days(3)));
        assert!(!season_needs_pull(&upcoming, None, false, now));

        let current = season_ending(None, Some(now - Duration::days(3)));
        assert!(season_needs_pull(&current, Some(now), false, now));
    }
}
