//! Typed Halo 5 API responses (stats, service records and metadata).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerRef {
    pub gamertag: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CsrPayload {
    pub tier: i32,
    pub designation_id: i32,
    pub csr: i32,
    pub percent_to_next_tier: i32,
    #[serde(default)]
    pub rank: Option<i32>,
}

// Post-game carnage report

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CarnageReport {
    #[serde(default)]
    pub map_variant_id: Option<String>,
    #[serde(default)]
    pub game_variant_id: Option<String>,
    #[serde(default)]
    pub playlist_id: Option<String>,
    #[serde(default)]
    pub map_id: Option<String>,
    #[serde(default)]
    pub game_base_variant_id: Option<String>,
    #[serde(default)]
    pub season_id: Option<String>,
    #[serde(default)]
    pub is_team_game: bool,
    #[serde(default)]
    pub total_duration: Option<String>,
    #[serde(default)]
    pub team_stats: Vec<TeamStat>,
    #[serde(default)]
    pub player_stats: Vec<PlayerStat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TeamStat {
    pub team_id: i32,
    pub score: i64,
    pub rank: i32,
    #[serde(default)]
    pub round_stats: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XpInfo {
    pub spartan_rank: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerStat {
    pub player: PlayerRef,
    #[serde(default)]
    pub team_id: i32,
    #[serde(default)]
    pub rank: i32,
    #[serde(rename = "DNF", default)]
    pub dnf: bool,
    #[serde(default)]
    pub avg_life_time_of_player: Option<String>,
    pub xp_info: XpInfo,
    #[serde(default)]
    pub current_csr: Option<CsrPayload>,
    #[serde(default)]
    pub measurement_matches_left: Option<i32>,
    #[serde(default)]
    pub warzone_level: Option<i32>,
    #[serde(default)]
    pub total_pies_earned: Option<i64>,
    pub total_kills: i64,
    pub total_spartan_kills: i64,
    pub total_headshots: i64,
    pub total_deaths: i64,
    pub total_assists: i64,
    pub total_time_played: String,
    pub total_weapon_damage: f64,
    pub total_shots_fired: i64,
    pub total_shots_landed: i64,
    pub total_melee_kills: i64,
    pub total_assassinations: i64,
    pub total_ground_pound_kills: i64,
    pub total_grenade_kills: i64,
    pub total_power_weapon_kills: i64,
    #[serde(default)]
    pub total_power_weapon_possession_time: Option<String>,
}

// Service records

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRecordResponse<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<ServiceRecordResult<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRecordResult<T> {
    pub id: String,
    pub result_code: i32,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
}

impl<T> ServiceRecordResult<T> {
    /// The record when upstream reports success for this player.
    pub fn into_record(self) -> Option<T> {
        if self.result_code == 0 {
            self.result
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Totals {
    pub total_kills: i64,
    pub total_spartan_kills: i64,
    pub total_headshots: i64,
    pub total_deaths: i64,
    pub total_assists: i64,
    pub total_games_completed: i64,
    pub total_games_won: i64,
    pub total_games_lost: i64,
    pub total_games_tied: i64,
    pub total_time_played: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArenaServiceRecord {
    pub xp: i64,
    pub spartan_rank: i32,
    pub arena_stats: ArenaStats,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArenaStats {
    #[serde(flatten)]
    pub totals: Totals,
    #[serde(default)]
    pub arena_playlist_stats_season_id: Option<String>,
    #[serde(default)]
    pub highest_csr_attained: Option<CsrPayload>,
    #[serde(default)]
    pub highest_csr_playlist_id: Option<String>,
    #[serde(default)]
    pub highest_csr_season_id: Option<String>,
    #[serde(default)]
    pub arena_playlist_stats: Vec<PlaylistStat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaylistStat {
    pub playlist_id: String,
    #[serde(default)]
    pub measurement_matches_left: i32,
    #[serde(default)]
    pub highest_csr: Option<CsrPayload>,
    #[serde(default)]
    pub csr: Option<CsrPayload>,
    #[serde(default)]
    pub csr_percentile: Option<i32>,
    #[serde(flatten)]
    pub totals: Totals,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WarzoneServiceRecord {
    pub warzone_stat: WarzoneStat,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WarzoneStat {
    #[serde(flatten)]
    pub totals: Totals,
    #[serde(default)]
    pub total_pies_earned: i64,
}

// Leaderboard and match history

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaderboardResponse {
    #[serde(default)]
    pub result_count: i64,
    #[serde(default)]
    pub results: Vec<LeaderboardRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaderboardRow {
    pub player: PlayerRef,
    pub rank: i32,
    pub score: CsrPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchHistoryResponse {
    #[serde(default)]
    pub result_count: i64,
    #[serde(default)]
    pub results: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryEntry {
    pub id: HistoryId,
    #[serde(default)]
    pub hopper_id: Option<String>,
    #[serde(default)]
    pub map_id: Option<String>,
    #[serde(default)]
    pub season_id: Option<String>,
    #[serde(default)]
    pub match_duration: Option<String>,
    #[serde(default)]
    pub match_completed_date: Option<CompletedDate>,
    #[serde(default)]
    pub players: Vec<HistoryPlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryId {
    pub match_id: String,
    pub game_mode: i32,
}

#[derive(Debug, Deserialize)]
pub struct CompletedDate {
    #[serde(rename = "ISO8601Date")]
    pub iso8601_date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryPlayer {
    #[serde(default)]
    pub rank: Option<i32>,
    #[serde(default)]
    pub result: Option<i32>,
    #[serde(default)]
    pub total_kills: i64,
    #[serde(default)]
    pub total_deaths: i64,
    #[serde(default)]
    pub total_assists: i64,
}

// Metadata

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapVariantMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub map_id: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonMetadata {
    pub content_id: String,
    pub name: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistMetadata {
    pub content_id: String,
    pub name: String,
    #[serde(default)]
    pub game_mode: Option<String>,
    #[serde(default)]
    pub is_ranked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn totals() -> Value {
        json!({
            "TotalKills": 10, "TotalSpartanKills": 9, "TotalHeadshots": 4,
            "TotalDeaths": 6, "TotalAssists": 3, "TotalGamesCompleted": 2,
            "TotalGamesWon": 1, "TotalGamesLost": 1, "TotalGamesTied": 0,
            "TotalTimePlayed": "PT1H2M"
        })
    }

    #[test]
    fn failed_result_code_yields_no_record() {
        let body = json!({"Results": [
            {"Id": "Ghost", "ResultCode": 1, "Result": null}
        ]});
        let parsed: ServiceRecordResponse<ArenaServiceRecord> =
            serde_json::from_value(body).expect("response");
        let first = parsed.results.into_iter().next().expect("one result");
        assert_eq!(first.id, "Ghost");
        assert!(first.into_record().is_none());
    }

    #[test]
    fn flattened_totals_sit_beside_playlist_fields() {
        let mut stat = totals();
        stat["PlaylistId"] = json!("c98949ae");
        stat["MeasurementMatchesLeft"] = json!(3);
        stat["Csr"] = Value::Null;
        let parsed: PlaylistStat = serde_json::from_value(stat).expect("playlist stat");
        assert_eq!(parsed.playlist_id, "c98949ae");
        assert_eq!(parsed.measurement_matches_left, 3);
        assert!(parsed.csr.is_none());
        assert_eq!(parsed.totals.total_kills, 10);
        assert_eq!(parsed.totals.total_time_played, "PT1H2M");
    }
}
