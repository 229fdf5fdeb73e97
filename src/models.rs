//! Local entity model for both game integrations.
//!
//! Rows are addressed by natural keys (instance id, membership id, normalized tag)
//! before any surrogate id is known; drafts carry everything a single atomic write
//! needs, stored aggregates carry the surrogate ids assigned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Xbox,
    Playstation,
}

impl Platform {
    pub fn code(self) -> i16 {
        match self {
            Platform::Xbox => 1,
            Platform::Playstation => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Platform::Xbox),
            2 => Some(Platform::Playstation),
            _ => None,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "xbox" | "xbl" => Some(Platform::Xbox),
            "2" | "psn" | "playstation" => Some(Platform::Playstation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Game {
    Destiny,
    Halo5,
}

impl Game {
    pub fn code(self) -> i16 {
        match self {
            Game::Destiny => 1,
            Game::Halo5 => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Game::Destiny),
            2 => Some(Game::Halo5),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub gamertag: String,
    pub seo: String,
    pub platform: Platform,
    pub membership_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub gamertag: String,
    pub seo: String,
    pub platform: Platform,
    pub membership_id: Option<String>,
}

/// Classification of a stored match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Raid,
    Flawless,
    Pvp,
    TrialsOfOsiris,
    Arena,
    Warzone,
    Unclassified,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::Raid => "raid",
            MatchKind::Flawless => "flawless",
            MatchKind::Pvp => "pvp",
            MatchKind::TrialsOfOsiris => "trials_of_osiris",
            MatchKind::Arena => "arena",
            MatchKind::Warzone => "warzone",
            MatchKind::Unclassified => "unclassified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "raid" => Some(MatchKind::Raid),
            "flawless" => Some(MatchKind::Flawless),
            "pvp" => Some(MatchKind::Pvp),
            "too" | "trials" | "trials_of_osiris" => Some(MatchKind::TrialsOfOsiris),
            "arena" => Some(MatchKind::Arena),
            "warzone" => Some(MatchKind::Warzone),
            "" | "unclassified" => Some(MatchKind::Unclassified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinyHeader {
    pub reference_id: i64,
    pub raid_tuesday: Option<i32>,
    pub passage_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Halo5Header {
    pub map_variant_id: Option<String>,
    pub game_variant_id: Option<String>,
    pub playlist_id: Option<String>,
    pub map_id: Option<String>,
    pub game_base_variant_id: Option<String>,
    pub season_id: Option<String>,
    pub is_team_game: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum MatchHeader {
    Destiny(DestinyHeader),
    Halo5(Halo5Header),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub game: Game,
    pub instance_id: String,
    pub kind: MatchKind,
    pub mode: Option<i32>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub duration_seconds: Option<i64>,
    pub mercy: bool,
    pub header: MatchHeader,
}

/// Winner/loser summary of a competitive match. Fields stay `None` when no team
/// reported the corresponding standing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvpResult {
    pub gametype: i32,
    pub winner_team: Option<i64>,
    pub winner_points: Option<i64>,
    pub loser_team: Option<i64>,
    pub loser_points: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchTeam {
    pub team_id: i32,
    pub score: i64,
    pub rank: i32,
    pub round_stats: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Csr {
    pub tier: i32,
    pub designation_id: i32,
    pub csr: i32,
    pub percent_to_next_tier: i32,
    pub rank: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinyPlayerExtras {
    pub membership_id: String,
    pub character_id: String,
    pub level: i32,
    pub class: Option<String>,
    pub emblem: Option<String>,
    pub standing: Option<i32>,
    pub revives_given: Option<i64>,
    pub revives_taken: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Halo5PlayerExtras {
    pub rank: i32,
    pub dnf: bool,
    pub spartan_rank: i32,
    pub spartan_kills: i64,
    pub headshots: i64,
    pub weapon_damage: f64,
    pub shots_fired: i64,
    pub shots_landed: i64,
    pub melee_kills: i64,
    pub assassinations: i64,
    pub ground_pound_kills: i64,
    pub grenade_kills: i64,
    pub power_weapon_kills: i64,
    pub power_weapon_seconds: Option<f64>,
    pub csr: Option<Csr>,
    pub warzone_level: Option<i32>,
    pub total_pies: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum PlayerExtras {
    Destiny(DestinyPlayerExtras),
    Halo5(Box<Halo5PlayerExtras>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPlayer {
    pub account_id: i64,
    pub team: Option<String>,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub score: i64,
    pub seconds_played: Option<i64>,
    pub average_lifespan: Option<f64>,
    pub duration_seconds: Option<i64>,
    pub completed: bool,
    pub extras: PlayerExtras,
}

impl MatchPlayer {
    /// A player with no score, kills or deaths never took part (disconnect,
    /// spectator slot) and is not persisted.
    pub fn is_degenerate(&self) -> bool {
        self.score == 0 && self.kills == 0 && self.deaths == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDraft {
    pub record: MatchRecord,
    pub pvp: Option<PvpResult>,
    pub teams: Vec<MatchTeam>,
    pub players: Vec<MatchPlayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMatch {
    pub id: i64,
    pub record: MatchRecord,
    pub pvp: Option<PvpResult>,
    pub teams: Vec<MatchTeam>,
    pub players: Vec<MatchPlayer>,
    pub events: Vec<MatchEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    Death {
        killer: Option<i64>,
        killer_agent: Option<i32>,
        killer_weapon_id: Option<i64>,
        killer_attachments: Vec<i64>,
        killer_position: Option<WorldPoint>,
        victim: Option<i64>,
        victim_agent: Option<i32>,
        victim_stock_id: Option<i64>,
        victim_attachments: Vec<i64>,
        victim_position: Option<WorldPoint>,
        disposition: Option<i32>,
    },
    WeaponPickup {
        player: i64,
        weapon_id: i64,
        attachments: Vec<i64>,
    },
    WeaponDrop {
        player: i64,
        weapon_id: i64,
        attachments: Vec<i64>,
        seconds_held_as_primary: f64,
        shots_fired: i64,
        shots_landed: i64,
    },
    WeaponPickupPad {
        player: i64,
        weapon_id: i64,
        attachments: Vec<i64>,
    },
    RoundStart {
        round_index: i32,
    },
    RoundEnd {
        round_index: i32,
    },
    Medal {
        player: i64,
        medal_id: i64,
    },
    Impulse {
        player: i64,
        impulse_id: i64,
    },
    PlayerSpawn {
        player: i64,
    },
    Unknown,
}

impl EventDetail {
    pub fn kind(&self) -> &'static str {
        match self {
            EventDetail::Death { .. } => "death",
            EventDetail::WeaponPickup { .. } => "weapon_pickup",
            EventDetail::WeaponDrop { .. } => "weapon_drop",
            EventDetail::WeaponPickupPad { .. } => "weapon_pickup_pad",
            EventDetail::RoundStart { .. } => "round_start",
            EventDetail::RoundEnd { .. } => "round_end",
            EventDetail::Medal { .. } => "medal",
            EventDetail::Impulse { .. } => "impulse",
            EventDetail::PlayerSpawn { .. } => "player_spawn",
            EventDetail::Unknown => "unknown",
        }
    }

    /// The account the event is attributed to (the killer for deaths).
    pub fn actor(&self) -> Option<i64> {
        match self {
            EventDetail::Death { killer, .. } => *killer,
            EventDetail::WeaponPickup { player, .. }
            | EventDetail::WeaponDrop { player, .. }
            | EventDetail::WeaponPickupPad { player, .. }
            | EventDetail::Medal { player, .. }
            | EventDetail::Impulse { player, .. }
            | EventDetail::PlayerSpawn { player } => Some(*player),
            EventDetail::RoundStart { .. }
            | EventDetail::RoundEnd { .. }
            | EventDetail::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub seq: i32,
    pub seconds_since_start: f64,
    pub detail: EventDetail,
    pub assists: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterStats {
    pub defense: i64,
    pub intellect: i64,
    pub discipline: i64,
    pub strength: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: i32,
    pub next_level_at: i64,
    pub progress_to_next_level: i64,
}

/// Equipped item hashes by slot. The first ten slots are always reported; the
/// rest depend on the game version the character was last seen on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    pub subclass: i64,
    pub helmet: i64,
    pub arms: i64,
    pub chest: i64,
    pub boots: i64,
    pub class_item: i64,
    pub primary: i64,
    pub secondary: i64,
    pub heavy: i64,
    pub ship: i64,
    pub sparrow: Option<i64>,
    pub ghost: Option<i64>,
    pub background: Option<i64>,
    pub shader: Option<i64>,
    pub emote: Option<i64>,
    pub artifact: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinyCharacter {
    pub character_id: String,
    pub membership_id: String,
    pub slot: i16,
    pub level: i32,
    pub light: i32,
    pub highest_light: i32,
    pub minutes_played: i64,
    pub minutes_played_last_session: i64,
    pub last_played: Option<DateTime<Utc>>,
    pub class_hash: i64,
    pub race_hash: i64,
    pub gender_hash: i64,
    pub emblem_hash: i64,
    pub stats: CharacterStats,
    pub progress: LevelProgress,
    pub equipment: Equipment,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DestinyProfile {
    pub account_id: i64,
    pub clan_name: Option<String>,
    pub clan_tag: Option<String>,
    pub glimmer: Option<i64>,
    pub legendary_marks: Option<i64>,
    pub grimoire: i64,
    pub character_ids: Vec<String>,
    pub inactive_counter: i32,
}

/// Profile plus the complete set of active characters; characters not listed
/// are removed when the draft is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinyProfileDraft {
    pub profile: DestinyProfile,
    pub characters: Vec<DestinyCharacter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDestinyProfile {
    pub profile: DestinyProfile,
    pub characters: Vec<DestinyCharacter>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTotals {
    pub kills: i64,
    pub spartan_kills: i64,
    pub headshots: i64,
    pub deaths: i64,
    pub assists: i64,
    pub games_completed: i64,
    pub games_won: i64,
    pub games_lost: i64,
    pub games_tied: i64,
    pub time_played_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighestCsr {
    pub csr: Csr,
    pub playlist_id: Option<String>,
    pub season_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarzoneTotals {
    pub totals: ServiceTotals,
    pub pies_earned: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Halo5Profile {
    pub account_id: i64,
    pub version: i32,
    pub xp: Option<i64>,
    pub spartan_rank: i32,
    pub season_id: Option<String>,
    pub arena: ServiceTotals,
    pub highest_csr: Option<HighestCsr>,
    pub warzone: Option<WarzoneTotals>,
    pub inactive_counter: i32,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistStats {
    pub playlist_id: String,
    pub season_id: Option<String>,
    pub measurement_matches_left: i32,
    pub highest_csr: Option<Csr>,
    pub current_csr: Option<Csr>,
    pub csr_percentile: Option<i32>,
    pub totals: ServiceTotals,
}

/// Replacement set of playlist rows for one season (or the season-less rows).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonPlaylists {
    pub season_id: Option<String>,
    pub stats: Vec<PlaylistStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Halo5ProfileDraft {
    pub profile: Halo5Profile,
    pub playlists: Vec<SeasonPlaylists>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub content_id: String,
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl Season {
    pub fn is_future(&self, now: DateTime<Utc>) -> bool {
        self.start_date.is_some_and(|start| start > now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub content_id: String,
    pub name: String,
    pub game_mode: Option<String>,
    pub is_ranked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapVariant {
    pub content_id: String,
    pub name: String,
    pub map_id: Option<String>,
    pub description: Option<String>,
}
