//! Typed views of the Bungie Platform responses this crate reads. Only the
//! fields used by normalization are declared; unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::{IngestError, IngestResult, Missing};

/// Bungie's `SystemDisabled` code, returned during maintenance.
pub const SYSTEM_DISABLED: i32 = 5;

/// Integer that may arrive as a JSON number or a numeric string.
pub fn lenient_i64<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }
    match Raw::deserialize(de)? {
        Raw::Int(v) => Ok(v),
        Raw::Float(f) => Ok(f as i64),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }
    Ok(match Raw::deserialize(de)? {
        Raw::Text(s) => s,
        Raw::Int(v) => v.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BungieEnvelope<T> {
    #[serde(default = "Option::default")]
    pub response: Option<T>,
    pub error_code: i32,
    #[serde(default)]
    pub error_status: Option<String>,
}

impl<T> BungieEnvelope<T> {
    /// Unwrap the payload; a maintenance code is an outage, a missing body is
    /// the entity not existing.
    pub fn into_response(self, url: &str, missing: Missing) -> IngestResult<T> {
        if self.error_code == SYSTEM_DISABLED {
            return Err(IngestError::upstream(
                url,
                self.error_status.unwrap_or_else(|| "SystemDisabled".into()),
            ));
        }
        self.response.ok_or(IngestError::NotFound(missing))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BasicValue {
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StatValue {
    pub basic: BasicValue,
}

impl StatValue {
    pub fn as_i64(&self) -> i64 {
        self.basic.value.round() as i64
    }
}

fn stat_i64(stat: &Option<StatValue>) -> Option<i64> {
    stat.as_ref().map(StatValue::as_i64)
}

#[derive(Debug, Deserialize)]
pub struct DataWrapper<T> {
    pub data: Option<T>,
}

// Post-game carnage report

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarnageReport {
    pub period: Option<DateTime<Utc>>,
    pub activity_details: ActivityDetails,
    #[serde(default)]
    pub entries: Vec<CarnageEntry>,
    #[serde(default)]
    pub teams: Vec<CarnageTeam>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDetails {
    #[serde(deserialize_with = "lenient_i64")]
    pub reference_id: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub instance_id: String,
    #[serde(default)]
    pub mode: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarnageEntry {
    #[serde(default)]
    pub standing: Option<i32>,
    pub player: CarnagePlayer,
    #[serde(deserialize_with = "lenient_string")]
    pub character_id: String,
    pub values: EntryValues,
    #[serde(default)]
    pub extended: Option<ExtendedEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarnagePlayer {
    pub destiny_user_info: UserInfo,
    #[serde(default)]
    pub character_class: Option<String>,
    #[serde(default)]
    pub character_level: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub icon_path: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub membership_type: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub membership_id: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryValues {
    pub assists: StatValue,
    pub deaths: StatValue,
    pub kills: StatValue,
    pub completed: StatValue,
    #[serde(default)]
    pub seconds_played: Option<StatValue>,
    #[serde(default)]
    pub score: Option<StatValue>,
    #[serde(default)]
    pub standing: Option<StatValue>,
    #[serde(default)]
    pub team: Option<StatValue>,
    #[serde(default)]
    pub activity_duration_seconds: Option<StatValue>,
}

impl EntryValues {
    pub fn seconds_played(&self) -> Option<i64> {
        stat_i64(&self.seconds_played)
    }
    pub fn score(&self) -> i64 {
        stat_i64(&self.score).unwrap_or(0)
    }
    pub fn standing(&self) -> Option<i32> {
        stat_i64(&self.standing).map(|v| v as i32)
    }
    pub fn team(&self) -> Option<i64> {
        stat_i64(&self.team)
    }
    pub fn duration(&self) -> Option<i64> {
        stat_i64(&self.activity_duration_seconds)
    }
}

#[derive(Debug, Deserialize)]
pub struct ExtendedEntry {
    #[serde(default)]
    pub values: ExtendedValues,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedValues {
    #[serde(default)]
    pub average_lifespan: Option<StatValue>,
    #[serde(default)]
    pub resurrections_performed: Option<StatValue>,
    #[serde(default)]
    pub resurrections_received: Option<StatValue>,
    #[serde(default)]
    pub medals_activity_complete_victory_mercy: Option<StatValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarnageTeam {
    #[serde(deserialize_with = "lenient_i64")]
    pub team_id: i64,
    pub standing: StatValue,
    pub score: StatValue,
}

// Player search

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(deserialize_with = "lenient_i64")]
    pub membership_type: i64,
    #[serde(deserialize_with = "lenient_string")]
    pub membership_id: String,
    pub display_name: String,
}

// Account summary

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(default)]
    pub clan_name: Option<String>,
    #[serde(default)]
    pub clan_tag: Option<String>,
    #[serde(default)]
    pub inventory: Option<SummaryInventory>,
    #[serde(default)]
    pub grimoire_score: i64,
    #[serde(default)]
    pub characters: Vec<CharacterSummary>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryInventory {
    #[serde(default)]
    pub currencies: Vec<Currency>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    #[serde(deserialize_with = "lenient_i64")]
    pub item_hash: i64,
    pub value: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSummary {
    pub character_base: CharacterBase,
    pub level_progression: LevelProgression,
    #[serde(default)]
    pub character_level: i32,
    #[serde(deserialize_with = "lenient_i64")]
    pub emblem_hash: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterBase {
    #[serde(deserialize_with = "lenient_string")]
    pub membership_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub character_id: String,
    #[serde(default)]
    pub date_last_played: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient_i64")]
    pub minutes_played_this_session: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub minutes_played_total: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub race_hash: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub gender_hash: i64,
    #[serde(deserialize_with = "lenient_i64")]
    pub class_hash: i64,
    pub stats: CharacterStatsPayload,
    pub peer_view: PeerView,
}

#[derive(Debug, Deserialize)]
pub struct StatEntry {
    pub value: i64,
}

#[derive(Debug, Deserialize)]
pub struct CharacterStatsPayload {
    #[serde(rename = "STAT_DEFENSE")]
    pub defense: StatEntry,
    #[serde(rename = "STAT_INTELLECT")]
    pub intellect: StatEntry,
    #[serde(rename = "STAT_DISCIPLINE")]
    pub discipline: StatEntry,
    #[serde(rename = "STAT_STRENGTH")]
    pub strength: StatEntry,
    #[serde(rename = "STAT_LIGHT", default)]
    pub light: Option<StatEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PeerView {
    #[serde(default)]
    pub equipment: Vec<EquippedItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquippedItem {
    #[serde(deserialize_with = "lenient_i64")]
    pub item_hash: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgression {
    pub level: i32,
    #[serde(default)]
    pub next_level_at: i64,
    #[serde(default)]
    pub progress_to_next_level: i64,
}

// Vendor sale catalog

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorData {
    #[serde(default)]
    pub sale_item_categories: Vec<SaleCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleCategory {
    pub category_title: String,
    #[serde(default)]
    pub sale_items: Vec<SaleEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SaleEntry {
    pub item: SaleItemPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItemPayload {
    #[serde(deserialize_with = "lenient_i64")]
    pub item_hash: i64,
    #[serde(default)]
    pub stats: Vec<SaleStatPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleStatPayload {
    #[serde(deserialize_with = "lenient_i64")]
    pub stat_hash: i64,
    pub value: i64,
}
