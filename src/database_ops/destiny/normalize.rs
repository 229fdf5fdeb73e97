//! Pure mapping from Bungie payloads to local drafts. Account resolution and
//! persistence stay in the client; everything here is deterministic.

use serde::Serialize;
use tracing::warn;

use super::payload::{
    CarnageEntry, CarnageReport, CarnageTeam, CharacterSummary, VendorData,
};
use crate::database_ops::drift::Observation;
use crate::models::{
    CharacterStats, DestinyCharacter, DestinyHeader, DestinyPlayerExtras, Equipment, Game,
    LevelProgress, MatchHeader, MatchKind, MatchPlayer, MatchRecord, PlayerExtras, PvpResult,
    StoredDestinyProfile,
};
use crate::normalization::statistical_mode;

pub const MAX_CHARACTERS: usize = 4;
const REQUIRED_EQUIPMENT_SLOTS: usize = 10;
const EXOTIC_CATEGORY: &str = "Exotic Gear";

pub fn pvp_result(mode: i32, teams: &[CarnageTeam]) -> PvpResult {
    let mut result = PvpResult {
        gametype: mode,
        ..PvpResult::default()
    };
    for team in teams {
        let points = team.score.as_i64();
        match team.standing.as_i64() {
            0 => {
                result.winner_team = Some(team.team_id);
                result.winner_points = Some(points);
            }
            1 => {
                result.loser_team = Some(team.team_id);
                result.loser_points = Some(points);
            }
            other => warn!(team_id = team.team_id, standing = other, "unknown team standing"),
        }
    }
    result
}

/// Any player reporting the mercy medal marks the whole game as mercy-ruled.
pub fn has_mercy(entries: &[CarnageEntry]) -> bool {
    entries.iter().any(|entry| {
        entry
            .extended
            .as_ref()
            .and_then(|ext| ext.values.medals_activity_complete_victory_mercy)
            .is_some()
    })
}

pub fn player_row(entry: &CarnageEntry, account_id: i64) -> MatchPlayer {
    let values = &entry.values;
    let extended = entry.extended.as_ref().map(|ext| &ext.values);
    let user = &entry.player.destiny_user_info;

    MatchPlayer {
        account_id,
        team: values.team().map(|team| team.to_string()),
        kills: values.kills.as_i64(),
        deaths: values.deaths.as_i64(),
        assists: values.assists.as_i64(),
        score: values.score(),
        seconds_played: values.seconds_played(),
        average_lifespan: extended
            .and_then(|v| v.average_lifespan)
            .map(|stat| stat.basic.value),
        duration_seconds: values.duration(),
        completed: values.completed.as_i64() == 1,
        extras: PlayerExtras::Destiny(DestinyPlayerExtras {
            membership_id: user.membership_id.clone(),
            character_id: entry.character_id.clone(),
            level: entry.player.character_level,
            class: entry.player.character_class.clone(),
            emblem: user.icon_path.clone(),
            standing: values.standing().or(entry.standing),
            revives_given: extended
                .and_then(|v| v.resurrections_performed)
                .map(|stat| stat.as_i64()),
            revives_taken: extended
                .and_then(|v| v.resurrections_received)
                .map(|stat| stat.as_i64()),
        }),
    }
}

/// Drop players who never took part.
pub fn retain_participants(players: Vec<MatchPlayer>) -> Vec<MatchPlayer> {
    players
        .into_iter()
        .filter(|player| !player.is_degenerate())
        .collect()
}

pub fn match_record(
    report: &CarnageReport,
    kind: MatchKind,
    version: i32,
    players: &[MatchPlayer],
    header: DestinyHeader,
) -> MatchRecord {
    MatchRecord {
        game: Game::Destiny,
        instance_id: report.activity_details.instance_id.clone(),
        kind,
        mode: report.activity_details.mode,
        occurred_at: report.period,
        version,
        duration_seconds: statistical_mode(players.iter().map(|p| p.duration_seconds)),
        mercy: has_mercy(&report.entries),
        header: MatchHeader::Destiny(header),
    }
}

/// Build one character slot. `stored` is the same character as last written,
/// used for the light watermark.
pub fn build_character(
    slot: i16,
    summary: &CharacterSummary,
    stored: Option<&DestinyCharacter>,
) -> Result<DestinyCharacter, String> {
    let base = &summary.character_base;
    let hashes: Vec<i64> = base.peer_view.equipment.iter().map(|e| e.item_hash).collect();
    let equipment = equipment(&hashes).ok_or_else(|| {
        format!(
            "character {} reports {} equipment slots, expected at least {}",
            base.character_id,
            base.peer_view.equipment.len(),
            REQUIRED_EQUIPMENT_SLOTS
        )
    })?;
    let raw_light = base.stats.light.as_ref().map_or(0, |stat| stat.value);
    let light = i32::try_from(raw_light).unwrap_or_else(|_| {
        warn!(character_id = %base.character_id, light = raw_light, "light out of range; clamping");
        if raw_light < 0 {
            0
        } else {
            i32::MAX
        }
    });
    let highest_light = stored.map_or(light, |prev| prev.highest_light.max(light));

    Ok(DestinyCharacter {
        character_id: base.character_id.clone(),
        membership_id: base.membership_id.clone(),
        slot,
        level: summary.character_level,
        light,
        highest_light,
        minutes_played: base.minutes_played_total,
        minutes_played_last_session: base.minutes_played_this_session,
        last_played: base.date_last_played,
        class_hash: base.class_hash,
        race_hash: base.race_hash,
        gender_hash: base.gender_hash,
        emblem_hash: summary.emblem_hash,
        stats: CharacterStats {
            defense: base.stats.defense.value,
            intellect: base.stats.intellect.value,
            discipline: base.stats.discipline.value,
            strength: base.stats.strength.value,
        },
        progress: LevelProgress {
            level: summary.level_progression.level,
            next_level_at: summary.level_progression.next_level_at,
            progress_to_next_level: summary.level_progression.progress_to_next_level,
        },
        equipment,
    })
}

fn equipment(hashes: &[i64]) -> Option<Equipment> {
    if hashes.len() < REQUIRED_EQUIPMENT_SLOTS {
        return None;
    }
    let slot = |i: usize| hashes.get(i).copied();
    Some(Equipment {
        subclass: hashes[0],
        helmet: hashes[1],
        arms: hashes[2],
        chest: hashes[3],
        boots: hashes[4],
        class_item: hashes[5],
        primary: hashes[6],
        secondary: hashes[7],
        heavy: hashes[8],
        ship: hashes[9],
        sparrow: slot(10),
        ghost: slot(11),
        background: slot(12),
        shader: slot(13),
        emote: slot(14),
        artifact: slot(15),
    })
}

/// Played minutes are the tracked stat. Only characters present both locally
/// and upstream are compared; a brand-new character is not activity by itself.
pub fn observe_characters(
    stored: Option<&StoredDestinyProfile>,
    current: &[DestinyCharacter],
) -> Observation {
    let Some(stored) = stored else {
        return Observation::FirstSeen;
    };
    let changed = current.iter().any(|character| {
        stored
            .characters
            .iter()
            .find(|prev| prev.character_id == character.character_id)
            .is_some_and(|prev| prev.minutes_played != character.minutes_played)
    });
    if changed {
        Observation::Changed
    } else {
        Observation::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleStat {
    pub stat_hash: i64,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaleItem {
    pub item_hash: i64,
    pub stats: Vec<SaleStat>,
}

/// Exotic armor on sale, with the stat rolls that are actually set.
pub fn exotic_sale_items(data: &VendorData) -> Vec<SaleItem> {
    data.sale_item_categories
        .iter()
        .filter(|category| category.category_title == EXOTIC_CATEGORY)
        .flat_map(|category| category.sale_items.iter())
        .filter(|entry| !entry.item.stats.is_empty())
        .map(|entry| SaleItem {
            item_hash: entry.item.item_hash,
            stats: entry
                .item
                .stats
                .iter()
                .filter(|stat| stat.value != 0)
                .map(|stat| SaleStat {
                    stat_hash: stat.stat_hash,
                    value: stat.value,
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DestinyProfile;
    use serde_json::json;

    fn team(id: i64, standing: f64, score: f64) -> CarnageTeam {
        serde_json::from_value(json!({
            "teamId": id,
            "standing": {"basic": {"value": standing}},
            "score": {"basic": {"value": score}}
        }))
        .expect("team")
    }

    fn entry(kills: f64, deaths: f64, score: f64, duration: f64) -> CarnageEntry {
        serde_json::from_value(json!({
            "player": {
                "destinyUserInfo": {
                    "membershipType": 1,
                    "membershipId": "4611686018",
                    "displayName": "Panda Love",
                    "iconPath": "/img/emblem.jpg"
                },
                "characterClass": "Hunter",
                "characterLevel": 40
            },
            "characterId": "2305843009",
            "values": {
                "assists": {"basic": {"value": 2.0}},
                "deaths": {"basic": {"value": deaths}},
                "kills": {"basic": {"value": kills}},
                "completed": {"basic": {"value": 1.0}},
                "score": {"basic": {"value": score}},
                "team": {"basic": {"value": 16.0}},
                "activityDurationSeconds": {"basic": {"value": duration}}
            },
            "extended": {"values": {
                "resurrectionsPerformed": {"basic": {"value": 3.0}}
            }}
        }))
        .expect("entry")
    }

    #[test]
    fn no_team_at_standing_zero_leaves_winner_unset() {
        let result = pvp_result(10, &[team(16, 1.0, 40.0), team(17, 3.0, 12.0)]);
        assert_eq!(result.winner_team, None);
        assert_eq!(result.winner_points, None);
        assert_eq!(result.loser_team, Some(16));
        assert_eq!(result.loser_points, Some(40));
    }

    #[test]
    fn standings_pick_winner_and_loser() {
        let result = pvp_result(10, &[team(17, 1.0, 2.0), team(16, 0.0, 5.0)]);
        assert_eq!(result.winner_team, Some(16));
        assert_eq!(result.winner_points, Some(5));
        assert_eq!(result.loser_team, Some(17));
    }

    #[test]
    fn zero_stat_players_are_dropped_after_mapping() {
        let players = vec![
            player_row(&entry(0.0, 0.0, 0.0, 600.0), 1),
            player_row(&entry(3.0, 1.0, 0.0, 600.0), 2),
        ];
        let kept = retain_participants(players);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].account_id, 2);
        assert_eq!(kept[0].team.as_deref(), Some("16"));
        match &kept[0].extras {
            PlayerExtras::Destiny(extras) => {
                assert_eq!(extras.revives_given, Some(3));
                assert_eq!(extras.revives_taken, None);
                assert_eq!(extras.class.as_deref(), Some("Hunter"));
            }
            other => panic!("unexpected extras {other:?}"),
        }
    }

    fn entry_with_mercy(medal: Option<f64>) -> CarnageEntry {
        let mut extended = json!({});
        if let Some(value) = medal {
            extended["medalsActivityCompleteVictoryMercy"] = json!({"basic": {"value": value}});
        }
        serde_json::from_value(json!({
            "player": {
                "destinyUserInfo": {
                    "membershipType": 2,
                    "membershipId": "4611686019",
                    "displayName": "Sweaty Bob"
                },
                "characterLevel": 40
            },
            "characterId": "2305843010",
            "values": {
                "assists": {"basic": {"value": 0.0}},
                "kills": {"basic": {"value": 4.0}},
                "deaths": {"basic": {"value": 1.0}},
                "completed": {"basic": {"value": 1.0}}
            },
            "extended": {"values": extended}
        }))
        .expect("entry")
    }

    #[test]
    fn mercy_medal_counts_when_present_even_at_zero() {
        assert!(!has_mercy(&[entry_with_mercy(None)]));
        assert!(has_mercy(&[entry_with_mercy(None), entry_with_mercy(Some(0.0))]));
        assert!(has_mercy(&[entry_with_mercy(Some(1.0))]));
    }

    fn summary(id: &str, minutes: i64, light: Option<i64>, slots: usize) -> CharacterSummary {
        let mut stats = json!({
            "STAT_DEFENSE": {"value": 10},
            "STAT_INTELLECT": {"value": 20},
            "STAT_DISCIPLINE": {"value": 30},
            "STAT_STRENGTH": {"value": 40}
        });
        if let Some(light) = light {
            stats["STAT_LIGHT"] = json!({"value": light});
        }
        let equipment: Vec<_> = (0..slots).map(|i| json!({"itemHash": 1000 + i})).collect();
        serde_json::from_value(json!({
            "characterBase": {
                "membershipId": "4611686018",
                "characterId": id,
                "minutesPlayedThisSession": "5",
                "minutesPlayedTotal": minutes.to_string(),
                "raceHash": 1,
                "genderHash": 2,
                "classHash": 3,
                "stats": stats,
                "peerView": {"equipment": equipment}
            },
            "levelProgression": {"level": 40, "nextLevelAt": 0, "progressToNextLevel": 0},
            "characterLevel": 40,
            "emblemHash": 99
        }))
        .expect("summary")
    }

    #[test]
    fn equipment_requires_ten_slots_and_maps_extras_positionally() {
        assert!(build_character(0, &summary("a", 1, None, 9), None).is_err());
        let full = build_character(0, &summary("a", 1, None, 13), None).expect("character");
        assert_eq!(full.equipment.subclass, 1000);
        assert_eq!(full.equipment.ship, 1009);
        assert_eq!(full.equipment.background, Some(1012));
        assert_eq!(full.equipment.shader, None);
        assert_eq!(full.light, 0);
    }

    #[test]
    fn oversized_light_is_clamped() {
        let huge = build_character(0, &summary("a", 1, Some(i64::from(i32::MAX) + 5), 10), None)
            .expect("character");
        assert_eq!(huge.light, i32::MAX);
    }

    #[test]
    fn highest_light_never_decreases() {
        let first = build_character(0, &summary("a", 1, Some(310), 10), None).expect("first");
        assert_eq!(first.highest_light, 310);
        let lower = build_character(0, &summary("a", 2, Some(290), 10), Some(&first))
            .expect("second");
        assert_eq!(lower.light, 290);
        assert_eq!(lower.highest_light, 310);
    }

    #[test]
    fn observation_compares_minutes_of_known_characters() {
        let a = build_character(0, &summary("a", 100, None, 10), None).expect("a");
        let stored = StoredDestinyProfile {
            profile: DestinyProfile::default(),
            characters: vec![a.clone()],
        };
        assert_eq!(observe_characters(None, &[a.clone()]), Observation::FirstSeen);
        assert_eq!(observe_characters(Some(&stored), &[a]), Observation::Unchanged);
        let played = build_character(0, &summary("a", 150, None, 10), None).expect("played");
        assert_eq!(observe_characters(Some(&stored), &[played]), Observation::Changed);
        let fresh = build_character(1, &summary("b", 7, None, 10), None).expect("fresh");
        assert_eq!(observe_characters(Some(&stored), &[fresh]), Observation::Unchanged);
    }

    #[test]
    fn sale_catalog_keeps_exotics_with_rolled_stats() {
        let data: VendorData = serde_json::from_value(json!({
            "saleItemCategories": [
                {"categoryTitle": "Exotic Gear", "saleItems": [
                    {"item": {"itemHash": 1, "stats": [
                        {"statHash": 10, "value": 0},
                        {"statHash": 11, "value": 42}
                    ]}},
                    {"item": {"itemHash": 2, "stats": []}}
                ]},
                {"categoryTitle": "Curios", "saleItems": [
                    {"item": {"itemHash": 3, "stats": [{"statHash": 10, "value": 5}]}}
                ]}
            ]
        }))
        .expect("vendor");
        let items = exotic_sale_items(&data);
        assert_eq!(
            items,
            vec![SaleItem {
                item_hash: 1,
                stats: vec![SaleStat {
                    stat_hash: 11,
                    value: 42
                }]
            }]
        );
    }
}
