//! Match event timeline: typed upstream events and the mapping into stored
//! [`MatchEvent`] rows once every referenced gamertag has an account.

use std::collections::HashMap;

use serde::Deserialize;

use super::payload::PlayerRef;
use crate::models::{EventDetail, MatchEvent, WorldPoint};
use crate::normalization::{parse_iso8601_seconds, GamertagKey};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameEventsPayload {
    #[serde(default)]
    pub game_events: Vec<GameEvent>,
    #[serde(default)]
    pub is_complete_set_of_events: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default)]
    pub time_since_start: Option<String>,
    #[serde(default)]
    pub assistants: Vec<PlayerRef>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "EventName")]
pub enum EventKind {
    #[serde(rename_all = "PascalCase")]
    Death {
        #[serde(default)]
        killer: Option<PlayerRef>,
        #[serde(default)]
        victim: Option<PlayerRef>,
        #[serde(default)]
        death_disposition: Option<i32>,
        #[serde(default)]
        killer_agent: Option<i32>,
        #[serde(default)]
        killer_weapon_attachment_ids: Vec<i64>,
        #[serde(default)]
        killer_weapon_stock_id: Option<i64>,
        #[serde(default)]
        killer_world_location: Option<WorldPoint>,
        #[serde(default)]
        victim_agent: Option<i32>,
        #[serde(default)]
        victim_attachment_ids: Vec<i64>,
        #[serde(default)]
        victim_stock_id: Option<i64>,
        #[serde(default)]
        victim_world_location: Option<WorldPoint>,
    },
    #[serde(rename_all = "PascalCase")]
    WeaponPickup {
        player: PlayerRef,
        weapon_stock_id: i64,
        #[serde(default)]
        weapon_attachment_ids: Vec<i64>,
    },
    #[serde(rename_all = "PascalCase")]
    WeaponDrop {
        player: PlayerRef,
        weapon_stock_id: i64,
        #[serde(default)]
        weapon_attachment_ids: Vec<i64>,
        #[serde(default)]
        time_weapon_active_as_primary: Option<String>,
        #[serde(default)]
        shots_fired: i64,
        #[serde(default)]
        shots_landed: i64,
    },
    #[serde(rename_all = "PascalCase")]
    WeaponPickupPad {
        player: PlayerRef,
        weapon_stock_id: i64,
        #[serde(default)]
        weapon_attachment_ids: Vec<i64>,
    },
    #[serde(rename_all = "PascalCase")]
    RoundStart { round_index: i32 },
    #[serde(rename_all = "PascalCase")]
    RoundEnd { round_index: i32 },
    #[serde(rename_all = "PascalCase")]
    Medal { player: PlayerRef, medal_id: i64 },
    #[serde(rename_all = "PascalCase")]
    Impulse { player: PlayerRef, impulse_id: i64 },
    #[serde(rename_all = "PascalCase")]
    PlayerSpawn { player: PlayerRef },
    #[serde(other)]
    Unknown,
}

impl GameEvent {
    /// Every gamertag the event references, actor first.
    pub fn gamertags(&self) -> Vec<&str> {
        let mut tags = Vec::new();
        match &self.kind {
            EventKind::Death { killer, victim, .. } => {
                tags.extend(killer.iter().chain(victim.iter()).map(|p| p.gamertag.as_str()));
            }
            EventKind::WeaponPickup { player, .. }
            | EventKind::WeaponDrop { player, .. }
            | EventKind::WeaponPickupPad { player, .. }
            | EventKind::Medal { player, .. }
            | EventKind::Impulse { player, .. }
            | EventKind::PlayerSpawn { player } => tags.push(player.gamertag.as_str()),
            EventKind::RoundStart { .. } | EventKind::RoundEnd { .. } | EventKind::Unknown => {}
        }
        tags.extend(self.assistants.iter().map(|p| p.gamertag.as_str()));
        tags
    }
}

impl GameEventsPayload {
    /// Distinct gamertags across the timeline, keyed by normalized tag.
    pub fn distinct_gamertags(&self) -> Vec<String> {
        let mut seen = HashMap::new();
        for tag in self.game_events.iter().flat_map(GameEvent::gamertags) {
            let key = GamertagKey::new(tag);
            if !key.is_empty() {
                seen.entry(key.seo().to_string())
                    .or_insert_with(|| tag.trim().to_string());
            }
        }
        let mut tags: Vec<String> = seen.into_values().collect();
        tags.sort();
        tags
    }
}

/// Account ids by normalized gamertag.
pub type AccountIndex = HashMap<String, i64>;

/// Map the timeline onto stored rows. Returns the first gamertag missing from
/// `accounts` as the error.
pub fn build_timeline(
    payload: &GameEventsPayload,
    accounts: &AccountIndex,
) -> Result<Vec<MatchEvent>, String> {
    let id = |player: &PlayerRef| -> Result<i64, String> {
        accounts
            .get(GamertagKey::new(&player.gamertag).seo())
            .copied()
            .ok_or_else(|| player.gamertag.clone())
    };
    let optional = |player: &Option<PlayerRef>| -> Result<Option<i64>, String> {
        player.as_ref().map(|p| id(p)).transpose()
    };

    payload
        .game_events
        .iter()
        .enumerate()
        .map(|(seq, event)| {
            let detail = match &event.kind {
                EventKind::Death {
                    killer,
                    victim,
                    death_disposition,
                    killer_agent,
                    killer_weapon_attachment_ids,
                    killer_weapon_stock_id,
                    killer_world_location,
                    victim_agent,
                    victim_attachment_ids,
                    victim_stock_id,
                    victim_world_location,
                } => EventDetail::Death {
                    killer: optional(killer)?,
                    killer_agent: *killer_agent,
                    killer_weapon_id: *killer_weapon_stock_id,
                    killer_attachments: killer_weapon_attachment_ids.clone(),
                    killer_position: *killer_world_location,
                    victim: optional(victim)?,
                    victim_agent: *victim_agent,
                    victim_stock_id: *victim_stock_id,
                    victim_attachments: victim_attachment_ids.clone(),
                    victim_position: *victim_world_location,
                    disposition: *death_disposition,
                },
                EventKind::WeaponPickup {
                    player,
                    weapon_stock_id,
                    weapon_attachment_ids,
                } => EventDetail::WeaponPickup {
                    player: id(player)?,
                    weapon_id: *weapon_stock_id,
                    attachments: weapon_attachment_ids.clone(),
                },
                EventKind::WeaponDrop {
                    player,
                    weapon_stock_id,
                    weapon_attachment_ids,
                    time_weapon_active_as_primary,
                    shots_fired,
                    shots_landed,
                } => EventDetail::WeaponDrop {
                    player: id(player)?,
                    weapon_id: *weapon_stock_id,
                    attachments: weapon_attachment_ids.clone(),
                    seconds_held_as_primary: time_weapon_active_as_primary
                        .as_deref()
                        .and_then(parse_iso8601_seconds)
                        .unwrap_or(0.0),
                    shots_fired: *shots_fired,
                    shots_landed: *shots_landed,
                },
                EventKind::WeaponPickupPad {
                    player,
                    weapon_stock_id,
                    weapon_attachment_ids,
                } => EventDetail::WeaponPickupPad {
                    player: id(player)?,
                    weapon_id: *weapon_stock_id,
                    attachments: weapon_attachment_ids.clone(),
                },
                EventKind::RoundStart { round_index } => EventDetail::RoundStart {
                    round_index: *round_index,
                },
                EventKind::RoundEnd { round_index } => EventDetail::RoundEnd {
                    round_index: *round_index,
                },
                EventKind::Medal { player, medal_id } => EventDetail::Medal {
                    player: id(player)?,
                    medal_id: *medal_id,
                },
                EventKind::Impulse { player, impulse_id } => EventDetail::Impulse {
                    player: id(player)?,
                    impulse_id: *impulse_id,
                },
                EventKind::PlayerSpawn { player } => EventDetail::PlayerSpawn {
                    player: id(player)?,
                },
                EventKind::Unknown => EventDetail::Unknown,
            };
            Ok(MatchEvent {
                seq: seq as i32,
                seconds_since_start: event
                    .time_since_start
                    .as_deref()
                    .and_then(parse_iso8601_seconds)
                    .unwrap_or(0.0),
                detail,
                assists: event.assistants.iter().map(id).collect::<Result<_, _>>()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> GameEventsPayload {
        serde_json::from_value(json!({
            "IsCompleteSetOfEvents": true,
            "GameEvents": [
                {"EventName": "RoundStart", "RoundIndex": 0, "TimeSinceStart": "PT0S"},
                {
                    "EventName": "Death",
                    "Killer": null,
                    "Victim": {"Gamertag": "Panda Love"},
                    "DeathDisposition": 1,
                    "VictimAgent": 1,
                    "VictimAttachmentIds": [1, 2],
                    "VictimStockId": 300,
                    "VictimWorldLocation": {"x": 1.5, "y": -2.0, "z": 3.25},
                    "Assistants": [{"Gamertag": "Sweaty Bob"}],
                    "TimeSinceStart": "PT1M2.5S"
                },
                {
                    "EventName": "WeaponDrop",
                    "Player": {"Gamertag": "sweaty bob"},
                    "WeaponStockId": 42,
                    "WeaponAttachmentIds": [],
                    "TimeWeaponActiveAsPrimary": "PT12.5S",
                    "ShotsFired": 30,
                    "ShotsLanded": 11,
                    "TimeSinceStart": "PT1M10S"
                },
                {"EventName": "SkullPickup", "TimeSinceStart": "PT2M"}
            ]
        }))
        .expect("events")
    }

    #[test]
    fn gamertags_are_deduplicated_by_normalized_tag() {
        let tags = payload().distinct_gamertags();
        assert_eq!(tags.len(), 2);
        assert!(tags.iter().any(|t| t == "Panda Love"));
    }

    #[test]
    fn timeline_keeps_every_event_including_unknown_kinds() {
        let accounts: AccountIndex =
            [("panda-love".to_string(), 1), ("sweaty-bob".to_string(), 2)].into();
        let events = build_timeline(&payload(), &accounts).expect("timeline");
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].detail, EventDetail::Unknown);
        assert_eq!(events[3].seconds_since_start, 120.0);

        match &events[1].detail {
            EventDetail::Death { killer, victim, victim_position, .. } => {
                assert_eq!(*killer, None);
                assert_eq!(*victim, Some(1));
                assert_eq!(victim_position.map(|p| p.z), Some(3.25));
            }
            other => panic!("unexpected detail {other:?}"),
        }
        assert_eq!(events[1].assists, vec![2]);
        assert_eq!(events[1].seconds_since_start, 62.5);

        match &events[2].detail {
            EventDetail::WeaponDrop { player, seconds_held_as_primary, shots_landed, .. } => {
                assert_eq!(*player, 2);
                assert_eq!(*seconds_held_as_primary, 12.5);
                assert_eq!(*shots_landed, 11);
            }
            other => panic!("unexpected detail {other:?}"),
        }
    }

    #[test]
    fn unresolved_gamertag_is_reported() {
        let accounts: AccountIndex = [("panda-love".to_string(), 1)].into();
        let missing = build_timeline(&payload(), &accounts).expect_err("bob missing");
        assert_eq!(missing, "Sweaty Bob");
    }
}
