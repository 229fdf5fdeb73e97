use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::database_ops::fetch::JsonTransport;
use crate::error::{IngestError, IngestResult};
use crate::models::{
    Game, Halo5Header, MatchDraft, MatchHeader, MatchKind, MatchPlayer, MatchRecord,
    PlayerExtras,
};

/// Transport that answers from a fixed URL → JSON script and counts calls.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<HashMap<String, Option<Value>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, body: Value) {
        self.responses
            .lock()
            .expect("script lock")
            .insert(url.to_string(), Some(body));
    }

    pub fn fail(&self, url: &str) {
        self.responses
            .lock()
            .expect("script lock")
            .insert(url.to_string(), None);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").values().sum()
    }
}

#[async_trait::async_trait]
impl JsonTransport for ScriptedTransport {
    async fn get_json(&self, url: &str) -> IngestResult<Value> {
        *self
            .calls
            .lock()
            .expect("calls lock")
            .entry(url.to_string())
            .or_default() += 1;
        tokio::task::yield_now().await;
        match self.responses.lock().expect("script lock").get(url) {
            Some(Some(body)) => Ok(body.clone()),
            Some(None) => Err(IngestError::upstream(url, "scripted failure")),
            None => Err(IngestError::upstream(url, "unscripted url")),
        }
    }
}

pub fn arena_player(account_id: i64, kills: i64, deaths: i64) -> MatchPlayer {
    MatchPlayer {
        account_id,
        team: None,
        kills,
        deaths,
        assists: 0,
        score: 0,
        seconds_played: None,
        average_lifespan: None,
        duration_seconds: None,
        completed: true,
        extras: PlayerExtras::Halo5(Box::default()),
    }
}

/// Minimal arena match draft around the given players.
pub fn arena_match(instance_id: &str, players: Vec<MatchPlayer>) -> MatchDraft {
    MatchDraft {
        record: MatchRecord {
            game: Game::Halo5,
            instance_id: instance_id.into(),
            kind: MatchKind::Arena,
            mode: None,
            occurred_at: None,
            version: 1,
            duration_seconds: None,
            mercy: false,
            header: MatchHeader::Halo5(Halo5Header {
                map_variant_id: None,
                game_variant_id: None,
                playlist_id: None,
                map_id: None,
                game_base_variant_id: None,
                season_id: None,
                is_team_game: true,
            }),
        },
        pvp: None,
        teams: vec![],
        players,
    }
}
