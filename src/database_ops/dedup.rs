use std::sync::Arc;

use tracing::debug;

use crate::database_ops::store::IngestStore;
use crate::error::StoreResult;
use crate::models::StoredMatch;

/// Outcome of checking local storage for a match before going upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchLookup {
    /// Stored with everything the caller asked for.
    Complete(StoredMatch),
    /// Stored, but the caller wants events and none are stored yet.
    NeedsEvents(StoredMatch),
    Absent,
}

#[derive(Clone)]
pub struct DedupGuard {
    store: Arc<dyn IngestStore>,
}

impl DedupGuard {
    pub fn new(store: Arc<dyn IngestStore>) -> Self {
        Self { store }
    }

    pub async fn check_match(
        &self,
        instance_id: &str,
        want_events: bool,
    ) -> StoreResult<MatchLookup> {
        let lookup = match self.store.find_match(instance_id).await? {
            None => MatchLookup::Absent,
            Some(stored) if want_events && stored.events.is_empty() => {
                MatchLookup::NeedsEvents(stored)
            }
            Some(stored) => MatchLookup::Complete(stored),
        };
        debug!(instance_id, outcome = lookup.label(), "match dedup check");
        Ok(lookup)
    }
}

impl MatchLookup {
    fn label(&self) -> &'static str {
        match self {
            MatchLookup::Complete(_) => "hit",
            MatchLookup::NeedsEvents(_) => "needs_events",
            MatchLookup::Absent => "miss",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::memory_store::MemoryStore;
    use crate::database_ops::test_support::{arena_match, arena_player};
    use crate::models::{EventDetail, MatchEvent, NewAccount, Platform};

    async fn seeded() -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let account = store
            .create_account(&NewAccount {
                gamertag: "Panda Love".into(),
                seo: "panda-love".into(),
                platform: Platform::Xbox,
                membership_id: None,
            })
            .await
            .expect("account");
        (store, account.id)
    }

    #[tokio::test]
    async fn unknown_match_is_absent() {
        let (store, _) = seeded().await;
        let guard = DedupGuard::new(store);
        let lookup = guard.check_match("m-1", true).await.expect("lookup");
        assert_eq!(lookup, MatchLookup::Absent);
    }

    #[tokio::test]
    async fn match_without_events_needs_them_only_when_asked() {
        let (store, account_id) = seeded().await;
        store
            .write_match(&arena_match("m-1", vec![arena_player(account_id, 4, 2)]), None)
            .await
            .expect("write");
        let guard = DedupGuard::new(store);

        assert!(matches!(
            guard.check_match("m-1", false).await.expect("lookup"),
            MatchLookup::Complete(_)
        ));
        assert!(matches!(
            guard.check_match("m-1", true).await.expect("lookup"),
            MatchLookup::NeedsEvents(stored) if stored.record.instance_id == "m-1"
        ));
    }

    #[tokio::test]
    async fn match_with_events_is_complete() {
        let (store, account_id) = seeded().await;
        let events = [MatchEvent {
            seq: 0,
            seconds_since_start: 1.0,
            detail: EventDetail::PlayerSpawn { player: account_id },
            assists: vec![],
        }];
        store
            .write_match(
                &arena_match("m-1", vec![arena_player(account_id, 4, 2)]),
                Some(&events),
            )
            .await
            .expect("write");
        let guard = DedupGuard::new(store);

        match guard.check_match("m-1", true).await.expect("lookup") {
            MatchLookup::Complete(stored) => assert_eq!(stored.events.len(), 1),
            other => panic!("unexpected lookup {other:?}"),
        }
    }
}
