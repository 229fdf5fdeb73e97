use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{Account, Game};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRefreshRequest {
    pub game: Game,
    pub account_id: i64,
    pub gamertag: String,
}

/// Fire-and-forget hook for refreshing images of a newly created account.
pub trait AssetRefresh: Send + Sync {
    fn schedule(&self, game: Game, account: &Account);
}

pub struct NoopAssetRefresh;

impl AssetRefresh for NoopAssetRefresh {
    fn schedule(&self, game: Game, account: &Account) {
        debug!(?game, account_id = account.id, "asset refresh skipped (noop)");
    }
}

/// Hands requests to whatever worker owns the receiving end.
pub struct ChannelAssetRefresh {
    tx: mpsc::UnboundedSender<AssetRefreshRequest>,
}

impl ChannelAssetRefresh {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AssetRefreshRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AssetRefresh for ChannelAssetRefresh {
    fn schedule(&self, game: Game, account: &Account) {
        let request = AssetRefreshRequest {
            game,
            account_id: account.id,
            gamertag: account.gamertag.clone(),
        };
        if self.tx.send(request).is_err() {
            warn!(account_id = account.id, "asset refresh receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;
    use chrono::Utc;

    #[test]
    fn channel_delivers_requests_in_order() {
        let (refresh, mut rx) = ChannelAssetRefresh::new();
        let account = Account {
            id: 3,
            gamertag: "Panda Love".into(),
            seo: "panda-love".into(),
            platform: Platform::Xbox,
            membership_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        refresh.schedule(Game::Halo5, &account);
        refresh.schedule(Game::Destiny, &account);
        assert_eq!(rx.try_recv().expect("first").game, Game::Halo5);
        assert_eq!(rx.try_recv().expect("second").game, Game::Destiny);
        assert!(rx.try_recv().is_err());
    }
}
