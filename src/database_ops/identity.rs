use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::database_ops::assets::AssetRefresh;
use crate::database_ops::fetch::IngestPass;
use crate::database_ops::store::IngestStore;
use crate::error::{IngestError, IngestResult, Missing, StoreError};
use crate::models::{Account, Game, NewAccount, Platform};
use crate::normalization::GamertagKey;

/// Identity as reported by an upstream API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamIdentity {
    pub display_name: String,
    pub platform: Platform,
    pub membership_id: Option<String>,
}

/// Game-specific upstream call that turns a tag into an identity.
#[async_trait::async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn lookup_identity(
        &self,
        pass: &IngestPass,
        key: &GamertagKey,
        platform: Platform,
    ) -> IngestResult<Option<UpstreamIdentity>>;
}

/// Maps external player identifiers to durable accounts.
///
/// Creation is check-then-create; a uniqueness conflict means someone else
/// got there first (or the player was renamed), so the resolver looks the
/// row up again instead of failing.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn IngestStore>,
    assets: Arc<dyn AssetRefresh>,
    game: Game,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IngestStore>, assets: Arc<dyn AssetRefresh>, game: Game) -> Self {
        Self {
            store,
            assets,
            game,
        }
    }

    /// Full protocol: local lookup, then upstream identity, then create.
    #[instrument(skip(self, pass, lookup))]
    pub async fn resolve_account(
        &self,
        pass: &IngestPass,
        gamertag: &str,
        platform: Platform,
        lookup: &dyn IdentityLookup,
    ) -> IngestResult<Account> {
        let key = GamertagKey::new(gamertag);
        if key.is_empty() {
            return Err(IngestError::NotFound(Missing::Player(gamertag.to_string())));
        }
        if let Some(account) = self.find_local(pass, &key, platform).await? {
            return Ok(account);
        }
        let identity = lookup
            .lookup_identity(pass, &key, platform)
            .await?
            .ok_or_else(|| IngestError::NotFound(Missing::Player(key.display().to_string())))?;
        let account = self.resolve_identity(&identity).await?;
        pass.remember_account(&account);
        Ok(account)
    }

    /// Account for an identity the caller already holds (e.g. embedded in a
    /// match payload). Renames and membership attachment happen here.
    pub async fn resolve_identity(&self, identity: &UpstreamIdentity) -> IngestResult<Account> {
        let key = GamertagKey::new(&identity.display_name);
        if key.is_empty() {
            return Err(IngestError::NotFound(Missing::Player(
                identity.display_name.clone(),
            )));
        }

        if let Some(membership) = &identity.membership_id {
            if let Some(account) = self.store.find_account_by_membership(membership).await? {
                return self.sync_tag(account, &key).await;
            }
        }
        if let Some(account) = self.store.find_account_by_seo(key.seo(), identity.platform).await? {
            return self.attach_membership(account, identity).await;
        }

        self.create_with_recovery(NewAccount {
            gamertag: key.display().to_string(),
            seo: key.seo().to_string(),
            platform: identity.platform,
            membership_id: identity.membership_id.clone(),
        })
        .await
    }

    /// Lookup-or-create without upstream identity data.
    pub async fn ensure_account(
        &self,
        pass: &IngestPass,
        gamertag: &str,
        platform: Platform,
    ) -> IngestResult<Account> {
        let key = GamertagKey::new(gamertag);
        if key.is_empty() {
            return Err(IngestError::NotFound(Missing::Player(gamertag.to_string())));
        }
        if let Some(account) = self.find_local(pass, &key, platform).await? {
            return Ok(account);
        }
        let account = self
            .create_with_recovery(NewAccount {
                gamertag: key.display().to_string(),
                seo: key.seo().to_string(),
                platform,
                membership_id: None,
            })
            .await?;
        pass.remember_account(&account);
        Ok(account)
    }

    /// Local-only lookup through the pass memo.
    pub async fn find_local(
        &self,
        pass: &IngestPass,
        key: &GamertagKey,
        platform: Platform,
    ) -> IngestResult<Option<Account>> {
        if let Some(account) = pass.remembered_account(key.seo(), platform) {
            return Ok(Some(account));
        }
        let found = self.store.find_account_by_seo(key.seo(), platform).await?;
        if let Some(account) = &found {
            pass.remember_account(account);
        }
        Ok(found)
    }

    async fn create_with_recovery(&self, new: NewAccount) -> IngestResult<Account> {
        match self.store.create_account(&new).await {
            Ok(account) => return Ok(self.created(account)),
            Err(StoreError::Conflict(constraint)) => {
                debug!(seo = %new.seo, %constraint, "account create raced; recovering");
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(account) = self.recover(&new).await? {
            return Ok(account);
        }

        // The conflicting row vanished between insert and lookup; try once more.
        match self.store.create_account(&new).await {
            Ok(account) => Ok(self.created(account)),
            Err(StoreError::Conflict(_)) => self
                .recover(&new)
                .await?
                .ok_or_else(|| IngestError::NotFound(Missing::Player(new.gamertag.clone()))),
            Err(e) => Err(e.into()),
        }
    }

    async fn recover(&self, new: &NewAccount) -> IngestResult<Option<Account>> {
        let key = GamertagKey::new(&new.gamertag);
        if let Some(membership) = &new.membership_id {
            if let Some(account) = self.store.find_account_by_membership(membership).await? {
                return self.sync_tag(account, &key).await.map(Some);
            }
        }
        match self.store.find_account_by_seo(&new.seo, new.platform).await? {
            Some(account) => {
                let identity = UpstreamIdentity {
                    display_name: new.gamertag.clone(),
                    platform: new.platform,
                    membership_id: new.membership_id.clone(),
                };
                self.attach_membership(account, &identity).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Rename when the membership's current tag differs from the stored one.
    ///
    /// When another account already holds the new tag, a membership-less
    /// holder receives the membership; any other holder leaves the account
    /// under its old tag.
    async fn sync_tag(&self, account: Account, key: &GamertagKey) -> IngestResult<Account> {
        if account.seo == key.seo() && account.gamertag == key.display() {
            return Ok(account);
        }
        info!(
            account_id = account.id,
            from = %account.gamertag,
            to = %key.display(),
            "account renamed upstream"
        );
        for _ in 0..2 {
            match self
                .store
                .rename_account(account.id, key.display(), key.seo())
                .await
            {
                Ok(renamed) => return Ok(renamed),
                Err(StoreError::Conflict(constraint)) => {
                    debug!(account_id = account.id, %constraint, "rename collided");
                }
                Err(e) => return Err(e.into()),
            }
            let Some(holder) = self
                .store
                .find_account_by_seo(key.seo(), account.platform)
                .await?
            else {
                // Holder vanished between the update and the lookup.
                continue;
            };
            return self.hand_over_membership(account, holder).await;
        }
        warn!(
            account_id = account.id,
            to = %key.display(),
            "rename keeps colliding; leaving tag unchanged"
        );
        Ok(account)
    }

    async fn hand_over_membership(
        &self,
        account: Account,
        holder: Account,
    ) -> IngestResult<Account> {
        match (&account.membership_id, &holder.membership_id) {
            (Some(membership), None) => {
                match self
                    .store
                    .move_membership(account.id, holder.id, membership)
                    .await
                {
                    Ok(updated) => {
                        info!(
                            from = account.id,
                            to = updated.id,
                            membership = %membership,
                            "membership moved to account holding the new tag"
                        );
                        Ok(updated)
                    }
                    Err(StoreError::Conflict(_) | StoreError::MissingReference(_)) => {
                        warn!(
                            account_id = account.id,
                            holder_id = holder.id,
                            "membership move lost a race; leaving tag unchanged"
                        );
                        Ok(account)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            _ => {
                warn!(
                    account_id = account.id,
                    holder_id = holder.id,
                    seo = %holder.seo,
                    "new tag belongs to another member; leaving tag unchanged"
                );
                Ok(account)
            }
        }
    }

    async fn attach_membership(
        &self,
        account: Account,
        identity: &UpstreamIdentity,
    ) -> IngestResult<Account> {
        match (&account.membership_id, &identity.membership_id) {
            (None, Some(membership)) => {
                match self.store.attach_membership(account.id, membership).await {
                    Ok(updated) => Ok(updated),
                    Err(StoreError::Conflict(_)) => {
                        warn!(
                            account_id = account.id,
                            membership = %membership,
                            "membership already attached elsewhere"
                        );
                        Ok(account)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            _ => Ok(account),
        }
    }

    fn created(&self, account: Account) -> Account {
        info!(account_id = account.id, seo = %account.seo, "account created");
        self.assets.schedule(self.game, &account);
        account
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::assets::{ChannelAssetRefresh, NoopAssetRefresh};
    use crate::database_ops::memory_store::MemoryStore;
    use futures::future::join_all;

    struct FixedLookup(Option<UpstreamIdentity>);

    #[async_trait::async_trait]
    impl IdentityLookup for FixedLookup {
        async fn lookup_identity(
            &self,
            _pass: &IngestPass,
            _key: &GamertagKey,
            _platform: Platform,
        ) -> IngestResult<Option<UpstreamIdentity>> {
            Ok(self.0.clone())
        }
    }

    fn identity(name: &str, membership: &str) -> UpstreamIdentity {
        UpstreamIdentity {
            display_name: name.into(),
            platform: Platform::Xbox,
            membership_id: Some(membership.into()),
        }
    }

    #[tokio::test]
    async fn concurrent_resolutions_create_exactly_one_account() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            IdentityResolver::new(store.clone(), Arc::new(NoopAssetRefresh), Game::Destiny);
        let wanted = identity("Panda Love", "4611686018");

        let results = join_all((0..8).map(|_| resolver.resolve_identity(&wanted))).await;
        let ids: Vec<i64> = results
            .into_iter()
            .map(|r| r.expect("resolution succeeds").id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn membership_match_renames_account() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            IdentityResolver::new(store.clone(), Arc::new(NoopAssetRefresh), Game::Destiny);
        let original = resolver
            .resolve_identity(&identity("Old Name", "77"))
            .await
            .expect("create");
        let renamed = resolver
            .resolve_identity(&identity("New Name", "77"))
            .await
            .expect("rename");
        assert_eq!(renamed.id, original.id);
        assert_eq!(renamed.seo, "new-name");
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn tag_match_without_membership_gets_it_attached() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            IdentityResolver::new(store.clone(), Arc::new(NoopAssetRefresh), Game::Destiny);
        let pass = IngestPass::new();
        let bare = resolver
            .ensure_account(&pass, "Panda Love", Platform::Xbox)
            .await
            .expect("ensure");
        assert!(bare.membership_id.is_none());
        let full = resolver
            .resolve_identity(&identity("Panda Love", "99"))
            .await
            .expect("attach");
        assert_eq!(full.id, bare.id);
        assert_eq!(full.membership_id.as_deref(), Some("99"));
    }

    #[tokio::test]
    async fn rename_onto_bare_tag_holder_moves_membership_there() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            IdentityResolver::new(store.clone(), Arc::new(NoopAssetRefresh), Game::Destiny);
        let pass = IngestPass::new();
        let old = resolver
            .resolve_identity(&identity("Old Name", "M1"))
            .await
            .expect("create");
        let holder = resolver
            .ensure_account(&pass, "New Name", Platform::Xbox)
            .await
            .expect("ensure");

        let resolved = resolver
            .resolve_identity(&identity("New Name", "M1"))
            .await
            .expect("rename collision resolves");
        assert_eq!(resolved.id, holder.id);
        assert_eq!(resolved.membership_id.as_deref(), Some("M1"));

        let by_membership = store
            .find_account_by_membership("M1")
            .await
            .expect("lookup")
            .expect("membership attached");
        assert_eq!(by_membership.id, holder.id);
        let previous = store
            .find_account_by_id(old.id)
            .await
            .expect("lookup")
            .expect("old row kept");
        assert!(previous.membership_id.is_none());
        assert_eq!(store.account_count(), 2);
    }

    #[tokio::test]
    async fn rename_onto_tag_held_by_other_member_keeps_old_tag() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            IdentityResolver::new(store.clone(), Arc::new(NoopAssetRefresh), Game::Destiny);
        let old = resolver
            .resolve_identity(&identity("Old Name", "M1"))
            .await
            .expect("create");
        let other = resolver
            .resolve_identity(&identity("New Name", "M2"))
            .await
            .expect("create other");

        let resolved = resolver
            .resolve_identity(&identity("New Name", "M1"))
            .await
            .expect("collision is not an error");
        assert_eq!(resolved.id, old.id);
        assert_eq!(resolved.seo, "old-name");

        let untouched = store
            .find_account_by_id(other.id)
            .await
            .expect("lookup")
            .expect("other row");
        assert_eq!(untouched.membership_id.as_deref(), Some("M2"));
    }

    #[tokio::test]
    async fn concurrent_ensures_share_one_account() {
        let store = Arc::new(MemoryStore::new());
        let resolver =
            IdentityResolver::new(store.clone(), Arc::new(NoopAssetRefresh), Game::Halo5);
        let passes: Vec<IngestPass> = (0..6).map(|_| IngestPass::new()).collect();

        let results = join_all(
            passes
                .iter()
                .map(|pass| resolver.ensure_account(pass, "Sweaty Bob", Platform::Xbox)),
        )
        .await;
        let ids: Vec<i64> = results
            .into_iter()
            .map(|r| r.expect("ensure succeeds").id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn unknown_upstream_identity_is_player_not_found() {
        let store = Arc::new(MemoryStore::new());
        let resolver = IdentityResolver::new(store, Arc::new(NoopAssetRefresh), Game::Halo5);
        let err = resolver
            .resolve_account(&IngestPass::new(), "Nobody", Platform::Xbox, &FixedLookup(None))
            .await
            .expect_err("no identity");
        assert!(matches!(err, IngestError::NotFound(Missing::Player(_))));
    }

    #[tokio::test]
    async fn only_new_accounts_schedule_asset_refresh() {
        let store = Arc::new(MemoryStore::new());
        let (assets, mut rx) = ChannelAssetRefresh::new();
        let resolver = IdentityResolver::new(store, Arc::new(assets), Game::Halo5);
        let pass = IngestPass::new();
        let lookup = FixedLookup(Some(identity("Panda Love", "5")));

        resolver
            .resolve_account(&pass, "Panda Love", Platform::Xbox, &lookup)
            .await
            .expect("first");
        resolver
            .resolve_account(&pass, "panda love", Platform::Xbox, &lookup)
            .await
            .expect("second");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
