use crate::error::{Error, Result};
use crate::model::{Actor, GrantTarget, Origin, ShareToken};
use crate::operation::{Operation, ResourceKind, Target};
use crate::store::Store;
use crate::types::{AlbumId, ArchiveJobId, MediaId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// Authorization decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Operation is permitted.
    Allow,
    /// Operation is denied.
    Deny,
}

impl Decision {
    /// True for [`Decision::Allow`].
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// One rule of the decision table.
///
/// Implementations read current state on every call and must not cache.
/// Returning an error is treated as a denial by the resolver.
#[async_trait]
pub trait Policy<S>: Send + Sync {
    /// Whether `actor` may act on `target` at `now`.
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Re-reads a token and returns it when it is live and scoped to `album`.
///
/// Callers may hold a stale copy; only the stored record counts.
pub(crate) async fn live_token_for_album<S: Store>(
    store: &S,
    token: &ShareToken,
    album: &AlbumId,
    now: DateTime<Utc>,
) -> Result<Option<ShareToken>> {
    let Some(current) = store.get_token(&token.id).await? else {
        return Ok(None);
    };
    if current.is_expired_at(now) || &current.album != album {
        return Ok(None);
    }
    Ok(Some(current))
}

/// View or edit an album through a grant or an in-scope token.
#[derive(Debug, Clone, Copy)]
pub struct AlbumAccess {
    /// Require edit rights rather than view.
    pub edit: bool,
}

#[async_trait]
impl<S: Store> Policy<S> for AlbumAccess {
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Target::Album(album) = target else {
            return Ok(false);
        };
        if store.get_album(album).await?.is_none() {
            return Ok(false);
        }
        if let Some(account) = &actor.account {
            let grant = store
                .get_grant(account, &GrantTarget::Album(album.clone()))
                .await?;
            if grant.is_some_and(|grant| !self.edit || grant.can_edit) {
                return Ok(true);
            }
        }
        if let Some(token) = &actor.token
            && let Some(live) = live_token_for_album(store, token, album, now).await?
        {
            return Ok(!self.edit || live.can_edit);
        }
        Ok(false)
    }
}

/// Strict authorship of an album. Grants and tokens never satisfy it.
#[derive(Debug, Clone, Copy)]
pub struct AlbumOwner;

#[async_trait]
impl<S: Store> Policy<S> for AlbumOwner {
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        target: &Target,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        let (Target::Album(album), Some(account)) = (target, &actor.account) else {
            return Ok(false);
        };
        Ok(store
            .get_album(album)
            .await?
            .is_some_and(|album| &album.owner == account))
    }
}

/// Any authenticated account.
#[derive(Debug, Clone, Copy)]
pub struct AnyAccount;

#[async_trait]
impl<S: Store> Policy<S> for AnyAccount {
    async fn evaluate(
        &self,
        _store: &S,
        actor: &Actor,
        _target: &Target,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(actor.account.is_some())
    }
}

/// View or edit a media item.
///
/// Accounts need a media grant (or, for viewing, a grant on an album that
/// contains the item). Tokens work through an album that contains the item.
#[derive(Debug, Clone, Copy)]
pub struct MediaAccess {
    /// Require edit rights rather than view.
    pub edit: bool,
}

#[async_trait]
impl<S: Store> Policy<S> for MediaAccess {
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Target::Media(media) = target else {
            return Ok(false);
        };
        if store.get_media(media).await?.is_none() {
            return Ok(false);
        }
        if let Some(account) = &actor.account {
            let grant = store
                .get_grant(account, &GrantTarget::Media(media.clone()))
                .await?;
            if grant.is_some_and(|grant| !self.edit || grant.can_edit) {
                return Ok(true);
            }
            if !self.edit {
                for album in store.albums_containing(media).await? {
                    let album_grant = store.get_grant(account, &GrantTarget::Album(album)).await?;
                    if album_grant.is_some() {
                        return Ok(true);
                    }
                }
            }
        }
        if let Some(token) = &actor.token
            && let Some(live) = live_token_for_album(store, token, &token.album, now).await?
            && store.is_linked(&live.album, media).await?
        {
            return Ok(!self.edit || live.can_edit);
        }
        Ok(false)
    }
}

/// Upload new media: any account, or a live token allowed to edit its album.
#[derive(Debug, Clone, Copy)]
pub struct MediaUpload;

#[async_trait]
impl<S: Store> Policy<S> for MediaUpload {
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        _target: &Target,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if actor.account.is_some() {
            return Ok(true);
        }
        let Some(token) = &actor.token else {
            return Ok(false);
        };
        let Some(live) = live_token_for_album(store, token, &token.album, now).await? else {
            return Ok(false);
        };
        Ok(live.can_edit && store.get_album(&live.album).await?.is_some())
    }
}

/// Strict authorship of a media item (uploaded by this account).
#[derive(Debug, Clone, Copy)]
pub struct MediaOwner;

#[async_trait]
impl<S: Store> Policy<S> for MediaOwner {
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        target: &Target,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        let (Target::Media(media), Some(account)) = (target, &actor.account) else {
            return Ok(false);
        };
        Ok(store
            .get_media(media)
            .await?
            .is_some_and(|media| media.uploaded_by.account() == Some(account)))
    }
}

/// Only the initiator of an archive job may see or consume it.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveInitiator;

#[async_trait]
impl<S: Store> Policy<S> for ArchiveInitiator {
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Target::ArchiveJob(job) = target else {
            return Ok(false);
        };
        let Some(job) = store.get_job(job).await? else {
            return Ok(false);
        };
        match &job.initiator {
            Origin::Account(initiator) => Ok(actor.account.as_ref() == Some(initiator)),
            Origin::ShareToken(initiator) => {
                let Some(token) = actor.token.as_ref().filter(|token| &token.id == initiator)
                else {
                    return Ok(false);
                };
                Ok(live_token_for_album(store, token, &token.album, now)
                    .await?
                    .is_some())
            }
        }
    }
}

/// Only the issuing account may see, change or delete a share token.
#[derive(Debug, Clone, Copy)]
pub struct TokenIssuer;

#[async_trait]
impl<S: Store> Policy<S> for TokenIssuer {
    async fn evaluate(
        &self,
        store: &S,
        actor: &Actor,
        target: &Target,
        _now: DateTime<Utc>,
    ) -> Result<bool> {
        let (Target::ShareToken(token), Some(account)) = (target, &actor.account) else {
            return Ok(false);
        };
        Ok(store
            .get_token(token)
            .await?
            .is_some_and(|token| &token.issuer == account))
    }
}

type PolicyTable<S> = HashMap<Operation, Arc<dyn Policy<S>>>;

fn default_policies<S: Store + 'static>() -> PolicyTable<S> {
    let mut table: PolicyTable<S> = HashMap::new();
    table.insert(Operation::VIEW_ALBUM, Arc::new(AlbumAccess { edit: false }));
    table.insert(Operation::EDIT_ALBUM, Arc::new(AlbumAccess { edit: true }));
    table.insert(Operation::CREATE_ALBUM, Arc::new(AnyAccount));
    table.insert(Operation::DELETE_ALBUM, Arc::new(AlbumOwner));
    table.insert(Operation::MANAGE_ALBUM_GRANTS, Arc::new(AlbumOwner));
    table.insert(Operation::SHARE_ALBUM, Arc::new(AlbumOwner));
    table.insert(Operation::VIEW_MEDIA, Arc::new(MediaAccess { edit: false }));
    table.insert(Operation::EDIT_MEDIA, Arc::new(MediaAccess { edit: true }));
    table.insert(Operation::CREATE_MEDIA, Arc::new(MediaUpload));
    table.insert(Operation::DELETE_MEDIA, Arc::new(MediaOwner));
    table.insert(Operation::MANAGE_MEDIA_GRANTS, Arc::new(MediaOwner));
    table.insert(Operation::VIEW_ARCHIVE, Arc::new(ArchiveInitiator));
    table.insert(Operation::CONSUME_ARCHIVE, Arc::new(ArchiveInitiator));
    table.insert(Operation::VIEW_SHARE_TOKEN, Arc::new(TokenIssuer));
    table.insert(Operation::EDIT_SHARE_TOKEN, Arc::new(TokenIssuer));
    table.insert(Operation::DELETE_SHARE_TOKEN, Arc::new(TokenIssuer));
    table
}

/// Table-driven capability resolver.
///
/// Every check reads current state through the store; nothing is cached.
pub struct CapabilityResolver<S> {
    store: Arc<S>,
    policies: Arc<PolicyTable<S>>,
}

impl<S> Clone for CapabilityResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policies: Arc::clone(&self.policies),
        }
    }
}

impl<S> std::fmt::Debug for CapabilityResolver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut operations: Vec<String> = self.policies.keys().map(|op| op.to_string()).collect();
        operations.sort();
        f.debug_struct("CapabilityResolver")
            .field("operations", &operations)
            .finish()
    }
}

/// Builder for [`CapabilityResolver`].
pub struct ResolverBuilder<S> {
    store: Arc<S>,
    policies: PolicyTable<S>,
}

impl<S: Store + 'static> ResolverBuilder<S> {
    /// Creates a builder holding the default decision table.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            policies: default_policies(),
        }
    }

    /// Replaces the policy for one operation.
    pub fn policy<P>(mut self, operation: Operation, policy: P) -> Self
    where
        P: Policy<S> + 'static,
    {
        self.policies.insert(operation, Arc::new(policy));
        self
    }

    /// Removes an operation from the table so it always denies.
    pub fn without(mut self, operation: Operation) -> Self {
        self.policies.remove(&operation);
        self
    }

    /// Builds the resolver.
    pub fn build(self) -> CapabilityResolver<S> {
        CapabilityResolver {
            store: self.store,
            policies: Arc::new(self.policies),
        }
    }
}

impl<S: Store + 'static> CapabilityResolver<S> {
    /// Resolver with the default decision table.
    pub fn new(store: Arc<S>) -> Self {
        ResolverBuilder::new(store).build()
    }

    /// Store the decisions are read from.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Evaluates `operation` on `target` at the current time.
    pub async fn evaluate(&self, actor: &Actor, operation: Operation, target: &Target) -> Decision {
        self.evaluate_at(actor, operation, target, Utc::now()).await
    }

    /// Evaluates `operation` on `target` as of `now`.
    ///
    /// Never fails: lookup errors are logged and collapse to [`Decision::Deny`].
    pub async fn evaluate_at(
        &self,
        actor: &Actor,
        operation: Operation,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Decision {
        if actor.is_anonymous() {
            return Decision::Deny;
        }
        if operation.resource != target.kind() {
            tracing::debug!(%operation, resource = %target, "operation does not apply to target kind");
            return Decision::Deny;
        }
        let Some(policy) = self.policies.get(&operation) else {
            return Decision::Deny;
        };
        match policy.evaluate(&self.store, actor, target, now).await {
            Ok(true) => Decision::Allow,
            Ok(false) => Decision::Deny,
            Err(error) => {
                tracing::warn!(%operation, resource = %target, %error, "capability lookup failed, denying");
                Decision::Deny
            }
        }
    }

    /// Boolean form of [`CapabilityResolver::evaluate`].
    pub async fn can(&self, actor: &Actor, operation: Operation, target: &Target) -> bool {
        self.evaluate(actor, operation, target).await.is_allowed()
    }

    /// Returns `Error::Denied` unless the operation is allowed.
    pub async fn require(&self, actor: &Actor, operation: Operation, target: &Target) -> Result<()> {
        match self.evaluate(actor, operation, target).await {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(Error::Denied {
                operation,
                target: target.clone(),
            }),
        }
    }

    /// `album:view` on the album.
    pub async fn can_view_album(&self, actor: &Actor, album: &AlbumId) -> bool {
        self.can(actor, Operation::VIEW_ALBUM, &Target::Album(album.clone()))
            .await
    }

    /// `album:edit` on the album.
    pub async fn can_edit_album(&self, actor: &Actor, album: &AlbumId) -> bool {
        self.can(actor, Operation::EDIT_ALBUM, &Target::Album(album.clone()))
            .await
    }

    /// `album:delete` on the album; owner only.
    pub async fn can_delete_album(&self, actor: &Actor, album: &AlbumId) -> bool {
        self.can(actor, Operation::DELETE_ALBUM, &Target::Album(album.clone()))
            .await
    }

    /// `album:share` on the album; owner only.
    pub async fn can_create_share_link(&self, actor: &Actor, album: &AlbumId) -> bool {
        self.can(actor, Operation::SHARE_ALBUM, &Target::Album(album.clone()))
            .await
    }

    /// `media:create`: accounts, and tokens allowed to edit.
    pub async fn can_create_media(&self, actor: &Actor) -> bool {
        self.can(
            actor,
            Operation::CREATE_MEDIA,
            &Target::Collection(ResourceKind::Media),
        )
        .await
    }

    /// `media:view` on the item.
    pub async fn can_view_media(&self, actor: &Actor, media: &MediaId) -> bool {
        self.can(actor, Operation::VIEW_MEDIA, &Target::Media(media.clone()))
            .await
    }

    /// `media:delete` on the item; uploader only.
    pub async fn can_delete_media(&self, actor: &Actor, media: &MediaId) -> bool {
        self.can(actor, Operation::DELETE_MEDIA, &Target::Media(media.clone()))
            .await
    }

    /// `archive:consume` on the job; initiator only.
    pub async fn can_consume_download(&self, actor: &Actor, job: &ArchiveJobId) -> bool {
        self.can(
            actor,
            Operation::CONSUME_ARCHIVE,
            &Target::ArchiveJob(job.clone()),
        )
        .await
    }
}
