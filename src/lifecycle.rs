//! Album creation, grant management and resumable cascading deletes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::error::{Error, Result};
use crate::model::{AccessGrant, Actor, Album, GrantTarget};
use crate::operation::{Operation, ResourceKind, Target};
use crate::resolver::CapabilityResolver;
use crate::store::Store;
use crate::types::{AccountId, AlbumId, MediaId};

/// Resource whose deletion is in progress.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CascadeKey {
    Album(AlbumId),
    Media(MediaId),
}

impl CascadeKey {
    /// Ordered steps of the cascade for this resource kind.
    pub fn steps(&self) -> &'static [CascadeStep] {
        match self {
            CascadeKey::Album(_) => &[
                CascadeStep::UnlinkAlbumMedia,
                CascadeStep::RevokeAlbumGrants,
                CascadeStep::DeleteShareTokens,
                CascadeStep::DeleteAlbum,
            ],
            CascadeKey::Media(_) => &[
                CascadeStep::RevokeMediaGrants,
                CascadeStep::UnlinkMediaFromAlbums,
                CascadeStep::DeleteMedia,
                CascadeStep::RemoveArtifacts,
            ],
        }
    }
}

/// One idempotent cascade step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CascadeStep {
    UnlinkAlbumMedia,
    RevokeAlbumGrants,
    DeleteShareTokens,
    DeleteAlbum,
    RevokeMediaGrants,
    UnlinkMediaFromAlbums,
    DeleteMedia,
    RemoveArtifacts,
}

impl CascadeStep {
    /// Stable name, reported in `PartialFailure`.
    pub fn name(self) -> &'static str {
        match self {
            CascadeStep::UnlinkAlbumMedia => "unlink_album_media",
            CascadeStep::RevokeAlbumGrants => "revoke_album_grants",
            CascadeStep::DeleteShareTokens => "delete_share_tokens",
            CascadeStep::DeleteAlbum => "delete_album",
            CascadeStep::RevokeMediaGrants => "revoke_media_grants",
            CascadeStep::UnlinkMediaFromAlbums => "unlink_media_from_albums",
            CascadeStep::DeleteMedia => "delete_media",
            CascadeStep::RemoveArtifacts => "remove_artifacts",
        }
    }
}

/// Persisted progress of one cascade.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CascadeRecord {
    pub key: CascadeKey,
    /// Index into [`CascadeKey::steps`] of the first step not yet completed.
    pub next_step: usize,
    /// Files captured before the metadata row disappears.
    pub artifacts: Vec<(ArtifactKind, String)>,
    pub started_at: DateTime<Utc>,
}

impl CascadeRecord {
    /// Fresh record positioned before the first step.
    pub fn new(key: CascadeKey) -> Self {
        Self {
            key,
            next_step: 0,
            artifacts: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// True once every step has run.
    pub fn is_complete(&self) -> bool {
        self.next_step >= self.key.steps().len()
    }
}

/// What one run of a cascade removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub links_removed: usize,
    pub grants_revoked: usize,
    pub tokens_deleted: usize,
    pub token_failures: usize,
    pub rows_deleted: usize,
    pub artifacts_removed: usize,
}

fn partial(step: CascadeStep, source: Error) -> Error {
    Error::PartialFailure {
        step: step.name(),
        source: Box::new(source),
    }
}

fn manage_operation(target: &GrantTarget) -> (Operation, Target) {
    match target {
        GrantTarget::Album(album) => (Operation::MANAGE_ALBUM_GRANTS, Target::Album(album.clone())),
        GrantTarget::Media(media) => (Operation::MANAGE_MEDIA_GRANTS, Target::Media(media.clone())),
    }
}

/// Coordinates resource creation, grants and cascading deletes.
pub struct LifecycleCoordinator<S> {
    resolver: CapabilityResolver<S>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl<S> Clone for LifecycleCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            artifacts: Arc::clone(&self.artifacts),
        }
    }
}

impl<S: Store + 'static> LifecycleCoordinator<S> {
    /// Creates a coordinator removing files through `artifacts`.
    pub fn new(resolver: CapabilityResolver<S>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            resolver,
            artifacts,
        }
    }

    fn store(&self) -> &S {
        self.resolver.store()
    }

    /// Creates an album owned by the calling account.
    pub async fn create_album(
        &self,
        actor: &Actor,
        title: &str,
        description: &str,
    ) -> Result<Album> {
        let target = Target::Collection(ResourceKind::Album);
        self.resolver
            .require(actor, Operation::CREATE_ALBUM, &target)
            .await?;
        let owner = actor.account.clone().ok_or(Error::Denied {
            operation: Operation::CREATE_ALBUM,
            target,
        })?;
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Validation("album title must not be empty".into()));
        }
        let album = Album {
            id: AlbumId::generate(),
            title: title.to_string(),
            description: description.to_string(),
            owner,
            created_at: Utc::now(),
        };
        self.store().create_album(album.clone()).await?;
        tracing::info!(album = %album.id, owner = %album.owner, "album created");
        Ok(album)
    }

    /// An album, visible to anyone allowed to view it.
    pub async fn get_album(&self, actor: &Actor, album: &AlbumId) -> Result<Album> {
        let row = self
            .store()
            .get_album(album)
            .await?
            .ok_or_else(|| Error::not_found("album", album))?;
        self.resolver
            .require(actor, Operation::VIEW_ALBUM, &Target::Album(album.clone()))
            .await?;
        Ok(row)
    }

    /// Albums the caller can currently view, newest first.
    ///
    /// Accounts see every album they hold a grant on; a share token adds its
    /// own album while it is live.
    pub async fn list_albums(&self, actor: &Actor) -> Result<Vec<Album>> {
        let mut candidates = Vec::new();
        if let Some(account) = &actor.account {
            for grant in self.store().grants_for_account(account).await? {
                if let GrantTarget::Album(album) = grant.target {
                    candidates.push(album);
                }
            }
        }
        if let Some(token) = &actor.token {
            candidates.push(token.album.clone());
        }

        let mut seen = HashSet::new();
        let mut albums = Vec::new();
        for album in candidates {
            if !seen.insert(album.clone()) || !self.resolver.can_view_album(actor, &album).await {
                continue;
            }
            if let Some(row) = self.store().get_album(&album).await? {
                albums.push(row);
            }
        }
        albums.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(albums)
    }

    async fn ensure_target_exists(&self, target: &GrantTarget) -> Result<Option<AccountId>> {
        match target {
            GrantTarget::Album(album) => self
                .store()
                .get_album(album)
                .await?
                .map(|album| Some(album.owner))
                .ok_or_else(|| Error::not_found("album", album)),
            GrantTarget::Media(media) => self
                .store()
                .get_media(media)
                .await?
                .map(|_| None)
                .ok_or_else(|| Error::not_found("media", media)),
        }
    }

    /// Grants `account` access to `target`. Re-granting replaces `can_edit`.
    pub async fn grant(
        &self,
        actor: &Actor,
        account: AccountId,
        target: GrantTarget,
        can_edit: bool,
    ) -> Result<AccessGrant> {
        let album_owner = self.ensure_target_exists(&target).await?;
        let (operation, checked) = manage_operation(&target);
        self.resolver.require(actor, operation, &checked).await?;
        if album_owner.as_ref() == Some(&account) && !can_edit {
            return Err(Error::Validation(
                "the album owner keeps edit access".into(),
            ));
        }
        let grant = AccessGrant::new(account, target, can_edit);
        self.store().upsert_grant(grant.clone()).await?;
        tracing::debug!(account = %grant.account, resource = ?grant.target, can_edit, "grant upserted");
        Ok(grant)
    }

    /// Revokes a grant. Returns `Ok(false)` when there was nothing to revoke.
    pub async fn revoke(
        &self,
        actor: &Actor,
        account: &AccountId,
        target: &GrantTarget,
    ) -> Result<bool> {
        let album_owner = self.ensure_target_exists(target).await?;
        let (operation, checked) = manage_operation(target);
        self.resolver.require(actor, operation, &checked).await?;
        if album_owner.as_ref() == Some(account) {
            return Err(Error::Validation(
                "the album owner grant cannot be revoked".into(),
            ));
        }
        Ok(self.store().revoke_grant(account, target).await?)
    }

    /// Grants on one album or media item.
    pub async fn list_grants(&self, actor: &Actor, target: &GrantTarget) -> Result<Vec<AccessGrant>> {
        self.ensure_target_exists(target).await?;
        let (operation, checked) = manage_operation(target);
        self.resolver.require(actor, operation, &checked).await?;
        Ok(self.store().grants_for_target(target).await?)
    }

    /// Grants held by the calling account.
    pub async fn my_grants(&self, actor: &Actor) -> Result<Vec<AccessGrant>> {
        let Some(account) = &actor.account else {
            return Ok(Vec::new());
        };
        Ok(self.store().grants_for_account(account).await?)
    }

    /// Deletes an album or a media item.
    pub async fn delete(&self, actor: &Actor, target: &Target) -> Result<CascadeReport> {
        match target {
            Target::Album(album) => self.delete_album(actor, album).await,
            Target::Media(media) => self.delete_media(actor, media).await,
            other => Err(Error::Validation(format!(
                "{other} is not deleted through the lifecycle coordinator"
            ))),
        }
    }

    /// Deletes an album: links, grants, share tokens, then the row.
    ///
    /// A failed step leaves a cascade record behind; calling this again or
    /// [`LifecycleCoordinator::resume_pending`] continues where it stopped.
    pub async fn delete_album(&self, actor: &Actor, album: &AlbumId) -> Result<CascadeReport> {
        let key = CascadeKey::Album(album.clone());
        if self.store().get_album(album).await?.is_none() {
            return self.resume_or_not_found(key, "album", album).await;
        }
        self.resolver
            .require(actor, Operation::DELETE_ALBUM, &Target::Album(album.clone()))
            .await?;
        let record = match self.store().get_cascade(&key).await? {
            Some(record) => record,
            None => CascadeRecord::new(key),
        };
        self.run(record).await
    }

    /// Deletes a media item: grants, links, the row, then its files.
    pub async fn delete_media(&self, actor: &Actor, media: &MediaId) -> Result<CascadeReport> {
        let key = CascadeKey::Media(media.clone());
        let Some(item) = self.store().get_media(media).await? else {
            return self.resume_or_not_found(key, "media", media).await;
        };
        self.resolver
            .require(actor, Operation::DELETE_MEDIA, &Target::Media(media.clone()))
            .await?;
        let record = match self.store().get_cascade(&key).await? {
            Some(record) => record,
            None => {
                let mut record = CascadeRecord::new(key);
                // Compressed output always reuses the storage name.
                record.artifacts = vec![
                    (ArtifactKind::Original, item.storage_name.clone()),
                    (ArtifactKind::Compressed, item.storage_name.clone()),
                ];
                if let Some(compressed) = item.compressed_name
                    && compressed != item.storage_name
                {
                    record.artifacts.push((ArtifactKind::Compressed, compressed));
                }
                record
            }
        };
        self.run(record).await
    }

    /// A vanished row is only acceptable when an earlier, authorized delete
    /// was interrupted after removing it.
    async fn resume_or_not_found(
        &self,
        key: CascadeKey,
        kind: &'static str,
        id: impl ToString,
    ) -> Result<CascadeReport> {
        match self.store().get_cascade(&key).await? {
            Some(record) => self.run(record).await,
            None => Err(Error::not_found(kind, id)),
        }
    }

    /// Finishes every cascade interrupted by a failure or a crash.
    ///
    /// Returns the number of cascades completed. Failures are logged and left
    /// for the next call.
    pub async fn resume_pending(&self) -> Result<usize> {
        let mut completed = 0;
        for record in self.store().pending_cascades().await? {
            let key = record.key.clone();
            match self.run(record).await {
                Ok(_) => {
                    tracing::info!(?key, "resumed cascade completed");
                    completed += 1;
                }
                Err(error) => tracing::error!(?key, %error, "resumed cascade failed again"),
            }
        }
        Ok(completed)
    }

    async fn run(&self, mut record: CascadeRecord) -> Result<CascadeReport> {
        let steps = record.key.steps();
        let mut report = CascadeReport::default();
        if record.next_step == 0 {
            self.store()
                .save_cascade(record.clone())
                .await
                .map_err(|error| partial(steps[0], error.into()))?;
        }
        while let Some(&step) = steps.get(record.next_step) {
            self.apply(&record, step, &mut report)
                .await
                .map_err(|error| partial(step, error))?;
            record.next_step += 1;
            if !record.is_complete() {
                self.store()
                    .save_cascade(record.clone())
                    .await
                    .map_err(|error| partial(step, error.into()))?;
            }
        }
        if let Err(error) = self.store().remove_cascade(&record.key).await {
            tracing::warn!(key = ?record.key, %error, "finished cascade record not removed");
        }
        tracing::info!(key = ?record.key, ?report, "cascade completed");
        Ok(report)
    }

    async fn apply(
        &self,
        record: &CascadeRecord,
        step: CascadeStep,
        report: &mut CascadeReport,
    ) -> Result<()> {
        let store = self.store();
        match (&record.key, step) {
            (CascadeKey::Album(album), CascadeStep::UnlinkAlbumMedia) => {
                report.links_removed += store.unlink_album(album).await?;
            }
            (CascadeKey::Album(album), CascadeStep::RevokeAlbumGrants) => {
                report.grants_revoked += store
                    .revoke_all(&GrantTarget::Album(album.clone()))
                    .await?;
            }
            (CascadeKey::Album(album), CascadeStep::DeleteShareTokens) => {
                for token in store.tokens_for_album(album).await? {
                    match store.delete_token(&token.id).await {
                        Ok(true) => report.tokens_deleted += 1,
                        Ok(false) => {}
                        Err(error) => {
                            report.token_failures += 1;
                            tracing::warn!(%album, token = %token.id, %error, "share token not deleted");
                        }
                    }
                }
            }
            (CascadeKey::Album(album), CascadeStep::DeleteAlbum) => {
                if store.delete_album(album).await? {
                    report.rows_deleted += 1;
                }
            }
            (CascadeKey::Media(media), CascadeStep::RevokeMediaGrants) => {
                report.grants_revoked += store
                    .revoke_all(&GrantTarget::Media(media.clone()))
                    .await?;
            }
            (CascadeKey::Media(media), CascadeStep::UnlinkMediaFromAlbums) => {
                report.links_removed += store.unlink_from_all_albums(media).await?;
            }
            (CascadeKey::Media(media), CascadeStep::DeleteMedia) => {
                if store.delete_media(media).await? {
                    report.rows_deleted += 1;
                }
            }
            (CascadeKey::Media(_), CascadeStep::RemoveArtifacts) => {
                // Missing files count as removed.
                for (kind, name) in &record.artifacts {
                    if self.artifacts.remove(*kind, name).await? {
                        report.artifacts_removed += 1;
                    }
                }
            }
            (key, step) => {
                return Err(Error::InvalidOperation(format!(
                    "step {} does not apply to {key:?}",
                    step.name()
                )));
            }
        }
        Ok(())
    }
}
