use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::error::StoreError;
use crate::lifecycle::{CascadeKey, CascadeRecord};
use crate::model::{
    AccessGrant, Album, ArchiveJob, GrantTarget, JobState, MediaItem, MediaLink, ShareToken,
};
use crate::store::{
    AlbumStore, ArchiveJobStore, CascadeLog, GrantStore, MediaStore, MembershipStore,
    ShareTokenStore,
};
use crate::types::{AccountId, AlbumId, ArchiveJobId, MediaId, ShareTokenId};

/// In-memory store implementation for tests and demos.
///
/// Each collection sits behind its own lock, so single-record updates are
/// atomic the way a document store's are. Album creation takes the album and
/// grant locks together.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    albums: RwLock<HashMap<AlbumId, Album>>,
    media: RwLock<HashMap<MediaId, MediaItem>>,
    links: RwLock<Vec<MediaLink>>,
    grants: RwLock<HashMap<(AccountId, GrantTarget), AccessGrant>>,
    tokens: RwLock<HashMap<ShareTokenId, ShareToken>>,
    jobs: RwLock<HashMap<ArchiveJobId, ArchiveJob>>,
    cascades: RwLock<HashMap<CascadeKey, CascadeRecord>>,
    failures: Mutex<HashSet<&'static str>>,
}

#[derive(Debug, thiserror::Error)]
#[error("injected failure in {0}")]
struct InjectedFailure(&'static str);

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next call to the named store method fail.
    ///
    /// Used to exercise partial-failure and fail-closed paths.
    pub fn fail_next(&self, method: &'static str) {
        self.inner.failures.lock().insert(method);
    }

    fn check(&self, method: &'static str) -> std::result::Result<(), StoreError> {
        if self.inner.failures.lock().remove(method) {
            return Err(Box::new(InjectedFailure(method)));
        }
        Ok(())
    }

    /// Number of album rows.
    pub fn album_count(&self) -> usize {
        self.inner.albums.read().len()
    }

    /// Number of grants, album and media.
    pub fn grant_count(&self) -> usize {
        self.inner.grants.read().len()
    }

    /// Number of membership links.
    pub fn link_count(&self) -> usize {
        self.inner.links.read().len()
    }

    /// Number of share tokens.
    pub fn token_count(&self) -> usize {
        self.inner.tokens.read().len()
    }
}

#[async_trait]
impl AlbumStore for MemoryStore {
    async fn create_album(&self, album: Album) -> std::result::Result<(), StoreError> {
        self.check("create_album")?;
        let mut albums = self.inner.albums.write();
        let mut grants = self.inner.grants.write();
        let target = GrantTarget::Album(album.id.clone());
        grants.insert(
            (album.owner.clone(), target.clone()),
            AccessGrant::new(album.owner.clone(), target, true),
        );
        albums.insert(album.id.clone(), album);
        Ok(())
    }

    async fn get_album(&self, album: &AlbumId) -> std::result::Result<Option<Album>, StoreError> {
        self.check("get_album")?;
        Ok(self.inner.albums.read().get(album).cloned())
    }

    async fn delete_album(&self, album: &AlbumId) -> std::result::Result<bool, StoreError> {
        self.check("delete_album")?;
        Ok(self.inner.albums.write().remove(album).is_some())
    }
}

#[async_trait]
impl MediaStore for MemoryStore {
    async fn insert_media(&self, media: MediaItem) -> std::result::Result<(), StoreError> {
        self.check("insert_media")?;
        self.inner.media.write().insert(media.id.clone(), media);
        Ok(())
    }

    async fn get_media(
        &self,
        media: &MediaId,
    ) -> std::result::Result<Option<MediaItem>, StoreError> {
        self.check("get_media")?;
        Ok(self.inner.media.read().get(media).cloned())
    }

    async fn set_compressed_name(
        &self,
        media: &MediaId,
        name: String,
    ) -> std::result::Result<bool, StoreError> {
        self.check("set_compressed_name")?;
        let mut guard = self.inner.media.write();
        match guard.get_mut(media) {
            Some(record) => {
                record.compressed_name = Some(name);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_uploaded_by(
        &self,
        account: &AccountId,
    ) -> std::result::Result<Vec<MediaItem>, StoreError> {
        self.check("list_uploaded_by")?;
        let guard = self.inner.media.read();
        let mut media: Vec<MediaItem> = guard
            .values()
            .filter(|item| item.uploaded_by.account() == Some(account))
            .cloned()
            .collect();
        media.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(media)
    }

    async fn delete_media(&self, media: &MediaId) -> std::result::Result<bool, StoreError> {
        self.check("delete_media")?;
        Ok(self.inner.media.write().remove(media).is_some())
    }
}

#[async_trait]
impl MembershipStore for MemoryStore {
    async fn link_media(&self, link: MediaLink) -> std::result::Result<(), StoreError> {
        self.check("link_media")?;
        let mut guard = self.inner.links.write();
        if !guard
            .iter()
            .any(|existing| existing.album == link.album && existing.media == link.media)
        {
            guard.push(link);
        }
        Ok(())
    }

    async fn unlink_media(
        &self,
        album: &AlbumId,
        media: &MediaId,
    ) -> std::result::Result<bool, StoreError> {
        self.check("unlink_media")?;
        let mut guard = self.inner.links.write();
        let before = guard.len();
        guard.retain(|link| !(&link.album == album && &link.media == media));
        Ok(guard.len() != before)
    }

    async fn unlink_album(&self, album: &AlbumId) -> std::result::Result<usize, StoreError> {
        self.check("unlink_album")?;
        let mut guard = self.inner.links.write();
        let before = guard.len();
        guard.retain(|link| &link.album != album);
        Ok(before - guard.len())
    }

    async fn unlink_from_all_albums(
        &self,
        media: &MediaId,
    ) -> std::result::Result<usize, StoreError> {
        self.check("unlink_from_all_albums")?;
        let mut guard = self.inner.links.write();
        let before = guard.len();
        guard.retain(|link| &link.media != media);
        Ok(before - guard.len())
    }

    async fn album_media(&self, album: &AlbumId) -> std::result::Result<Vec<MediaId>, StoreError> {
        self.check("album_media")?;
        Ok(self
            .inner
            .links
            .read()
            .iter()
            .filter(|link| &link.album == album)
            .map(|link| link.media.clone())
            .collect())
    }

    async fn albums_containing(
        &self,
        media: &MediaId,
    ) -> std::result::Result<Vec<AlbumId>, StoreError> {
        self.check("albums_containing")?;
        Ok(self
            .inner
            .links
            .read()
            .iter()
            .filter(|link| &link.media == media)
            .map(|link| link.album.clone())
            .collect())
    }

    async fn is_linked(
        &self,
        album: &AlbumId,
        media: &MediaId,
    ) -> std::result::Result<bool, StoreError> {
        self.check("is_linked")?;
        Ok(self
            .inner
            .links
            .read()
            .iter()
            .any(|link| &link.album == album && &link.media == media))
    }
}

#[async_trait]
impl GrantStore for MemoryStore {
    async fn upsert_grant(&self, grant: AccessGrant) -> std::result::Result<(), StoreError> {
        self.check("upsert_grant")?;
        let key = (grant.account.clone(), grant.target.clone());
        self.inner.grants.write().insert(key, grant);
        Ok(())
    }

    async fn get_grant(
        &self,
        account: &AccountId,
        target: &GrantTarget,
    ) -> std::result::Result<Option<AccessGrant>, StoreError> {
        self.check("get_grant")?;
        let key = (account.clone(), target.clone());
        Ok(self.inner.grants.read().get(&key).cloned())
    }

    async fn revoke_grant(
        &self,
        account: &AccountId,
        target: &GrantTarget,
    ) -> std::result::Result<bool, StoreError> {
        self.check("revoke_grant")?;
        let key = (account.clone(), target.clone());
        Ok(self.inner.grants.write().remove(&key).is_some())
    }

    async fn revoke_all(&self, target: &GrantTarget) -> std::result::Result<usize, StoreError> {
        self.check("revoke_all")?;
        let mut guard = self.inner.grants.write();
        let before = guard.len();
        guard.retain(|(_, granted), _| granted != target);
        Ok(before - guard.len())
    }

    async fn grants_for_account(
        &self,
        account: &AccountId,
    ) -> std::result::Result<Vec<AccessGrant>, StoreError> {
        self.check("grants_for_account")?;
        Ok(self
            .inner
            .grants
            .read()
            .values()
            .filter(|grant| &grant.account == account)
            .cloned()
            .collect())
    }

    async fn grants_for_target(
        &self,
        target: &GrantTarget,
    ) -> std::result::Result<Vec<AccessGrant>, StoreError> {
        self.check("grants_for_target")?;
        Ok(self
            .inner
            .grants
            .read()
            .values()
            .filter(|grant| &grant.target == target)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ShareTokenStore for MemoryStore {
    async fn insert_token(&self, token: ShareToken) -> std::result::Result<bool, StoreError> {
        self.check("insert_token")?;
        let mut guard = self.inner.tokens.write();
        if guard.values().any(|existing| existing.token == token.token) {
            return Ok(false);
        }
        guard.insert(token.id.clone(), token);
        Ok(true)
    }

    async fn get_token(
        &self,
        id: &ShareTokenId,
    ) -> std::result::Result<Option<ShareToken>, StoreError> {
        self.check("get_token")?;
        Ok(self.inner.tokens.read().get(id).cloned())
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> std::result::Result<Option<ShareToken>, StoreError> {
        self.check("find_by_token")?;
        Ok(self
            .inner
            .tokens
            .read()
            .values()
            .find(|existing| existing.token == token)
            .cloned())
    }

    async fn tokens_for_album(
        &self,
        album: &AlbumId,
    ) -> std::result::Result<Vec<ShareToken>, StoreError> {
        self.check("tokens_for_album")?;
        let mut tokens: Vec<ShareToken> = self
            .inner
            .tokens
            .read()
            .values()
            .filter(|token| &token.album == album)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tokens)
    }

    async fn set_token_can_edit(
        &self,
        id: &ShareTokenId,
        can_edit: bool,
    ) -> std::result::Result<bool, StoreError> {
        self.check("set_token_can_edit")?;
        let mut guard = self.inner.tokens.write();
        match guard.get_mut(id) {
            Some(token) => {
                token.can_edit = can_edit;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_token(&self, id: &ShareTokenId) -> std::result::Result<bool, StoreError> {
        self.check("delete_token")?;
        Ok(self.inner.tokens.write().remove(id).is_some())
    }
}

#[async_trait]
impl ArchiveJobStore for MemoryStore {
    async fn insert_job(&self, job: ArchiveJob) -> std::result::Result<(), StoreError> {
        self.check("insert_job")?;
        self.inner.jobs.write().insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_job(
        &self,
        id: &ArchiveJobId,
    ) -> std::result::Result<Option<ArchiveJob>, StoreError> {
        self.check("get_job")?;
        Ok(self.inner.jobs.read().get(id).cloned())
    }

    async fn mark_ready(
        &self,
        id: &ArchiveJobId,
        at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError> {
        self.check("mark_ready")?;
        let mut guard = self.inner.jobs.write();
        match guard.get_mut(id) {
            Some(job) if job.state == JobState::Pending => {
                job.state = JobState::Ready;
                job.finished_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        id: &ArchiveJobId,
        reason: String,
        at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError> {
        self.check("mark_failed")?;
        let mut guard = self.inner.jobs.write();
        match guard.get_mut(id) {
            Some(job) if job.state == JobState::Pending => {
                job.state = JobState::Failed;
                job.failure = Some(reason);
                job.finished_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn jobs_in_state(
        &self,
        state: JobState,
    ) -> std::result::Result<Vec<ArchiveJob>, StoreError> {
        self.check("jobs_in_state")?;
        Ok(self
            .inner
            .jobs
            .read()
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CascadeLog for MemoryStore {
    async fn save_cascade(&self, record: CascadeRecord) -> std::result::Result<(), StoreError> {
        self.check("save_cascade")?;
        self.inner
            .cascades
            .write()
            .insert(record.key.clone(), record);
        Ok(())
    }

    async fn get_cascade(
        &self,
        key: &CascadeKey,
    ) -> std::result::Result<Option<CascadeRecord>, StoreError> {
        self.check("get_cascade")?;
        Ok(self.inner.cascades.read().get(key).cloned())
    }

    async fn pending_cascades(&self) -> std::result::Result<Vec<CascadeRecord>, StoreError> {
        self.check("pending_cascades")?;
        let mut records: Vec<CascadeRecord> =
            self.inner.cascades.read().values().cloned().collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(records)
    }

    async fn remove_cascade(&self, key: &CascadeKey) -> std::result::Result<(), StoreError> {
        self.check("remove_cascade")?;
        self.inner.cascades.write().remove(key);
        Ok(())
    }
}
