use crate::error::StoreError;
use crate::lifecycle::{CascadeKey, CascadeRecord};
use crate::model::{
    AccessGrant, Album, ArchiveJob, GrantTarget, JobState, MediaItem, MediaLink, ShareToken,
};
use crate::types::{AccountId, AlbumId, ArchiveJobId, MediaId, ShareTokenId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Store interface for album rows.
#[async_trait]
pub trait AlbumStore {
    /// Inserts an album together with its owner's edit grant, atomically.
    async fn create_album(&self, album: Album) -> std::result::Result<(), StoreError>;

    /// Returns an album by id.
    async fn get_album(&self, album: &AlbumId) -> std::result::Result<Option<Album>, StoreError>;

    /// Deletes an album row. Returns whether a row existed.
    async fn delete_album(&self, album: &AlbumId) -> std::result::Result<bool, StoreError>;
}

/// Store interface for media metadata.
#[async_trait]
pub trait MediaStore {
    /// Inserts a media record.
    async fn insert_media(&self, media: MediaItem) -> std::result::Result<(), StoreError>;

    /// Returns a media record by id.
    async fn get_media(&self, media: &MediaId)
    -> std::result::Result<Option<MediaItem>, StoreError>;

    /// Records the derived artifact name. Returns whether the record existed.
    async fn set_compressed_name(
        &self,
        media: &MediaId,
        name: String,
    ) -> std::result::Result<bool, StoreError>;

    /// Returns media uploaded by an account.
    async fn list_uploaded_by(
        &self,
        account: &AccountId,
    ) -> std::result::Result<Vec<MediaItem>, StoreError>;

    /// Deletes a media record. Returns whether a row existed.
    async fn delete_media(&self, media: &MediaId) -> std::result::Result<bool, StoreError>;
}

/// Store interface for album membership links.
#[async_trait]
pub trait MembershipStore {
    /// Links a media item into an album. Linking twice is a no-op.
    async fn link_media(&self, link: MediaLink) -> std::result::Result<(), StoreError>;

    /// Removes one link. Returns whether it existed.
    async fn unlink_media(
        &self,
        album: &AlbumId,
        media: &MediaId,
    ) -> std::result::Result<bool, StoreError>;

    /// Removes every link pointing at an album. Returns the number removed.
    async fn unlink_album(&self, album: &AlbumId) -> std::result::Result<usize, StoreError>;

    /// Removes every link of a media item. Returns the number removed.
    async fn unlink_from_all_albums(&self, media: &MediaId)
    -> std::result::Result<usize, StoreError>;

    /// Returns media linked to an album, in link order.
    async fn album_media(&self, album: &AlbumId) -> std::result::Result<Vec<MediaId>, StoreError>;

    /// Returns albums containing a media item.
    async fn albums_containing(
        &self,
        media: &MediaId,
    ) -> std::result::Result<Vec<AlbumId>, StoreError>;

    /// Returns whether a media item is linked into an album.
    async fn is_linked(
        &self,
        album: &AlbumId,
        media: &MediaId,
    ) -> std::result::Result<bool, StoreError>;
}

/// Durable (account, resource) grant mapping.
#[async_trait]
pub trait GrantStore {
    /// Inserts or replaces the grant for (account, target). Last write wins.
    async fn upsert_grant(&self, grant: AccessGrant) -> std::result::Result<(), StoreError>;

    /// Returns the grant for (account, target).
    async fn get_grant(
        &self,
        account: &AccountId,
        target: &GrantTarget,
    ) -> std::result::Result<Option<AccessGrant>, StoreError>;

    /// Removes the grant for (account, target). Returns whether it existed.
    async fn revoke_grant(
        &self,
        account: &AccountId,
        target: &GrantTarget,
    ) -> std::result::Result<bool, StoreError>;

    /// Removes every grant on a target. Returns the number removed.
    async fn revoke_all(&self, target: &GrantTarget) -> std::result::Result<usize, StoreError>;

    /// Returns grants held by an account.
    async fn grants_for_account(
        &self,
        account: &AccountId,
    ) -> std::result::Result<Vec<AccessGrant>, StoreError>;

    /// Returns grants on a target.
    async fn grants_for_target(
        &self,
        target: &GrantTarget,
    ) -> std::result::Result<Vec<AccessGrant>, StoreError>;
}

/// Store interface for share tokens.
#[async_trait]
pub trait ShareTokenStore {
    /// Inserts a token. Returns `false` when the token string is already taken.
    async fn insert_token(&self, token: ShareToken) -> std::result::Result<bool, StoreError>;

    /// Returns a token by record id.
    async fn get_token(
        &self,
        id: &ShareTokenId,
    ) -> std::result::Result<Option<ShareToken>, StoreError>;

    /// Returns a token by its secret string.
    async fn find_by_token(
        &self,
        token: &str,
    ) -> std::result::Result<Option<ShareToken>, StoreError>;

    /// Returns tokens scoped to an album.
    async fn tokens_for_album(
        &self,
        album: &AlbumId,
    ) -> std::result::Result<Vec<ShareToken>, StoreError>;

    /// Updates the edit flag. Returns whether the token existed.
    async fn set_token_can_edit(
        &self,
        id: &ShareTokenId,
        can_edit: bool,
    ) -> std::result::Result<bool, StoreError>;

    /// Deletes a token. Returns whether it existed.
    async fn delete_token(&self, id: &ShareTokenId) -> std::result::Result<bool, StoreError>;
}

/// Store interface for archive jobs.
#[async_trait]
pub trait ArchiveJobStore {
    /// Inserts a job row.
    async fn insert_job(&self, job: ArchiveJob) -> std::result::Result<(), StoreError>;

    /// Returns a job by id.
    async fn get_job(&self, id: &ArchiveJobId)
    -> std::result::Result<Option<ArchiveJob>, StoreError>;

    /// Moves a job from Pending to Ready. Returns `false` if it was not Pending.
    async fn mark_ready(
        &self,
        id: &ArchiveJobId,
        at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError>;

    /// Moves a job from Pending to Failed. Returns `false` if it was not Pending.
    async fn mark_failed(
        &self,
        id: &ArchiveJobId,
        reason: String,
        at: DateTime<Utc>,
    ) -> std::result::Result<bool, StoreError>;

    /// Returns jobs currently in `state`.
    async fn jobs_in_state(&self, state: JobState)
    -> std::result::Result<Vec<ArchiveJob>, StoreError>;
}

/// Persisted progress of in-flight cascading deletes.
#[async_trait]
pub trait CascadeLog {
    /// Inserts or replaces a record.
    async fn save_cascade(&self, record: CascadeRecord) -> std::result::Result<(), StoreError>;

    /// Returns a record by key.
    async fn get_cascade(
        &self,
        key: &CascadeKey,
    ) -> std::result::Result<Option<CascadeRecord>, StoreError>;

    /// Returns every unfinished record.
    async fn pending_cascades(&self) -> std::result::Result<Vec<CascadeRecord>, StoreError>;

    /// Removes a finished record.
    async fn remove_cascade(&self, key: &CascadeKey) -> std::result::Result<(), StoreError>;
}

/// Composite store trait.
pub trait Store:
    AlbumStore
    + MediaStore
    + MembershipStore
    + GrantStore
    + ShareTokenStore
    + ArchiveJobStore
    + CascadeLog
    + Send
    + Sync
{
}

impl<T> Store for T where
    T: AlbumStore
        + MediaStore
        + MembershipStore
        + GrantStore
        + ShareTokenStore
        + ArchiveJobStore
        + CascadeLog
        + Send
        + Sync
{
}
