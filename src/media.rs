//! Uploads, reads and album membership of media items.

use std::io::BufReader;
use std::sync::Arc;

use chrono::Utc;

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::compression::CompressionQueue;
use crate::error::{Error, Result};
use crate::metadata::{MediaMetadata, read_metadata};
use crate::model::{AccessGrant, Actor, GrantTarget, MediaFormat, MediaItem, MediaLink, Sniffed};
use crate::operation::{Operation, ResourceKind, Target};
use crate::resolver::CapabilityResolver;
use crate::store::Store;
use crate::types::{AccountId, AlbumId, MediaId};

/// Which rendition of a media item to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Variant {
    Original,
    Compressed,
}

/// Bytes returned by [`MediaService::read`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaData {
    pub bytes: Vec<u8>,
    /// Rendition actually served; may differ from the one requested.
    pub served: Variant,
    pub format: MediaFormat,
    pub file_name: String,
}

/// Uploads, reads and album membership of media items.
pub struct MediaService<S> {
    resolver: CapabilityResolver<S>,
    artifacts: Arc<dyn ArtifactStore>,
    queue: CompressionQueue,
}

impl<S> Clone for MediaService<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            artifacts: Arc::clone(&self.artifacts),
            queue: self.queue.clone(),
        }
    }
}

impl<S: Store + 'static> MediaService<S> {
    /// Creates a service queueing new uploads on `queue` for compression.
    pub fn new(
        resolver: CapabilityResolver<S>,
        artifacts: Arc<dyn ArtifactStore>,
        queue: CompressionQueue,
    ) -> Self {
        Self {
            resolver,
            artifacts,
            queue,
        }
    }

    fn store(&self) -> &S {
        self.resolver.store()
    }

    async fn require_album(&self, album: &AlbumId) -> Result<()> {
        match self.store().get_album(album).await? {
            Some(_) => Ok(()),
            None => Err(Error::not_found("album", album)),
        }
    }

    async fn existing(&self, media: &MediaId) -> Result<MediaItem> {
        self.store()
            .get_media(media)
            .await?
            .ok_or_else(|| Error::not_found("media", media))
    }

    /// Stores an upload and queues it for compression.
    ///
    /// Uploads through a share token land in the token's album when no album
    /// is given. Compression is best effort and never fails the upload.
    pub async fn upload(
        &self,
        actor: &Actor,
        file_name: &str,
        bytes: &[u8],
        album: Option<&AlbumId>,
    ) -> Result<MediaItem> {
        let collection = Target::Collection(ResourceKind::Media);
        self.resolver
            .require(actor, Operation::CREATE_MEDIA, &collection)
            .await?;
        let album = album.cloned().or_else(|| match (&actor.account, &actor.token) {
            (None, Some(token)) => Some(token.album.clone()),
            _ => None,
        });
        if let Some(album) = &album {
            self.require_album(album).await?;
            self.resolver
                .require(actor, Operation::EDIT_ALBUM, &Target::Album(album.clone()))
                .await?;
        }

        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(Error::Validation("file name must not be empty".into()));
        }
        let format = match MediaFormat::sniff(bytes) {
            Sniffed::Supported(format) => format,
            Sniffed::Unsupported(mime) => {
                return Err(Error::Validation(format!("unsupported media type {mime}")));
            }
            Sniffed::Unknown => {
                return Err(Error::Validation("unrecognised media type".into()));
            }
        };
        let origin = actor.origin().ok_or(Error::Denied {
            operation: Operation::CREATE_MEDIA,
            target: collection,
        })?;

        let id = MediaId::generate();
        let storage_name = format!("{id}.{}", format.extension());
        self.artifacts
            .put(ArtifactKind::Original, &storage_name, bytes)
            .await?;
        let item = MediaItem {
            id: id.clone(),
            original_file_name: file_name.to_string(),
            storage_name: storage_name.clone(),
            compressed_name: None,
            format,
            uploaded_by: origin.clone(),
            uploaded_at: Utc::now(),
        };
        if let Err(error) = self.store().insert_media(item.clone()).await {
            if let Err(cleanup) = self.artifacts.remove(ArtifactKind::Original, &storage_name).await {
                tracing::warn!(media = %id, error = %cleanup, "orphaned upload not removed");
            }
            return Err(error.into());
        }
        if let Some(account) = &actor.account {
            self.store()
                .upsert_grant(AccessGrant::new(
                    account.clone(),
                    GrantTarget::Media(id.clone()),
                    true,
                ))
                .await?;
        }
        if let Some(album) = album {
            self.store()
                .link_media(MediaLink {
                    album,
                    media: id.clone(),
                    added_by: origin,
                    added_at: Utc::now(),
                })
                .await?;
        }
        tracing::info!(media = %id, format = format.extension(), "media uploaded");
        self.queue.enqueue(id);
        Ok(item)
    }

    /// Media row, visible to anyone holding `media:view`.
    pub async fn get(&self, actor: &Actor, media: &MediaId) -> Result<MediaItem> {
        let item = self.existing(media).await?;
        self.resolver
            .require(actor, Operation::VIEW_MEDIA, &Target::Media(media.clone()))
            .await?;
        Ok(item)
    }

    /// Media uploaded by `account`; only that account may list them.
    pub async fn list_uploaded_by(&self, actor: &Actor, account: &AccountId) -> Result<Vec<MediaItem>> {
        if actor.account.as_ref() != Some(account) {
            return Err(Error::Denied {
                operation: Operation::VIEW_MEDIA,
                target: Target::Collection(ResourceKind::Media),
            });
        }
        Ok(self.store().list_uploaded_by(account).await?)
    }

    /// Media linked into the album, in link order.
    pub async fn list_album_media(&self, actor: &Actor, album: &AlbumId) -> Result<Vec<MediaItem>> {
        self.require_album(album).await?;
        self.resolver
            .require(actor, Operation::VIEW_ALBUM, &Target::Album(album.clone()))
            .await?;
        let mut items = Vec::new();
        for media in self.store().album_media(album).await? {
            if let Some(item) = self.store().get_media(&media).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Reads a rendition.
    ///
    /// A compressed read before the derivative exists serves the original
    /// and queues the item again.
    pub async fn read(&self, actor: &Actor, media: &MediaId, variant: Variant) -> Result<MediaData> {
        let item = self.get(actor, media).await?;
        let data = |bytes, served| MediaData {
            bytes,
            served,
            format: item.format,
            file_name: item.original_file_name.clone(),
        };
        if variant == Variant::Compressed {
            match &item.compressed_name {
                Some(name) => match self.artifacts.get(ArtifactKind::Compressed, name).await {
                    Ok(bytes) => return Ok(data(bytes, Variant::Compressed)),
                    Err(error) if error.is_not_found() => {
                        tracing::debug!(%media, "compressed artifact missing, serving original");
                        self.queue.enqueue(media.clone());
                    }
                    Err(error) => return Err(error),
                },
                None => {
                    self.queue.enqueue(media.clone());
                }
            }
        }
        let bytes = self
            .artifacts
            .get(ArtifactKind::Original, &item.storage_name)
            .await?;
        Ok(data(bytes, Variant::Original))
    }

    /// EXIF metadata of the original.
    ///
    /// Fails with `NotFound` when the original carries none.
    pub async fn metadata(&self, actor: &Actor, media: &MediaId) -> Result<MediaMetadata> {
        let item = self.get(actor, media).await?;
        let artifacts = Arc::clone(&self.artifacts);
        let found = tokio::task::spawn_blocking(move || {
            let file = artifacts.open_blocking(ArtifactKind::Original, &item.storage_name)?;
            read_metadata(&mut BufReader::new(file))
        })
        .await
        .map_err(|error| Error::Io(std::io::Error::other(error)))??;
        found.ok_or_else(|| Error::not_found("metadata", media))
    }

    /// Links an existing, visible media item into an album.
    pub async fn add_to_album(&self, actor: &Actor, album: &AlbumId, media: &MediaId) -> Result<()> {
        self.require_album(album).await?;
        self.existing(media).await?;
        self.resolver
            .require(actor, Operation::EDIT_ALBUM, &Target::Album(album.clone()))
            .await?;
        self.resolver
            .require(actor, Operation::VIEW_MEDIA, &Target::Media(media.clone()))
            .await?;
        let added_by = actor.origin().ok_or(Error::Denied {
            operation: Operation::EDIT_ALBUM,
            target: Target::Album(album.clone()),
        })?;
        self.store()
            .link_media(MediaLink {
                album: album.clone(),
                media: media.clone(),
                added_by,
                added_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Unlinks a media item from an album. The item itself survives.
    pub async fn remove_from_album(
        &self,
        actor: &Actor,
        album: &AlbumId,
        media: &MediaId,
    ) -> Result<bool> {
        self.require_album(album).await?;
        self.resolver
            .require(actor, Operation::EDIT_ALBUM, &Target::Album(album.clone()))
            .await?;
        Ok(self.store().unlink_media(album, media).await?)
    }
}
