//! Authorization and background processing core of a multi-tenant media store.
//!
//! Every request is checked by a table-driven [`CapabilityResolver`] that
//! decides whether an [`Actor`] (an account, a share token holder, or both)
//! may perform an [`Operation`] on a [`Target`]. The default behavior is
//! deny-by-default and every lookup error fails closed.
//!
//! Around the resolver sit the services that mutate state:
//! [`LifecycleCoordinator`] (albums, grants, resumable cascading deletes),
//! [`ShareTokenService`], [`MediaService`] with its [`CompressionQueue`] and
//! single [`CompressionWorker`], and [`ArchiveJobService`] building zip
//! archives in tasks supervised by a [`TaskRegistry`].
//!
//! # Examples
//!
//! Owner creates an album and shares it read-only (enable `memory-store`):
//! ```no_run
//! # #[cfg(feature = "memory-store")]
//! # async fn demo() -> rs_mediastore::Result<()> {
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use rs_mediastore::{
//!     AccountId, Actor, CapabilityResolver, Config, LifecycleCoordinator, LocalArtifactStore,
//!     MemoryStore, ShareTokenService,
//! };
//! let config = Config::default();
//! let store = Arc::new(MemoryStore::new());
//! let artifacts = Arc::new(LocalArtifactStore::from_config(&config).await?);
//! let resolver = CapabilityResolver::new(store);
//! let lifecycle = LifecycleCoordinator::new(resolver.clone(), artifacts);
//! let tokens = ShareTokenService::new(resolver.clone(), &config);
//!
//! let owner = Actor::account(AccountId::try_from("owner_1")?);
//! let album = lifecycle.create_album(&owner, "Summer", "").await?;
//! let token = tokens
//!     .create(&owner, &album.id, Utc::now() + Duration::days(7), false)
//!     .await?;
//! let guest = Actor::token(token);
//! assert!(resolver.can_view_album(&guest, &album.id).await);
//! assert!(!resolver.can_edit_album(&guest, &album.id).await);
//! # Ok(())
//! # }
//! ```
#![forbid(unsafe_code)]

mod archive;
mod artifacts;
mod compression;
mod config;
mod error;
mod lifecycle;
mod media;
mod metadata;
mod model;
mod operation;
mod resolver;
mod store;
mod tasks;
mod token;
mod types;

#[cfg(feature = "memory-store")]
mod memory_store;

#[cfg(feature = "axum")]
pub mod axum;

pub use crate::archive::{
    ArchiveJobService, ArchiveSummary, BuiltArchive, build_archive, write_archive,
};
pub use crate::artifacts::{ArtifactKind, ArtifactStore, LocalArtifactStore};
pub use crate::compression::{
    CompressionQueue, CompressionWorker, Compressor, CycleReport, FfmpegCompressor,
};
pub use crate::config::Config;
pub use crate::error::{Error, Result, StoreError};
pub use crate::lifecycle::{
    CascadeKey, CascadeRecord, CascadeReport, CascadeStep, LifecycleCoordinator,
};
pub use crate::media::{MediaData, MediaService, Variant};
pub use crate::metadata::{GeoLocation, MediaMetadata, read_metadata};
pub use crate::model::{
    AccessGrant, Actor, Album, ArchiveJob, GrantTarget, JobState, MediaFormat, MediaItem,
    MediaLink, Origin, ShareToken, Sniffed,
};
pub use crate::operation::{Action, Operation, ResourceKind, Target};
pub use crate::resolver::{
    AlbumAccess, AlbumOwner, AnyAccount, ArchiveInitiator, CapabilityResolver, Decision,
    MediaAccess, MediaOwner, MediaUpload, Policy, ResolverBuilder, TokenIssuer,
};
pub use crate::store::{
    AlbumStore, ArchiveJobStore, CascadeLog, GrantStore, MediaStore, MembershipStore,
    ShareTokenStore, Store,
};
pub use crate::tasks::TaskRegistry;
pub use crate::token::{ShareTokenService, generate_token};
pub use crate::types::{AccountId, AlbumId, ArchiveJobId, MediaId, ShareTokenId};

#[cfg(feature = "memory-store")]
pub use crate::memory_store::MemoryStore;
