//! Filesystem storage for media originals, compressed derivatives and archives.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::config::Config;
use crate::error::{Error, Result};

/// Which directory an artifact lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ArtifactKind {
    Original,
    Compressed,
    Archive,
}

impl ArtifactKind {
    fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Original => "originals",
            ArtifactKind::Compressed => "compressed",
            ArtifactKind::Archive => "archives",
        }
    }
}

/// Artifact storage keyed by generated file names.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes an artifact, replacing any previous content.
    async fn put(&self, kind: ArtifactKind, name: &str, data: &[u8]) -> Result<()>;

    /// Reads an artifact.
    ///
    /// Returns `Error::NotFound` if the file doesn't exist.
    async fn get(&self, kind: ArtifactKind, name: &str) -> Result<Vec<u8>>;

    /// Opens an artifact for streaming reads.
    ///
    /// Returns `Error::NotFound` if the file doesn't exist.
    async fn open(&self, kind: ArtifactKind, name: &str) -> Result<fs::File>;

    /// Blocking variant of [`ArtifactStore::open`] for use on blocking threads.
    fn open_blocking(&self, kind: ArtifactKind, name: &str) -> Result<std::fs::File>;

    /// Creates (or truncates) an artifact for blocking writes.
    fn create_blocking(&self, kind: ArtifactKind, name: &str) -> Result<std::fs::File>;

    /// Removes an artifact. Returns `Ok(false)` if it was already absent.
    async fn remove(&self, kind: ArtifactKind, name: &str) -> Result<bool>;

    /// Filesystem location handed to external tools.
    fn locate(&self, kind: ArtifactKind, name: &str) -> PathBuf;
}

/// Local filesystem storage
///
/// Structure: `{root}/originals`, `{root}/compressed`, `{root}/archives`.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Create storage at the given root directory
    ///
    /// Creates the directory structure if it doesn't exist.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for kind in [
            ArtifactKind::Original,
            ArtifactKind::Compressed,
            ArtifactKind::Archive,
        ] {
            fs::create_dir_all(root.join(kind.dir_name())).await?;
        }
        Ok(Self { root })
    }

    /// Create storage under `config.data_root`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.data_root).await
    }

    /// Root directory of the layout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one kind of artifact.
    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }
}

fn checked_name(name: &str) -> Result<&str> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        return Err(Error::Validation(format!("invalid artifact name `{name}`")));
    }
    Ok(name)
}

fn missing_as_not_found(error: std::io::Error, name: &str) -> Error {
    if error.kind() == std::io::ErrorKind::NotFound {
        Error::not_found("artifact", name)
    } else {
        error.into()
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, kind: ArtifactKind, name: &str, data: &[u8]) -> Result<()> {
        let path = self.dir(kind).join(checked_name(name)?);
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn get(&self, kind: ArtifactKind, name: &str) -> Result<Vec<u8>> {
        let path = self.dir(kind).join(checked_name(name)?);
        fs::read(&path)
            .await
            .map_err(|e| missing_as_not_found(e, name))
    }

    async fn open(&self, kind: ArtifactKind, name: &str) -> Result<fs::File> {
        let path = self.dir(kind).join(checked_name(name)?);
        fs::File::open(&path)
            .await
            .map_err(|e| missing_as_not_found(e, name))
    }

    fn open_blocking(&self, kind: ArtifactKind, name: &str) -> Result<std::fs::File> {
        let path = self.dir(kind).join(checked_name(name)?);
        std::fs::File::open(&path).map_err(|e| missing_as_not_found(e, name))
    }

    fn create_blocking(&self, kind: ArtifactKind, name: &str) -> Result<std::fs::File> {
        let path = self.dir(kind).join(checked_name(name)?);
        Ok(std::fs::File::create(&path)?)
    }

    async fn remove(&self, kind: ArtifactKind, name: &str) -> Result<bool> {
        let path = self.dir(kind).join(checked_name(name)?);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn locate(&self, kind: ArtifactKind, name: &str) -> PathBuf {
        self.dir(kind).join(name)
    }
}
