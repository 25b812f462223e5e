//! Asynchronous zip builds of album snapshots.

use std::collections::HashSet;
use std::io::{self, Cursor, Seek, Write};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::File;
use tokio::sync::Semaphore;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Actor, ArchiveJob, JobState, MediaItem};
use crate::operation::{Operation, Target};
use crate::resolver::CapabilityResolver;
use crate::store::Store;
use crate::tasks::TaskRegistry;
use crate::types::{AlbumId, ArchiveJobId};

/// Entry counts of a written archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    /// Items whose original could not be opened.
    pub skipped: usize,
}

/// In-memory result of [`build_archive`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuiltArchive {
    pub bytes: Vec<u8>,
    pub summary: ArchiveSummary,
}

fn entry_name(taken: &mut HashSet<String>, file_name: &str) -> String {
    let clean: String = file_name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    if taken.insert(clean.clone()) {
        return clean;
    }
    let (stem, ext) = match clean.rfind('.') {
        Some(dot) if dot > 0 => clean.split_at(dot),
        _ => (clean.as_str(), ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{stem}_{n}{ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Streams the originals of `snapshot`, in order, into a zip written to `sink`.
///
/// Blocking: each original is copied from its file into the writer, so memory
/// use does not grow with the size of the album. Entries are stored
/// uncompressed with a fixed timestamp, so the same snapshot always produces
/// the same bytes. Originals that cannot be opened are logged and skipped.
pub fn write_archive<W: Write + Seek>(
    artifacts: &dyn ArtifactStore,
    snapshot: &[MediaItem],
    sink: W,
) -> Result<(W, ArchiveSummary)> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default());
    let mut writer = ZipWriter::new(sink);
    let mut taken = HashSet::new();
    let mut summary = ArchiveSummary::default();
    for item in snapshot {
        let mut source = match artifacts.open_blocking(ArtifactKind::Original, &item.storage_name) {
            Ok(file) => file,
            Err(error) => {
                tracing::warn!(media = %item.id, %error, "original unreadable, left out of archive");
                summary.skipped += 1;
                continue;
            }
        };
        writer.start_file(entry_name(&mut taken, &item.original_file_name), options)?;
        io::copy(&mut source, &mut writer)?;
        summary.entries += 1;
    }
    Ok((writer.finish()?, summary))
}

/// Builds the archive of `snapshot` in memory.
///
/// Produces the same bytes as a job build of the same snapshot.
pub fn build_archive(artifacts: &dyn ArtifactStore, snapshot: &[MediaItem]) -> Result<BuiltArchive> {
    let (cursor, summary) = write_archive(artifacts, snapshot, Cursor::new(Vec::new()))?;
    Ok(BuiltArchive {
        bytes: cursor.into_inner(),
        summary,
    })
}

/// Starts archive builds and serves their results to the initiator.
pub struct ArchiveJobService<S> {
    resolver: CapabilityResolver<S>,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<TaskRegistry>,
    permits: Arc<Semaphore>,
}

impl<S> Clone for ArchiveJobService<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            artifacts: Arc::clone(&self.artifacts),
            registry: Arc::clone(&self.registry),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<S: Store + 'static> ArchiveJobService<S> {
    /// Creates a service running at most `config.archive_concurrency` builds at once.
    pub fn new(
        resolver: CapabilityResolver<S>,
        artifacts: Arc<dyn ArtifactStore>,
        registry: Arc<TaskRegistry>,
        config: &Config,
    ) -> Self {
        Self {
            resolver,
            artifacts,
            registry,
            permits: Arc::new(Semaphore::new(config.archive_concurrency.max(1))),
        }
    }

    fn store(&self) -> &S {
        self.resolver.store()
    }

    /// Starts a build of the album's current media and returns at once.
    pub async fn init_job(&self, actor: &Actor, album: &AlbumId) -> Result<ArchiveJobId> {
        let Some(row) = self.store().get_album(album).await? else {
            return Err(Error::not_found("album", album));
        };
        self.resolver
            .require(actor, Operation::VIEW_ALBUM, &Target::Album(album.clone()))
            .await?;
        let initiator = actor.origin().ok_or(Error::Denied {
            operation: Operation::VIEW_ALBUM,
            target: Target::Album(album.clone()),
        })?;

        let mut snapshot = Vec::new();
        for media in self.store().album_media(album).await? {
            if let Some(item) = self.store().get_media(&media).await? {
                snapshot.push(item);
            }
        }

        let id = ArchiveJobId::generate();
        let job = ArchiveJob {
            id: id.clone(),
            album: album.clone(),
            title: row.title,
            initiator,
            state: JobState::Pending,
            artifact_name: format!("{id}.zip"),
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
        };
        self.store().insert_job(job.clone()).await?;
        tracing::info!(job = %id, %album, items = snapshot.len(), "archive job created");

        let task = build_task(
            Arc::clone(self.resolver.store()),
            Arc::clone(&self.artifacts),
            Arc::clone(&self.permits),
            job,
            snapshot,
        );
        if !self.registry.spawn_job(id.clone(), task) {
            self.store()
                .mark_failed(&id, "service shutting down".into(), Utc::now())
                .await?;
        }
        Ok(id)
    }

    async fn existing(&self, id: &ArchiveJobId) -> Result<ArchiveJob> {
        self.store()
            .get_job(id)
            .await?
            .ok_or_else(|| Error::not_found("archive job", id))
    }

    /// Job status, visible to the initiator.
    pub async fn get_job(&self, actor: &Actor, id: &ArchiveJobId) -> Result<ArchiveJob> {
        let job = self.existing(id).await?;
        self.resolver
            .require(actor, Operation::VIEW_ARCHIVE, &Target::ArchiveJob(id.clone()))
            .await?;
        Ok(job)
    }

    /// Opens the archive for streaming once the job is Ready.
    pub async fn get_data(&self, actor: &Actor, id: &ArchiveJobId) -> Result<File> {
        let job = self.existing(id).await?;
        self.resolver
            .require(actor, Operation::CONSUME_ARCHIVE, &Target::ArchiveJob(id.clone()))
            .await?;
        match job.state {
            JobState::Pending => Err(Error::NotReady(job.id)),
            JobState::Failed => Err(Error::ArchiveFailed {
                id: job.id,
                reason: job.failure.unwrap_or_default(),
            }),
            JobState::Ready => {
                self.artifacts
                    .open(ArtifactKind::Archive, &job.artifact_name)
                    .await
            }
        }
    }

    /// Fails Pending jobs that have no live build task, e.g. after a restart.
    pub async fn recover_orphans(&self) -> Result<Vec<ArchiveJobId>> {
        let mut recovered = Vec::new();
        for job in self.store().jobs_in_state(JobState::Pending).await? {
            if self.registry.is_running(&job.id) {
                continue;
            }
            if self
                .store()
                .mark_failed(&job.id, "build task lost".into(), Utc::now())
                .await?
            {
                tracing::warn!(job = %job.id, "orphaned archive job failed");
                recovered.push(job.id);
            }
        }
        Ok(recovered)
    }

    /// Shuts the task registry down and fails every build it aborted.
    pub async fn shutdown(&self) -> Result<Vec<ArchiveJobId>> {
        let mut failed = Vec::new();
        for id in self.registry.shutdown().await {
            if self
                .store()
                .mark_failed(&id, "aborted by shutdown".into(), Utc::now())
                .await?
            {
                failed.push(id);
            }
        }
        failed.extend(self.recover_orphans().await?);
        Ok(failed)
    }
}

async fn build_task<S: Store + 'static>(
    store: Arc<S>,
    artifacts: Arc<dyn ArtifactStore>,
    permits: Arc<Semaphore>,
    job: ArchiveJob,
    snapshot: Vec<MediaItem>,
) {
    let outcome = async {
        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|_| Error::InvalidOperation("archive limiter closed".into()))?;
        let name = job.artifact_name.clone();
        let writer = Arc::clone(&artifacts);
        tokio::task::spawn_blocking(move || {
            let file = writer.create_blocking(ArtifactKind::Archive, &name)?;
            let (file, summary) = write_archive(writer.as_ref(), &snapshot, file)?;
            file.sync_all()?;
            Ok::<_, Error>(summary)
        })
        .await
        .map_err(|error| Error::Io(io::Error::other(error)))?
    }
    .await;

    match outcome {
        Ok(summary) => match store.mark_ready(&job.id, Utc::now()).await {
            Ok(true) => tracing::info!(
                job = %job.id,
                entries = summary.entries,
                skipped = summary.skipped,
                "archive ready"
            ),
            Ok(false) => tracing::warn!(job = %job.id, "archive job no longer pending"),
            Err(error) => tracing::error!(job = %job.id, %error, "archive not marked ready"),
        },
        Err(error) => {
            tracing::error!(job = %job.id, %error, "archive build failed");
            if let Err(remove_error) = artifacts.remove(ArtifactKind::Archive, &job.artifact_name).await {
                tracing::warn!(job = %job.id, error = %remove_error, "partial archive not removed");
            }
            if let Err(mark_error) = store.mark_failed(&job.id, error.to_string(), Utc::now()).await {
                tracing::error!(job = %job.id, error = %mark_error, "archive not marked failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_names_are_deduplicated_and_flattened() {
        let mut taken = HashSet::new();
        assert_eq!(entry_name(&mut taken, "a.jpg"), "a.jpg");
        assert_eq!(entry_name(&mut taken, "a.jpg"), "a_1.jpg");
        assert_eq!(entry_name(&mut taken, "a.jpg"), "a_2.jpg");
        assert_eq!(entry_name(&mut taken, "../x/b.png"), ".._x_b.png");
        assert_eq!(entry_name(&mut taken, ".hidden"), ".hidden");
        assert_eq!(entry_name(&mut taken, ".hidden"), ".hidden_1");
    }
}
