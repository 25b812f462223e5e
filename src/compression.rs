//! Bounded compression queue and its single periodic worker.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::MediaFormat;
use crate::store::Store;
use crate::tasks::TaskRegistry;
use crate::types::MediaId;

/// Producer side of the compression queue.
///
/// Enqueueing never blocks and never fails the caller: when the queue is
/// full or the worker is gone the id is dropped and a later read
/// re-enqueues it.
#[derive(Debug, Clone)]
pub struct CompressionQueue {
    sender: mpsc::Sender<MediaId>,
}

impl CompressionQueue {
    /// Creates a queue holding `config.queue_capacity` ids and the receiver
    /// handed to the worker.
    pub fn new(config: &Config) -> (Self, mpsc::Receiver<MediaId>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Returns whether the id was accepted.
    pub fn enqueue(&self, media: MediaId) -> bool {
        match self.sender.try_send(media) {
            Ok(()) => true,
            Err(TrySendError::Full(media)) => {
                tracing::warn!(%media, "compression queue full, dropping");
                false
            }
            Err(TrySendError::Closed(media)) => {
                tracing::warn!(%media, "compression worker stopped, dropping");
                false
            }
        }
    }
}

/// External encoder turning an original into its compressed derivative.
#[async_trait]
pub trait Compressor: Send + Sync {
    /// Writes the compressed rendition of `input` to `output`.
    async fn compress(&self, format: MediaFormat, input: &Path, output: &Path) -> Result<()>;
}

const VIDEO_SCALE: &str =
    "scale='if(gt(iw,1280),1280,trunc(iw/16)*16)':'if(gt(ih,720),720,trunc(ih/16)*16)',fps=30";

fn image_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
    args.extend(["-vf", "scale=720:-1", "-q:v", "6", "-y"].map(OsString::from));
    args.push(output.into());
    args
}

fn video_args(input: &Path, output: &Path, hardware: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into(), "-vf".into(), VIDEO_SCALE.into()];
    if hardware {
        args.extend(["-c:v", "h264_v4l2m2m", "-b:v", "4M"].map(OsString::from));
    } else {
        args.extend(["-c:v", "libx264", "-b:v", "4M", "-preset", "ultrafast"].map(OsString::from));
    }
    args.extend(["-c:a", "copy", "-y"].map(OsString::from));
    args.push(output.into());
    args
}

/// Compressor shelling out to ffmpeg.
///
/// Images are scaled to 720 pixels wide. Videos try the hardware H.264
/// encoder first and fall back to libx264.
#[derive(Debug, Clone)]
pub struct FfmpegCompressor {
    program: String,
}

impl FfmpegCompressor {
    /// Creates a compressor running `config.ffmpeg_program`.
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.ffmpeg_program.clone(),
        }
    }

    async fn run(&self, args: Vec<OsString>) -> Result<()> {
        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(program = %self.program, stderr = %stderr.trim(), "encoder output");
        Err(Error::Compression(format!(
            "{} exited with {}",
            self.program, output.status
        )))
    }
}

impl Default for FfmpegCompressor {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

#[async_trait]
impl Compressor for FfmpegCompressor {
    async fn compress(&self, format: MediaFormat, input: &Path, output: &Path) -> Result<()> {
        if !format.is_video() {
            return self.run(image_args(input, output)).await;
        }
        match self.run(video_args(input, output, true)).await {
            Ok(()) => Ok(()),
            Err(error) => {
                tracing::debug!(%error, "hardware encoder failed, falling back to software");
                self.run(video_args(input, output, false)).await
            }
        }
    }
}

/// Outcome of one compression cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Ids taken off the queue, duplicates included.
    pub drained: usize,
    pub compressed: usize,
    pub failed: usize,
    /// Media deleted before or during compression.
    pub skipped: usize,
}

/// The single consumer of the compression queue.
pub struct CompressionWorker<S> {
    store: Arc<S>,
    artifacts: Arc<dyn ArtifactStore>,
    compressor: Arc<dyn Compressor>,
    receiver: mpsc::Receiver<MediaId>,
    batch_size: usize,
    interval: Duration,
}

impl<S: Store + 'static> CompressionWorker<S> {
    /// Creates the worker draining `receiver` in batches of
    /// `config.batch_size` every `config.compression_interval`.
    pub fn new(
        store: Arc<S>,
        artifacts: Arc<dyn ArtifactStore>,
        compressor: Arc<dyn Compressor>,
        receiver: mpsc::Receiver<MediaId>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            artifacts,
            compressor,
            receiver,
            batch_size: config.batch_size.max(1),
            interval: config.compression_interval,
        }
    }

    fn drain(&mut self, report: &mut CycleReport) -> Vec<MediaId> {
        let mut batch: Vec<MediaId> = Vec::with_capacity(self.batch_size);
        while report.drained < self.batch_size {
            let Ok(media) = self.receiver.try_recv() else {
                break;
            };
            report.drained += 1;
            if !batch.contains(&media) {
                batch.push(media);
            }
        }
        batch
    }

    /// Drains up to one batch without waiting and compresses it in order.
    ///
    /// Failures are logged and not retried within the cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        let batch = self.drain(&mut report);
        for media in batch {
            self.process(&media, &mut report).await;
        }
        if report.drained > 0 {
            tracing::info!(?report, "compression cycle finished");
        }
        report
    }

    async fn process(&self, media: &MediaId, report: &mut CycleReport) {
        let item = match self.store.get_media(media).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                tracing::debug!(%media, "media gone before compression");
                report.skipped += 1;
                return;
            }
            Err(error) => {
                tracing::warn!(%media, %error, "media lookup failed");
                report.failed += 1;
                return;
            }
        };
        let name = item.storage_name.clone();
        let input = self.artifacts.locate(ArtifactKind::Original, &name);
        let output = self.artifacts.locate(ArtifactKind::Compressed, &name);
        if let Err(error) = self.compressor.compress(item.format, &input, &output).await {
            tracing::warn!(%media, %error, "compression failed");
            report.failed += 1;
            return;
        }
        match self.store.set_compressed_name(media, name.clone()).await {
            Ok(true) => report.compressed += 1,
            Ok(false) => {
                tracing::debug!(%media, "media deleted during compression");
                if let Err(error) = self.artifacts.remove(ArtifactKind::Compressed, &name).await {
                    tracing::warn!(%media, %error, "orphaned compressed artifact not removed");
                }
                report.skipped += 1;
            }
            Err(error) => {
                tracing::warn!(%media, %error, "compressed name not recorded");
                report.failed += 1;
            }
        }
    }

    /// Runs a cycle on every tick until the registry shuts down.
    ///
    /// Returns false when the registry is already shutting down.
    pub fn spawn(self, registry: &TaskRegistry) -> bool {
        let interval = self.interval;
        let worker = Arc::new(tokio::sync::Mutex::new(self));
        registry.spawn_interval(interval, move || {
            let worker = Arc::clone(&worker);
            async move {
                worker.lock().await.run_cycle().await;
                true
            }
        })
    }
}
