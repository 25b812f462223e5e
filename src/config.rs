use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the background services.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Capacity of the compression queue.
    pub queue_capacity: usize,
    /// Maximum ids drained per compression cycle.
    pub batch_size: usize,
    /// Time between compression cycles.
    pub compression_interval: Duration,
    /// Length of generated share token strings.
    pub token_length: usize,
    /// Attempts to mint a unique token before giving up.
    pub token_attempts: usize,
    /// Archive builds allowed to run at once.
    pub archive_concurrency: usize,
    /// Program invoked by the ffmpeg compressor.
    pub ffmpeg_program: String,
    /// Root directory for artifact storage.
    pub data_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queue_capacity: 15,
            batch_size: 15,
            compression_interval: Duration::from_secs(60),
            token_length: 32,
            token_attempts: 3,
            archive_concurrency: 4,
            ffmpeg_program: "ffmpeg".to_string(),
            data_root: PathBuf::from("./data"),
        }
    }
}

impl Config {
    /// Compression queue bound, at least 1.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Ids drained per worker cycle, at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Delay between worker cycles.
    pub fn with_compression_interval(mut self, interval: Duration) -> Self {
        self.compression_interval = interval;
        self
    }

    /// Characters per minted share token.
    pub fn with_token_length(mut self, length: usize) -> Self {
        self.token_length = length;
        self
    }

    /// Mint attempts before a collision is reported, at least 1.
    pub fn with_token_attempts(mut self, attempts: usize) -> Self {
        self.token_attempts = attempts.max(1);
        self
    }

    /// Archive builds running at once, at least 1.
    pub fn with_archive_concurrency(mut self, concurrency: usize) -> Self {
        self.archive_concurrency = concurrency.max(1);
        self
    }

    /// Executable invoked for compression.
    pub fn with_ffmpeg_program(mut self, program: impl Into<String>) -> Self {
        self.ffmpeg_program = program.into();
        self
    }

    /// Directory holding the artifact layout.
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = root.into();
        self
    }
}
