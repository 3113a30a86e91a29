// Seams of the pipeline: every external collaborator sits behind a trait

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::errors::DownloadError;
use super::fetcher::{ByteStream, Transfer};
use super::format_selector::FormatChoice;
use super::models::{Collection, DownloadMode, MediaItem, Resolution, Role, Selector, TransferProgress};

/// Metadata lookup and collection resolution
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Name of the source (for logging)
    fn name(&self) -> &'static str;

    /// Decide whether a locator names a collection or a single item
    async fn resolve(&self, locator: &str) -> Result<Resolution, DownloadError>;

    /// Look up one item with its stream descriptors
    async fn lookup(&self, locator: &str) -> Result<MediaItem, DownloadError>;
}

/// Opens one network transfer for one stream of an item
#[async_trait]
pub trait StreamFetcher: Send + Sync {
    async fn open(&self, item: &MediaItem, selector: &Selector) -> Result<Transfer, DownloadError>;
}

/// Combines or encodes fetched streams into the final artifact
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Lossless remux of a video-only and an audio-only file
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), DownloadError>;

    /// Encode a live audio byte stream to MP3 at the fixed bitrate
    async fn transcode_audio(&self, input: ByteStream, output: &Path) -> Result<(), DownloadError>;
}

/// Where a decision applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptScope {
    /// Once, for every item of a collection
    Collection,
    /// For the current item only
    Item,
}

/// Source of user decisions
pub trait Prompter: Send + Sync {
    fn choose_mode(&self, scope: PromptScope) -> Result<DownloadMode, DownloadError>;

    fn choose_video_format(
        &self,
        choices: &[FormatChoice],
        scope: PromptScope,
    ) -> Result<FormatChoice, DownloadError>;

    fn choose_output_dir(&self, scope: PromptScope) -> Result<PathBuf, DownloadError>;
}

/// Pipeline stage reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Downloading,
    Merging,
    Encoding,
}

/// Receives progress and lifecycle events; all methods but progress are optional
pub trait ProgressObserver: Send + Sync {
    /// A chunk arrived on the transfer of `role`
    fn on_progress(&self, role: Role, progress: TransferProgress);

    /// The transfer of `role` ended; called once per transfer
    fn on_finish(&self, _role: Role, _ok: bool) {}

    fn on_collection(&self, _collection: &Collection) {}

    fn on_item(&self, _item: &MediaItem) {}

    fn on_stage(&self, _stage: Stage, _title: &str) {}

    /// An item ended in failure; the run goes on
    fn on_item_failed(&self, _locator: &str, _title: Option<&str>, _error: &DownloadError) {}
}

/// Observer that ignores everything
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_progress(&self, _role: Role, _progress: TransferProgress) {}
}
