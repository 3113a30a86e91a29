// Downloader module - acquisition and assembly pipeline

pub mod errors;
pub mod extractors;
pub mod fetcher;
pub mod format_selector;
pub mod models;
pub mod muxer;
pub mod orchestrator;
pub mod staging;
pub mod tools;
pub mod traits;
pub mod utils;

pub use errors::DownloadError;
pub use extractors::YtDlpExtractor;
pub use fetcher::{HttpFetcher, Transfer};
pub use format_selector::FormatChoice;
pub use models::{DownloadMode, MediaItem, NetworkConfig, Role, TransferProgress};
pub use muxer::FfmpegMuxer;
pub use orchestrator::{ItemOutcome, Pipeline, RunSummary};
pub use tools::{ToolManager, ToolType};
pub use traits::{MetadataSource, Muxer, ProgressObserver, PromptScope, Prompter, Stage, StreamFetcher};
