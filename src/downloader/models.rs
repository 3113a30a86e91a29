// Common data models for the download pipeline

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1_048_576.0;

/// One playable item, as reported by the metadata lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    /// Locator the item was looked up with
    pub locator: String,
    pub id: String,
    pub title: String,
    pub duration_secs: u64,
    pub author: String,
    pub view_count: Option<u64>,
    pub formats: Vec<StreamDescriptor>,
}

/// One encoded stream of an item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Selector handle (e.g., "137", "140")
    pub format_id: String,
    /// Container / file extension (mp4, webm, m4a)
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    /// Vertical resolution, the quality rank of video streams
    pub height: Option<u32>,
    /// Quality label (e.g., "1080p")
    pub quality_label: Option<String>,
    /// Video codec (avc1, vp9, av01)
    pub vcodec: Option<String>,
    /// Audio codec (mp4a, opus)
    pub acodec: Option<String>,
    /// Audio bitrate in kbps
    pub audio_bitrate: Option<f32>,
    /// Declared byte length
    pub content_length: Option<u64>,
    /// Direct transfer URL
    pub url: String,
    /// Headers the transfer URL expects
    #[serde(default)]
    pub http_headers: BTreeMap<String, String>,
}

impl StreamDescriptor {
    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Check if format is H.264 (avc1)
    pub fn is_h264(&self) -> bool {
        self.vcodec
            .as_ref()
            .map_or(false, |v| v.starts_with("avc1"))
    }

    /// Check if audio is AAC (m4a)
    pub fn is_aac(&self) -> bool {
        self.acodec
            .as_ref()
            .map_or(false, |a| a.starts_with("mp4a"))
    }

    /// Quality label, derived from the height when the source gave none
    pub fn display_quality(&self) -> String {
        match (&self.quality_label, self.height) {
            (Some(label), _) => label.clone(),
            (None, Some(h)) => format!("{}p", h),
            (None, None) => self.format_id.clone(),
        }
    }

    pub fn size_mb(&self) -> Option<f64> {
        self.content_length.map(|b| b as f64 / BYTES_PER_MB)
    }
}

/// Identifies exactly one stream of an item for retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// An explicit format id
    Format(String),
    /// Whatever the catalog ranks as the best audio-only stream
    BestAudio,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(id) => write!(f, "format {}", id),
            Self::BestAudio => write!(f, "best audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadMode {
    Video,
    AudioOnly,
}

impl DownloadMode {
    /// Extension of the final artifact
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::AudioOnly => "mp3",
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "Video"),
            Self::AudioOnly => write!(f, "Audio Only"),
        }
    }
}

/// Which half of a download a stream serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Video,
    Audio,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    /// Suffix of the staged file for this role
    pub fn temp_suffix(&self) -> &'static str {
        match self {
            Self::Video => "_video.tmp.mp4",
            Self::Audio => "_audio.tmp.mp4",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one transfer; `received` never decreases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub received: u64,
    pub total: Option<u64>,
}

impl TransferProgress {
    /// Percentage 0-100, undefined while the total is unknown
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) | None => None,
            Some(total) => Some((self.received as f64 / total as f64) * 100.0),
        }
    }

    pub fn received_mb(&self) -> f64 {
        self.received as f64 / BYTES_PER_MB
    }
}

/// Video quality fixed once for a whole collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoChoice {
    pub format_id: String,
    pub height: Option<u32>,
    pub label: String,
}

/// Choices made upfront for a collection and reused for every item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPolicy {
    pub mode: DownloadMode,
    pub video: Option<VideoChoice>,
    pub output_dir: PathBuf,
}

/// An ordered list of item locators grouped under one reference
#[derive(Debug, Clone)]
pub struct Collection {
    pub title: String,
    pub items: Vec<String>,
}

/// Outcome of resolving an input locator
#[derive(Debug, Clone)]
pub enum Resolution {
    Collection(Collection),
    SingleItem(String),
}

/// Network configuration for metadata lookup and transfers
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Timeout in seconds
    pub timeout: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(30),
        }
    }
}
