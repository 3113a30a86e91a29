// yt-dlp metadata source - uses the native `yt-dlp` binary
//
// yt-dlp does the page parsing and signature work; this side only reads its
// JSON. Item lookups use --dump-json, collections use --flat-playlist so that
// only the entry list is fetched.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{Collection, MediaItem, NetworkConfig, Resolution, StreamDescriptor};
use crate::downloader::traits::MetadataSource;
use crate::downloader::utils::{get_proxy_args, get_timeout_args, run_output_with_timeout};

/// Upper bound for one yt-dlp invocation; playlists can be long
const LOOKUP_TIMEOUT_SECS: u64 = 120;

/// Metadata source backed by the yt-dlp binary
pub struct YtDlpExtractor {
    ytdlp_path: PathBuf,
    network: NetworkConfig,
}

impl YtDlpExtractor {
    pub fn new(ytdlp_path: PathBuf, network: NetworkConfig) -> Self {
        Self { ytdlp_path, network }
    }

    /// Build command arguments shared by every call
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "--no-warnings".to_string(),
            "--no-progress".to_string(),
            "--retries".to_string(),
            "2".to_string(),
        ];
        args.extend(get_timeout_args(&self.network));
        args.extend(get_proxy_args(&self.network));
        args
    }

    async fn run_json(&self, mut args: Vec<String>) -> Result<Value, DownloadError> {
        let mut full = self.base_args();
        full.append(&mut args);
        tracing::debug!(ytdlp = %self.ytdlp_path.display(), args = %full.join(" "), "running yt-dlp");

        let output = run_output_with_timeout(&self.ytdlp_path, full, LOOKUP_TIMEOUT_SECS).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!(%stderr, "yt-dlp failed");
            return Err(DownloadError::from_tool_stderr(&stderr));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))
    }
}

#[async_trait]
impl MetadataSource for YtDlpExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve(&self, locator: &str) -> Result<Resolution, DownloadError> {
        if !names_collection(locator)? {
            return Ok(Resolution::SingleItem(locator.to_string()));
        }

        let json = self
            .run_json(vec![
                "--flat-playlist".to_string(),
                "--yes-playlist".to_string(),
                "--dump-single-json".to_string(),
                locator.to_string(),
            ])
            .await?;

        Ok(parse_collection(&json).map_or_else(
            || Resolution::SingleItem(locator.to_string()),
            Resolution::Collection,
        ))
    }

    async fn lookup(&self, locator: &str) -> Result<MediaItem, DownloadError> {
        let json = self
            .run_json(vec![
                "--dump-json".to_string(),
                "--no-playlist".to_string(),
                locator.to_string(),
            ])
            .await?;

        parse_item(locator, &json)
    }
}

/// Whether a locator points at a collection. Unparseable input is an error,
/// never silently a single item.
pub fn names_collection(locator: &str) -> Result<bool, DownloadError> {
    let url = Url::parse(locator.trim())
        .map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", locator, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidUrl(format!(
            "{}: unsupported scheme {}",
            locator,
            url.scheme()
        )));
    }

    let has_list = url.query_pairs().any(|(k, v)| k == "list" && !v.is_empty());
    Ok(has_list || url.path().trim_end_matches('/') == "/playlist")
}

/// Entry list of a flat playlist dump; `None` when the dump is a single item
pub fn parse_collection(json: &Value) -> Option<Collection> {
    if json["_type"].as_str() != Some("playlist") {
        return None;
    }

    let items = json["entries"]
        .as_array()
        .map(|entries| entries.iter().filter_map(entry_locator).collect())
        .unwrap_or_default();

    Some(Collection {
        title: json["title"].as_str().unwrap_or("Untitled playlist").to_string(),
        items,
    })
}

fn entry_locator(entry: &Value) -> Option<String> {
    if let Some(url) = entry["url"].as_str().filter(|u| u.starts_with("http")) {
        return Some(url.to_string());
    }
    entry["id"]
        .as_str()
        .map(|id| format!("https://www.youtube.com/watch?v={}", id))
}

/// Parse a --dump-json item
pub fn parse_item(locator: &str, json: &Value) -> Result<MediaItem, DownloadError> {
    let formats_array = json["formats"]
        .as_array()
        .ok_or_else(|| DownloadError::ParseError("No formats array in JSON".to_string()))?;

    let formats = formats_array.iter().filter_map(parse_format).collect();

    Ok(MediaItem {
        locator: locator.to_string(),
        id: json["id"].as_str().unwrap_or("unknown").to_string(),
        title: json["title"].as_str().unwrap_or("Unknown").to_string(),
        duration_secs: json["duration"].as_f64().unwrap_or(0.0) as u64,
        author: json["uploader"]
            .as_str()
            .or_else(|| json["channel"].as_str())
            .unwrap_or("Unknown")
            .to_string(),
        view_count: json["view_count"].as_u64(),
        formats,
    })
}

fn parse_format(f: &Value) -> Option<StreamDescriptor> {
    // Only plain HTTP(S) streams can be fetched as one transfer
    let protocol = f["protocol"].as_str().unwrap_or("https");
    if !matches!(protocol, "https" | "http") {
        return None;
    }

    let vcodec = f["vcodec"].as_str().map(|s| s.to_string());
    let acodec = f["acodec"].as_str().map(|s| s.to_string());
    let has_video = vcodec.as_deref().map_or(false, |v| v != "none");
    let has_audio = acodec.as_deref().map_or(false, |a| a != "none");

    let http_headers: BTreeMap<String, String> = f["http_headers"]
        .as_object()
        .map(|headers| {
            headers
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    Some(StreamDescriptor {
        format_id: f["format_id"].as_str()?.to_string(),
        container: f["ext"].as_str().unwrap_or("").to_string(),
        has_video,
        has_audio,
        height: f["height"].as_u64().map(|h| h as u32),
        quality_label: if has_video {
            f["format_note"].as_str().map(|s| s.to_string())
        } else {
            None
        },
        vcodec,
        acodec,
        audio_bitrate: f["abr"].as_f64().map(|a| a as f32),
        content_length: f["filesize"].as_u64().or_else(|| f["filesize_approx"].as_u64()),
        url: f["url"].as_str().unwrap_or("").to_string(),
        http_headers,
    })
}
