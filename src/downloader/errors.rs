// Error types for the download pipeline

use std::path::PathBuf;

use thiserror::Error;

use super::extractors::{diagnose_error, BlockingReason};

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Locator is not a usable URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// yt-dlp or ffmpeg not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Metadata lookup refused by the remote side
    #[error("Metadata lookup failed: {0}")]
    Metadata(String),

    /// Failed to parse yt-dlp JSON output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Nothing in the descriptor list matches the requested role
    #[error("No compatible format: {0}")]
    NoCompatibleFormat(String),

    /// Network failure, remote denial or interrupted stream
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// ffmpeg exited abnormally or could not be driven
    #[error("Mux failed: {0}")]
    Mux(String),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Interactive input was cancelled or invalid
    #[error("Prompt error: {0}")]
    Prompt(String),
}

impl DownloadError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Classify the stderr of a failed yt-dlp run.
    pub fn from_tool_stderr(stderr: &str) -> Self {
        let summary = summarize_stderr(stderr);

        if stderr.contains("command not found") || stderr.contains("No such file or directory") {
            return Self::ToolNotFound(summary);
        }
        if stderr.contains("Unsupported URL") || stderr.contains("is not a valid URL") {
            return Self::InvalidUrl(summary);
        }

        match diagnose_error(stderr) {
            Some(BlockingReason::Unknown) | None => Self::Metadata(summary),
            Some(reason) => Self::Metadata(format!("{} ({})", reason.description(), summary)),
        }
    }

    /// True for failures that happen before any byte is transferred.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl(_)
                | Self::ToolNotFound(_)
                | Self::Metadata(_)
                | Self::ParseError(_)
                | Self::NoCompatibleFormat(_)
        )
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Transfer(format!("network timeout: {}", e));
        }
        match e.status() {
            Some(status) => Self::Transfer(format!("remote returned {}", status)),
            None => Self::Transfer(e.to_string()),
        }
    }
}

/// Keep the `ERROR:` lines of tool output, or the last non-empty line.
fn summarize_stderr(stderr: &str) -> String {
    let important: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .take(2)
        .collect();

    if !important.is_empty() {
        return important.join(" | ");
    }

    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("unknown error")
        .chars()
        .take(200)
        .collect()
}
