//! tubefetch - download videos, audio tracks and whole playlists.
//!
//! The binary in `src/main.rs` wires the yt-dlp metadata source, the HTTP
//! fetcher and the ffmpeg muxer into a [`downloader::Pipeline`] and drives it
//! with interactive prompts.

pub mod cli;
pub mod config;
pub mod downloader;
pub mod progress;
