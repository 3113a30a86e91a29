// Muxer - drives ffmpeg for the final artifact
//
// Video mode remuxes two finished files with stream copy. AudioOnly mode
// pipes the live transfer into ffmpeg's stdin and encodes MP3 at a fixed
// bitrate. A failed run leaves whatever ffmpeg wrote at the output path.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command as TokioCommand;

use super::errors::DownloadError;
use super::fetcher::ByteStream;
use super::traits::Muxer;
use super::utils::spawn_error;

/// Bitrate of the MP3 produced in AudioOnly mode
pub const AUDIO_BITRATE_KBPS: u32 = 320;

pub struct FfmpegMuxer {
    ffmpeg_path: PathBuf,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }

    fn spawn(&self, args: &[String], stdin: Stdio) -> Result<tokio::process::Child, DownloadError> {
        tracing::debug!(ffmpeg = %self.ffmpeg_path.display(), args = %args.join(" "), "spawning ffmpeg");
        TokioCommand::new(&self.ffmpeg_path)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match spawn_error(&self.ffmpeg_path, e) {
                DownloadError::Metadata(msg) => DownloadError::Mux(msg),
                other => other,
            })
    }
}

/// Two inputs, both codecs copied, first video and first audio track kept
pub fn merge_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        path_arg(video),
        "-i".to_string(),
        path_arg(audio),
        "-map".to_string(),
        "0:v:0".to_string(),
        "-map".to_string(),
        "1:a:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        path_arg(output),
    ]);
    args
}

/// Single piped input encoded to MP3
pub fn transcode_args(output: &Path) -> Vec<String> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        "pipe:0".to_string(),
        "-vn".to_string(),
        "-c:a".to_string(),
        "libmp3lame".to_string(),
        "-b:a".to_string(),
        format!("{}k", AUDIO_BITRATE_KBPS),
        "-f".to_string(),
        "mp3".to_string(),
        path_arg(output),
    ]);
    args
}

/// A relative path starting with '-' would be read as an option
fn path_arg(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.starts_with('-') {
        format!("./{}", s)
    } else {
        s.to_string()
    }
}

fn base_args() -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
    ]
}

/// Last few lines of ffmpeg stderr, for the failure message
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}

fn exit_error(status: std::process::ExitStatus, stderr: &[u8]) -> DownloadError {
    let tail = stderr_tail(stderr);
    if tail.is_empty() {
        DownloadError::Mux(format!("ffmpeg exited with {}", status))
    } else {
        DownloadError::Mux(format!("ffmpeg exited with {}: {}", status, tail))
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), DownloadError> {
        let child = self.spawn(&merge_args(video, audio, output), Stdio::null())?;

        let out = child
            .wait_with_output()
            .await
            .map_err(|e| DownloadError::Mux(format!("failed to wait for ffmpeg: {}", e)))?;

        if !out.status.success() {
            return Err(exit_error(out.status, &out.stderr));
        }

        tracing::info!(output = %output.display(), "merged video and audio");
        Ok(())
    }

    async fn transcode_audio(&self, mut input: ByteStream, output: &Path) -> Result<(), DownloadError> {
        let mut child = self.spawn(&transcode_args(output), Stdio::piped())?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DownloadError::Mux("failed to capture ffmpeg stdin".to_string()))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Mux("failed to capture ffmpeg stderr".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr_pipe.read_to_end(&mut buf).await;
            buf
        });

        // Feed the transfer; a broken pipe means ffmpeg gave up and its exit
        // status carries the real reason
        let mut feed_result: Result<(), DownloadError> = Ok(());
        while let Some(chunk) = input.next().await {
            match chunk {
                Ok(chunk) => {
                    if let Err(e) = stdin.write_all(&chunk).await {
                        tracing::debug!(error = %e, "ffmpeg stopped reading input");
                        break;
                    }
                }
                Err(e) => {
                    feed_result = Err(e);
                    break;
                }
            }
        }
        let _ = stdin.shutdown().await;
        drop(stdin);

        if let Err(e) = feed_result {
            let _ = child.kill().await;
            stderr_task.abort();
            return Err(e);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DownloadError::Mux(format!("failed to wait for ffmpeg: {}", e)))?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(exit_error(status, &stderr));
        }

        tracing::info!(output = %output.display(), bitrate_kbps = AUDIO_BITRATE_KBPS, "encoded audio");
        Ok(())
    }
}
