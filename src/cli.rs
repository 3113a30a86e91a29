// Command line surface - arguments, interactive prompts and result lines

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use colored::*;
use inquire::{InquireError, Select, Text};

use crate::downloader::extractors::diagnose_error;
use crate::downloader::format_selector::find_by_quality;
use crate::downloader::{DownloadError, DownloadMode, FormatChoice, MediaItem, PromptScope, Prompter, RunSummary};

#[derive(Parser, Debug)]
#[command(
    name = "tubefetch",
    author,
    version,
    about = "Download YouTube videos, audio tracks and playlists",
    long_about = None,
    disable_version_flag = true
)]
pub struct Args {
    /// Video or playlist URL (prompted when omitted)
    pub url: Option<String>,

    /// Download audio only, encoded to MP3
    #[arg(short = 'a', long, conflicts_with = "video")]
    pub audio: bool,

    /// Download video with its best audio track merged in
    #[arg(short = 'V', long)]
    pub video: bool,

    /// Video quality: "best", a label such as "720p", or a height
    #[arg(short, long, value_name = "QUALITY")]
    pub quality: Option<String>,

    /// Output folder
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Proxy URL (http://, https://, socks5://)
    #[arg(long, env = "TUBEFETCH_PROXY")]
    pub proxy: Option<String>,

    /// Network timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u32>,

    /// Config file (defaults to the user config dir)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors and hide progress bars
    #[arg(long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print version
    #[arg(long, action = ArgAction::Version)]
    version: Option<bool>,
}

impl Args {
    /// Mode fixed on the command line, if any
    pub fn mode(&self) -> Option<DownloadMode> {
        if self.audio {
            Some(DownloadMode::AudioOnly)
        } else if self.video {
            Some(DownloadMode::Video)
        } else {
            None
        }
    }

    /// Log level used when RUST_LOG is unset
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

fn prompt_error(e: InquireError) -> DownloadError {
    match e {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => {
            DownloadError::Prompt("cancelled by user".to_string())
        }
        other => DownloadError::Prompt(other.to_string()),
    }
}

pub fn prompt_url() -> Result<String, DownloadError> {
    Text::new("Video or playlist URL:")
        .with_validator(inquire::required!("a URL is required"))
        .prompt()
        .map(|s| s.trim().to_string())
        .map_err(prompt_error)
}

/// Prompter answering from command line presets first, asking otherwise
pub struct CliPrompter {
    mode: Option<DownloadMode>,
    quality: Option<String>,
    output_dir: Option<PathBuf>,
    default_output_dir: PathBuf,
}

impl CliPrompter {
    pub fn new(
        mode: Option<DownloadMode>,
        quality: Option<String>,
        output_dir: Option<PathBuf>,
        default_output_dir: PathBuf,
    ) -> Self {
        Self {
            mode,
            quality,
            output_dir,
            default_output_dir,
        }
    }
}

impl Prompter for CliPrompter {
    fn choose_mode(&self, scope: PromptScope) -> Result<DownloadMode, DownloadError> {
        if let Some(mode) = self.mode {
            return Ok(mode);
        }
        let message = match scope {
            PromptScope::Collection => "Choose download mode for ALL videos:",
            PromptScope::Item => "Choose download mode:",
        };
        Select::new(message, vec![DownloadMode::Video, DownloadMode::AudioOnly])
            .prompt()
            .map_err(prompt_error)
    }

    fn choose_video_format(
        &self,
        choices: &[FormatChoice],
        scope: PromptScope,
    ) -> Result<FormatChoice, DownloadError> {
        if let Some(quality) = self.quality.as_deref() {
            match find_by_quality(choices, quality) {
                Some(choice) => return Ok(choice.clone()),
                None => tracing::warn!(%quality, "requested quality not offered, asking instead"),
            }
        }

        let message = match scope {
            PromptScope::Collection => "Select video quality for ALL videos:",
            PromptScope::Item => "Select video quality:",
        };
        let labels: Vec<String> = choices.iter().map(|c| c.label.clone()).collect();
        let picked = Select::new(message, labels).raw_prompt().map_err(prompt_error)?;

        choices
            .get(picked.index)
            .cloned()
            .ok_or_else(|| DownloadError::Prompt("selection out of range".to_string()))
    }

    fn choose_output_dir(&self, scope: PromptScope) -> Result<PathBuf, DownloadError> {
        if let Some(dir) = &self.output_dir {
            return Ok(dir.clone());
        }
        let message = match scope {
            PromptScope::Collection => "Output folder for ALL videos:",
            PromptScope::Item => "Output folder:",
        };
        let default = self.default_output_dir.to_string_lossy().to_string();
        let answer = Text::new(message)
            .with_default(&default)
            .prompt()
            .map_err(prompt_error)?;

        let answer = answer.trim();
        Ok(if answer.is_empty() {
            self.default_output_dir.clone()
        } else {
            PathBuf::from(answer)
        })
    }
}

/// "1:02:03" or "4:05"
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Metadata lines printed before the prompts of an item
pub fn item_banner(item: &MediaItem) -> String {
    let views = item
        .view_count
        .map(|v| v.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "\n{} {}\n{} {}\n{} {}\n{} {}",
        "Title:".green(),
        item.title.cyan(),
        "Duration:".green(),
        format_duration(item.duration_secs),
        "Channel:".green(),
        item.author,
        "Views:".green(),
        views
    )
}

/// Extra advice for an item failure, if there is any
pub fn hint_for(error: &DownloadError) -> Option<&'static str> {
    match error {
        DownloadError::ToolNotFound(_) => Some("Install yt-dlp and ffmpeg, or set their paths in the config file."),
        DownloadError::Transfer(msg) | DownloadError::Metadata(msg) => {
            diagnose_error(msg).and_then(|reason| reason.hint())
        }
        _ => None,
    }
}

/// Red line (plus hint) shown the moment an item fails
pub fn failure_line(name: &str, error: &DownloadError) -> String {
    let verb = if error.is_resolution() { "Skipped" } else { "Failed" };
    let mut line = format!("{} {}: {}", format!("{}:", verb).red().bold(), name, error);
    if let Some(hint) = hint_for(error) {
        line.push_str(&format!("\n  {}", hint.yellow()));
    }
    line
}

pub fn print_summary(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        if let Ok(path) = &outcome.result {
            println!("{} {}", "Saved:".green().bold(), path.display());
        }
    }

    if summary.outcomes.len() > 1 || summary.failed() > 0 {
        println!(
            "\n{} {} succeeded, {} failed",
            "Finished:".bold(),
            summary.succeeded().to_string().green(),
            summary.failed().to_string().red()
        );
        for (outcome, _) in summary.failures() {
            println!("  {} {}", "-".red(), outcome.title.as_deref().unwrap_or(&outcome.locator));
        }
    }
}
