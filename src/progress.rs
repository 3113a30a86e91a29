// Terminal progress - one indicatif bar per live transfer

use std::collections::HashMap;
use std::sync::Mutex;

use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::cli::{failure_line, item_banner};
use crate::downloader::models::Collection;
use crate::downloader::muxer::AUDIO_BITRATE_KBPS;
use crate::downloader::{DownloadError, MediaItem, ProgressObserver, Role, Stage, TransferProgress};

const BAR_TEMPLATE: &str = "{prefix:<6} [{bar:40.cyan/blue}] {percent:>3}% | {msg}";
const SPINNER_TEMPLATE: &str = "{prefix:<6} {spinner:.cyan} {msg}";

/// Draws the bars of the Video and Audio roles, created on first progress
pub struct TerminalProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<Role, ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::with_target(ProgressDrawTarget::stderr())
    }

    /// Same behaviour, nothing drawn (--quiet and tests)
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn new_bar(&self, role: Role, total: Option<u64>) -> ProgressBar {
        let (bar, template) = match total {
            Some(len) if len > 0 => (ProgressBar::new(len), BAR_TEMPLATE),
            _ => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
        };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_prefix(match role {
            Role::Video => "Video",
            Role::Audio => "Audio",
        });
        self.multi.add(bar)
    }

    fn line(&self, text: String) {
        let _ = self.multi.println(text);
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for TerminalProgress {
    fn on_progress(&self, role: Role, progress: TransferProgress) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars
            .entry(role)
            .or_insert_with(|| self.new_bar(role, progress.total));

        bar.set_position(progress.received);
        bar.set_message(format!("{:.2} MB", progress.received_mb()));
        if bar.length().is_none() {
            bar.tick();
        }
    }

    fn on_finish(&self, role: Role, ok: bool) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        if let Some(bar) = bars.remove(&role) {
            if ok {
                bar.finish();
            } else {
                bar.abandon_with_message("failed".red().to_string());
            }
        }
    }

    fn on_collection(&self, collection: &Collection) {
        self.line(format!(
            "\n{} {} ({} videos)",
            "Playlist:".green().bold(),
            collection.title.cyan(),
            collection.items.len()
        ));
    }

    fn on_item(&self, item: &MediaItem) {
        self.line(item_banner(item));
    }

    fn on_stage(&self, stage: Stage, title: &str) {
        let text = match stage {
            Stage::Downloading => format!("Downloading video and audio of {}...", title),
            Stage::Merging => "Merging video and audio...".to_string(),
            Stage::Encoding => format!("Downloading and encoding audio at {} kbps...", AUDIO_BITRATE_KBPS),
        };
        self.line(text.dimmed().to_string());
    }

    fn on_item_failed(&self, locator: &str, title: Option<&str>, error: &DownloadError) {
        // Printed even when bars are hidden
        let line = failure_line(title.unwrap_or(locator), error);
        self.multi.suspend(|| eprintln!("{}", line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_live_only_while_transfers_run() {
        let progress = TerminalProgress::hidden();

        progress.on_progress(Role::Video, TransferProgress { received: 10, total: Some(100) });
        progress.on_progress(Role::Audio, TransferProgress { received: 5, total: None });
        progress.on_progress(Role::Video, TransferProgress { received: 60, total: Some(100) });

        {
            let bars = progress.bars.lock().unwrap();
            assert_eq!(bars.len(), 2);
            assert_eq!(bars[&Role::Video].position(), 60);
            assert_eq!(bars[&Role::Video].length(), Some(100));
            assert_eq!(bars[&Role::Audio].length(), None);
        }

        progress.on_finish(Role::Video, true);
        progress.on_finish(Role::Audio, false);
        assert!(progress.bars.lock().unwrap().is_empty());
    }

    #[test]
    fn finish_without_progress_is_harmless() {
        let progress = TerminalProgress::hidden();
        progress.on_finish(Role::Audio, false);
        progress.on_stage(Stage::Merging, "x");
        progress.on_item_failed("https://x", None, &DownloadError::Mux("exit 1".into()));
        assert!(progress.bars.lock().unwrap().is_empty());
    }
}
