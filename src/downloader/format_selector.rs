// FormatSelector - the format catalog
//
// Turns the raw descriptor list of one item into the ordered choices offered
// to the user, and resolves selectors back to a single descriptor.
// Handles:
// - Video role: mp4 video-only tracks, highest resolution first
// - Audio role: a single "best audio" stream (AAC preferred)
// - Reusing a collection-wide quality choice on later items

use std::cmp::Reverse;

use super::errors::DownloadError;
use super::models::{Role, Selector, StreamDescriptor, VideoChoice};

/// One selectable entry with its human label
#[derive(Debug, Clone)]
pub struct FormatChoice {
    /// Display label (e.g., "1080p - mp4 - 52.31 MB")
    pub label: String,
    pub descriptor: StreamDescriptor,
}

impl FormatChoice {
    fn new(descriptor: &StreamDescriptor) -> Self {
        Self {
            label: choice_label(descriptor),
            descriptor: descriptor.clone(),
        }
    }

    pub fn selector(&self) -> Selector {
        Selector::Format(self.descriptor.format_id.clone())
    }

    pub fn to_video_choice(&self) -> VideoChoice {
        VideoChoice {
            format_id: self.descriptor.format_id.clone(),
            height: self.descriptor.height,
            label: self.label.clone(),
        }
    }
}

/// Filter and rank the descriptors of one item for a role.
pub fn select_formats(
    descriptors: &[StreamDescriptor],
    role: Role,
) -> Result<Vec<FormatChoice>, DownloadError> {
    match role {
        Role::Video => {
            let choices = video_choices(descriptors);
            if choices.is_empty() {
                return Err(DownloadError::NoCompatibleFormat(
                    "no mp4 video-only stream available".to_string(),
                ));
            }
            Ok(choices)
        }
        Role::Audio => {
            let best = best_audio(descriptors).ok_or_else(|| {
                DownloadError::NoCompatibleFormat("no audio-only stream available".to_string())
            })?;
            Ok(vec![FormatChoice::new(best)])
        }
    }
}

fn video_choices(descriptors: &[StreamDescriptor]) -> Vec<FormatChoice> {
    let mut candidates: Vec<&StreamDescriptor> = descriptors
        .iter()
        .filter(|d| d.container == "mp4" && d.is_video_only())
        .collect();

    // Highest first; within one height H.264 wins (most compatible), then size
    candidates.sort_by_key(|d| {
        (
            Reverse(d.height.unwrap_or(0)),
            !d.is_h264(),
            Reverse(d.content_length.unwrap_or(0)),
        )
    });
    candidates.dedup_by_key(|d| d.height.unwrap_or(0));

    candidates.into_iter().map(FormatChoice::new).collect()
}

/// Find best audio format (prefer AAC for compatibility, then bitrate)
pub fn best_audio(descriptors: &[StreamDescriptor]) -> Option<&StreamDescriptor> {
    let bitrate = |d: &&StreamDescriptor| d.audio_bitrate.map(|b| (b * 100.0) as u32).unwrap_or(0);

    let audio: Vec<&StreamDescriptor> = descriptors.iter().filter(|d| d.is_audio_only()).collect();

    audio
        .iter()
        .filter(|d| d.is_aac())
        .max_by_key(|d| bitrate(d))
        .or_else(|| audio.iter().max_by_key(|d| bitrate(d)))
        .copied()
}

/// Resolve a selector against the descriptors of one item.
pub fn resolve_selector<'a>(
    descriptors: &'a [StreamDescriptor],
    selector: &Selector,
) -> Result<&'a StreamDescriptor, DownloadError> {
    match selector {
        Selector::Format(id) => descriptors
            .iter()
            .find(|d| &d.format_id == id)
            .ok_or_else(|| DownloadError::NoCompatibleFormat(format!("format {} not offered", id))),
        Selector::BestAudio => best_audio(descriptors).ok_or_else(|| {
            DownloadError::NoCompatibleFormat("no audio-only stream available".to_string())
        }),
    }
}

/// Apply a quality chosen on an earlier item to this item's catalog.
///
/// The same format id is used verbatim when offered; otherwise the entry with
/// the same height stands in.
pub fn match_video_choice(
    choices: &[FormatChoice],
    wanted: &VideoChoice,
) -> Result<FormatChoice, DownloadError> {
    if let Some(exact) = choices
        .iter()
        .find(|c| c.descriptor.format_id == wanted.format_id)
    {
        return Ok(exact.clone());
    }

    if let Some(same_height) = choices
        .iter()
        .find(|c| wanted.height.is_some() && c.descriptor.height == wanted.height)
    {
        tracing::warn!(
            wanted = %wanted.format_id,
            using = %same_height.descriptor.format_id,
            "chosen format not offered, using same height"
        );
        return Ok(same_height.clone());
    }

    Err(DownloadError::NoCompatibleFormat(format!(
        "chosen quality {} not offered",
        wanted.label
    )))
}

/// Look up a quality given on the command line ("best", "720p", "720").
pub fn find_by_quality<'a>(choices: &'a [FormatChoice], quality: &str) -> Option<&'a FormatChoice> {
    let quality = quality.trim().to_lowercase();
    if quality == "best" {
        return choices.first();
    }

    let wanted_height: Option<u32> = quality.trim_end_matches('p').parse().ok();

    choices.iter().find(|c| {
        c.descriptor.display_quality().to_lowercase() == quality
            || (wanted_height.is_some() && c.descriptor.height == wanted_height)
    })
}

/// Format the label shown to the chooser
fn choice_label(d: &StreamDescriptor) -> String {
    let size = d
        .size_mb()
        .map(|mb| format!("{:.2} MB", mb))
        .unwrap_or_else(|| "unknown size".to_string());
    format!("{} - {} - {}", d.display_quality(), d.container, size)
}
