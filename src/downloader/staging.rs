// Artifact stager - temporary files of one in-flight item

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::models::Role;

/// The two staged inputs of a Video-mode merge, owned for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFiles {
    pub video: PathBuf,
    pub audio: PathBuf,
}

impl StagedFiles {
    /// Role-suffixed paths next to the final artifact
    pub fn for_item(output_dir: &Path, sanitized_title: &str) -> Self {
        Self {
            video: temp_path(output_dir, sanitized_title, Role::Video),
            audio: temp_path(output_dir, sanitized_title, Role::Audio),
        }
    }

    pub fn path(&self, role: Role) -> &Path {
        match role {
            Role::Video => &self.video,
            Role::Audio => &self.audio,
        }
    }

    /// Best-effort removal of both files
    pub async fn cleanup(&self) {
        cleanup(&[self.video.as_path(), self.audio.as_path()]).await;
    }
}

pub fn temp_path(output_dir: &Path, sanitized_title: &str, role: Role) -> PathBuf {
    output_dir.join(format!("{}{}", sanitized_title, role.temp_suffix()))
}

/// Delete each path if present. Failures are logged, never returned.
pub async fn cleanup(paths: &[&Path]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "removed staged file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove staged file"),
        }
    }
}
