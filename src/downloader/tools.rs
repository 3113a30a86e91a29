use std::path::{Path, PathBuf};
use std::process::Command;

/// External programs the pipeline drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

impl ToolInfo {
    pub fn is_available(&self) -> bool {
        self.path.is_some()
    }

    /// Located path, or the bare name so that spawning reports it missing
    pub fn command_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.tool_type.as_str()))
    }
}

pub struct ToolManager;

impl ToolManager {
    pub fn new() -> Self {
        Self
    }

    /// Locate a tool; an explicit override is trusted as given.
    pub fn locate(&self, tool_type: ToolType, override_path: Option<&Path>) -> ToolInfo {
        if let Some(path) = override_path {
            return ToolInfo {
                tool_type,
                version: self.get_version(path, tool_type),
                path: Some(path.to_path_buf()),
            };
        }

        let path = self.detect_tool(tool_type);
        let version = path.as_deref().and_then(|p| self.get_version(p, tool_type));
        match &path {
            Some(p) => tracing::debug!(tool = tool_type.as_str(), path = %p.display(), ?version, "tool located"),
            None => tracing::warn!(tool = tool_type.as_str(), "tool not found in common paths or PATH"),
        }

        ToolInfo {
            tool_type,
            version,
            path,
        }
    }

    fn detect_tool(&self, tool_type: ToolType) -> Option<PathBuf> {
        let binary_name = tool_type.as_str();

        // 1. Try common paths first
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name),
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
        ];

        for path in common_paths {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        // 2. Try PATH
        #[cfg(target_os = "windows")]
        let which_cmd = "where";
        #[cfg(not(target_os = "windows"))]
        let which_cmd = "which";

        if let Ok(output) = Command::new(which_cmd).arg(binary_name).output() {
            if output.status.success() {
                let found = String::from_utf8_lossy(&output.stdout);
                let first = found.lines().next().unwrap_or("").trim();
                if !first.is_empty() {
                    return Some(PathBuf::from(first));
                }
            }
        }

        None
    }

    fn get_version(&self, path: &Path, tool_type: ToolType) -> Option<String> {
        match Command::new(path).arg(tool_type.version_arg()).output() {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|l| l.trim().to_string()),
            _ => None,
        }
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_trusted() {
        let info = ToolManager::new().locate(ToolType::Ffmpeg, Some(Path::new("/nonexistent/ffmpeg")));
        assert!(info.is_available());
        assert_eq!(info.command_path(), PathBuf::from("/nonexistent/ffmpeg"));
        assert!(info.version.is_none());
    }

    #[test]
    fn missing_tool_falls_back_to_bare_name() {
        let info = ToolInfo {
            tool_type: ToolType::YtDlp,
            version: None,
            path: None,
        };
        assert!(!info.is_available());
        assert_eq!(info.command_path(), PathBuf::from("yt-dlp"));
    }
}
