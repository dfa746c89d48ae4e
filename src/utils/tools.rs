//! Location of the external ffmpeg/ffprobe binaries.

use std::path::{Path, PathBuf};

/// Paths of the ffmpeg and ffprobe executables used for capture, encoding and transcoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl FfmpegTools {
    /// Use explicit paths when configured, otherwise resolve from PATH
    pub fn resolve(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg: ffmpeg
                .map(Path::to_path_buf)
                .or_else(|| find_in_path("ffmpeg"))
                .unwrap_or(defaults.ffmpeg),
            ffprobe: ffprobe
                .map(Path::to_path_buf)
                .or_else(|| find_in_path("ffprobe"))
                .unwrap_or(defaults.ffprobe),
        }
    }

    pub fn ffmpeg_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.ffmpeg);
        cmd.kill_on_drop(true);
        cmd
    }

    pub fn ffprobe_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.ffprobe);
        cmd.kill_on_drop(true);
        cmd
    }
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let name = if cfg!(windows) {
        format!("{}.exe", binary)
    } else {
        binary.to_string()
    };

    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(&name))
            .find(|candidate| candidate.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_paths_win() {
        let tools = FfmpegTools::resolve(
            Some(Path::new("/opt/ff/ffmpeg")),
            Some(Path::new("/opt/ff/ffprobe")),
        );
        assert_eq!(tools.ffmpeg, PathBuf::from("/opt/ff/ffmpeg"));
        assert_eq!(tools.ffprobe, PathBuf::from("/opt/ff/ffprobe"));
    }
}
