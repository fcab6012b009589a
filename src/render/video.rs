// Video muxing
// Frame images plus the audio slice go through an external ffmpeg process.
// The outcome is only logged: callers always get the target path back.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::audio::FeatureKind;
use crate::state::ArtifactStore;

/// Frames are spread over this many seconds of video
pub const VIDEO_SPAN_SECS: f64 = 14.0;

#[derive(Debug, Clone, PartialEq)]
pub struct MuxRequest {
    /// `%d` pattern over the frame images
    pub frame_pattern: PathBuf,
    pub audio_path: PathBuf,
    pub frame_count: usize,
    pub output: PathBuf,
}

impl MuxRequest {
    pub fn for_kind(
        store: &ArtifactStore,
        kind: FeatureKind,
        job_id: &str,
        audio_path: &Path,
        frame_count: usize,
    ) -> Self {
        MuxRequest {
            frame_pattern: store.frame_image_pattern(kind, job_id),
            audio_path: audio_path.to_path_buf(),
            frame_count,
            output: store.video_path(kind, job_id),
        }
    }

    /// `frame_count / 14`, formatted to two decimals
    pub fn framerate(&self) -> String {
        format!("{:.2}", self.frame_count as f64 / VIDEO_SPAN_SECS)
    }
}

pub trait VideoMuxer: Send + Sync {
    /// Produce `request.output`. Never fails; the path is returned whether or not
    /// a file was written.
    fn mux(&self, request: &MuxRequest) -> PathBuf;
}

#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    binary: PathBuf,
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        FfmpegMuxer::new("ffmpeg")
    }
}

impl FfmpegMuxer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        FfmpegMuxer {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn args(request: &MuxRequest) -> Vec<String> {
        vec![
            "-framerate".to_string(),
            request.framerate(),
            "-y".to_string(),
            "-i".to_string(),
            request.frame_pattern.to_string_lossy().to_string(),
            "-i".to_string(),
            request.audio_path.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            "-shortest".to_string(),
            request.output.to_string_lossy().to_string(),
        ]
    }
}

impl VideoMuxer for FfmpegMuxer {
    fn mux(&self, request: &MuxRequest) -> PathBuf {
        if let Some(parent) = request.output.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::warn!("Could not create {}: {}", parent.display(), e);
            }
        }

        let output = Command::new(&self.binary)
            .args(Self::args(request))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        match output {
            Ok(out) if out.status.success() => {
                log::info!("Muxed {}", request.output.display());
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
                log::error!(
                    "ffmpeg exited with {} for {}: {}",
                    out.status,
                    request.output.display(),
                    tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
                );
            }
            Err(e) => {
                log::error!("Failed to launch {}: {}", self.binary.display(), e);
            }
        }

        request.output.clone()
    }
}
