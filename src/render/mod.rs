// Render module
// Per-frame heatmap images and the ffmpeg mux that turns them into a video

pub mod heatmap;
pub mod video;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::state::StorageError),

    #[error("Empty feature matrix for frame {0}")]
    EmptyFrame(usize),
}

pub type RenderResult<T> = Result<T, RenderError>;

pub use heatmap::{ColorScale, FrameRenderer, HeatmapRenderer, RenderedFrames};
pub use video::{FfmpegMuxer, MuxRequest, VideoMuxer};
