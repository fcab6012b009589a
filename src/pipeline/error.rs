// Pipeline errors and the coarse kinds surfaced to callers
use serde::Serialize;
use thiserror::Error;

use super::trace::TraceError;
use crate::audio::{AudioError, FeatureError, SegmentError};
use crate::render::RenderError;
use crate::state::{DbError, NpyError, StorageError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Segmentation error: {0}")]
    Segment(#[from] SegmentError),

    #[error("Feature error ({kind}): {source}")]
    Feature {
        kind: crate::audio::FeatureKind,
        #[source]
        source: FeatureError,
    },

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Array error: {0}")]
    Npy(#[from] NpyError),

    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InsufficientDuration,
    InvalidCheckpoint,
    ProcessingFailure,
    InternalError,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InsufficientDuration => 422,
            ErrorKind::InvalidCheckpoint => 400,
            ErrorKind::ProcessingFailure | ErrorKind::InternalError => 500,
        }
    }

    /// Kinds whose message is safe to hand back to the caller
    pub fn is_domain(&self) -> bool {
        !matches!(self, ErrorKind::InternalError)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::InvalidCheckpoint(_) => ErrorKind::InvalidCheckpoint,
            PipelineError::Audio(AudioError::InsufficientDuration { .. }) => {
                ErrorKind::InsufficientDuration
            }
            PipelineError::Segment(_)
            | PipelineError::Feature { .. }
            | PipelineError::Render(_) => ErrorKind::ProcessingFailure,
            _ => ErrorKind::InternalError,
        }
    }

    pub fn feature(kind: crate::audio::FeatureKind) -> impl FnOnce(FeatureError) -> PipelineError {
        move |source| PipelineError::Feature { kind, source }
    }
}
