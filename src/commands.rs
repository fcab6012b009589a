// Request surface
// Plain functions over the app context. Domain errors keep their kind and status;
// anything else is logged here and reaches the caller as a generic internal error.

use serde::Serialize;
use std::path::Path;

use crate::context::AppContext;
use crate::pipeline::{
    self, ErrorKind, PipelineError, Step1Checkpoint, Step2Output, Step2Request, SweepReport,
    TransformSummary,
};
use crate::state::{self, ArtifactRecord, JobStatus};

const INTERNAL_MESSAGE: &str = "Internal server error";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
}

impl CommandError {
    fn internal(context: &str, error: &dyn std::fmt::Display) -> Self {
        log::error!("{} failed: {}", context, error);
        CommandError {
            kind: ErrorKind::InternalError,
            status: ErrorKind::InternalError.status_code(),
            message: INTERNAL_MESSAGE.to_string(),
        }
    }

    fn from_pipeline(context: &str, error: PipelineError) -> Self {
        let kind = error.kind();
        if !kind.is_domain() {
            return Self::internal(context, &error);
        }
        log::warn!("{} rejected: {}", context, error);
        CommandError {
            kind,
            status: kind.status_code(),
            message: error.to_string(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub text: String,
}

pub fn status(ctx: &AppContext, job_id: &str) -> CommandResult<StatusResponse> {
    let status = ctx
        .progress
        .status(job_id)
        .map_err(|e| CommandError::internal("status", &e))?;
    Ok(StatusResponse {
        job_id: job_id.to_string(),
        text: status.render(),
        status,
    })
}

/// Full pipeline. Only a missing upload is reported as such; every other failure is generic
/// and leaves the job's marker where it stopped.
pub fn transform(ctx: &AppContext, job_id: &str) -> CommandResult<TransformSummary> {
    pipeline::transform(ctx, job_id).map_err(|e| match e {
        PipelineError::NotFound(_) => CommandError::from_pipeline("transform", e),
        other => CommandError::internal("transform", &other),
    })
}

pub fn check(ctx: &AppContext, partial_id: &str) -> CommandResult<String> {
    pipeline::check(ctx, partial_id).map_err(|e| CommandError::from_pipeline("check", e))
}

pub fn step_1(ctx: &AppContext, file_path: &Path, filename: &str) -> CommandResult<Step1Checkpoint> {
    pipeline::step_1(ctx, file_path, filename).map_err(|e| CommandError::from_pipeline("step_1", e))
}

pub fn step_2(ctx: &AppContext, request: &Step2Request) -> CommandResult<Step2Output> {
    pipeline::step_2(ctx, request).map_err(|e| CommandError::from_pipeline("step_2", e))
}

/// Ledger entries for a job, for the results page
pub fn artifacts(ctx: &AppContext, job_id: &str) -> CommandResult<Vec<ArtifactRecord>> {
    state::list_artifacts(ctx.db(), job_id).map_err(|e| CommandError::internal("artifacts", &e))
}

pub fn sweep(ctx: &AppContext) -> SweepReport {
    pipeline::sweep_once(ctx.store.root(), &ctx.progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{test_context, write_tone_wav, RecordingMuxer};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_status_sequence() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path()).with_muxer(Arc::new(RecordingMuxer::default()));

        let before = status(&ctx, "song").unwrap();
        assert_eq!(before.text, "Transformation not started");

        ctx.progress.set("song", "36%").unwrap();
        assert_eq!(status(&ctx, "song").unwrap().text, "36%");

        write_tone_wav(&ctx.store.upload_path("song.wav"), 4000, 61.0);
        transform(&ctx, "song").unwrap();
        let after = status(&ctx, "song").unwrap();
        assert!(after.text.contains("/track/song"));

        let json = serde_json::to_value(&after).unwrap();
        assert_eq!(json["status"]["state"], "complete");
        assert_eq!(json["job_id"], "song");
    }

    #[test]
    fn test_transform_errors_are_generic() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());

        let missing = transform(&ctx, "ghost").unwrap_err();
        assert_eq!(missing.status, 404);

        write_tone_wav(&ctx.store.upload_path("brief.wav"), 4000, 5.0);
        let short = transform(&ctx, "brief").unwrap_err();
        assert_eq!(short.kind, ErrorKind::InternalError);
        assert_eq!(short.status, 500);
        assert_eq!(short.message, "Internal server error");
    }

    #[test]
    fn test_stepped_errors_keep_kind() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());

        let missing = check(&ctx, "zzz").unwrap_err();
        assert_eq!(missing.kind, ErrorKind::NotFound);
        assert_eq!(missing.status, 404);

        let upload = ctx.store.upload_path("brief.wav");
        write_tone_wav(&upload, 4000, 5.0);
        let short = step_1(&ctx, &upload, "brief.wav").unwrap_err();
        assert_eq!(short.kind, ErrorKind::InsufficientDuration);
        assert_eq!(short.status, 422);
    }

    #[test]
    fn test_artifacts_listing() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        let upload = ctx.store.upload_path("listed.wav");
        write_tone_wav(&upload, 4000, 61.0);
        step_1(&ctx, &upload, "listed.wav").unwrap();

        let records = artifacts(&ctx, "listed").unwrap();
        assert_eq!(records.len(), 2);
    }
}
