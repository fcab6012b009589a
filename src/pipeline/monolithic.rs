// Monolithic runner
// One call walks every stage in a fixed order, publishing a fixed marker as each completes.
// A failure aborts the run and leaves the marker where the last completed stage put it.

use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;

use super::error::{PipelineError, PipelineResult};
use super::stages::{FeatureStep, Stage};
use super::trace::TraceWriter;
use crate::audio::{encode_wav, extract_centered_slice, split_to_frames, FeatureKind};
use crate::context::AppContext;
use crate::render::{MuxRequest, RenderedFrames};
use crate::state::{forget_artifact, record_artifact, ArtifactKind, NpyArray};

#[derive(Debug, Clone, Serialize)]
pub struct TransformSummary {
    pub job_id: String,
    pub upload: String,
    pub artifact_root: PathBuf,
    pub sample_rate: u32,
    pub frame_count: usize,
    pub slice_audio_path: PathBuf,
    pub feature_arrays: Vec<PathBuf>,
    pub videos: Vec<PathBuf>,
}

/// Run the full pipeline for `job_id` on the caller's thread
pub fn transform(ctx: &AppContext, job_id: &str) -> PipelineResult<TransformSummary> {
    log::info!("Starting transformation for {}", job_id);
    ctx.progress.acquire_lease(job_id, ctx.config.lease_ttl())?;

    let run = Run {
        ctx,
        job_id,
        trace: TraceWriter::new(ctx.store.trace_path(job_id), job_id),
    };
    let result = run.execute();

    if let Err(e) = ctx.progress.release_lease(job_id) {
        log::warn!("Failed to release lease for {}: {}", job_id, e);
    }

    match &result {
        Ok(summary) => log::info!(
            "Transformation of {} complete: {} frames, {} videos",
            job_id,
            summary.frame_count,
            summary.videos.len()
        ),
        Err(e) => log::error!("Transformation of {} failed: {}", job_id, e),
    }
    result
}

struct Run<'a> {
    ctx: &'a AppContext,
    job_id: &'a str,
    trace: TraceWriter,
}

impl Run<'_> {
    /// Trace, run `work`, then publish the stage marker and renew the lease
    fn stage<T>(&self, stage: Stage, work: impl FnOnce() -> PipelineResult<T>) -> PipelineResult<T> {
        let name = stage.name();
        let marker = stage.marker();
        self.trace
            .write(&self.trace.stage(&name).entered(format!("Entering {}", name)))?;

        let started = Instant::now();
        let value = match work() {
            Ok(value) => value,
            Err(e) => {
                if let Err(trace_err) = self.trace.write(&self.trace.stage(&name).failed(e.to_string())) {
                    log::warn!("Could not trace failure of {}: {}", name, trace_err);
                }
                return Err(e);
            }
        };

        self.ctx.progress.set(self.job_id, &marker)?;
        self.ctx
            .progress
            .renew_lease(self.job_id, self.ctx.config.lease_ttl())?;
        self.trace.write(
            &self
                .trace
                .stage(&name)
                .marker(&marker)
                .completed(
                    format!("{} done", name),
                    json!({ "elapsed_ms": started.elapsed().as_millis() as u64 }),
                ),
        )?;
        log::debug!("{} reached {}", self.job_id, marker);

        Ok(value)
    }

    fn execute(&self) -> PipelineResult<TransformSummary> {
        let ctx = self.ctx;
        let store = &ctx.store;
        let config = &ctx.config;
        let job_id = self.job_id;

        let upload = self.stage(Stage::ValidateUpload, || {
            store
                .find_upload(job_id)?
                .ok_or_else(|| PipelineError::NotFound(format!("no upload matches '{}'", job_id)))
        })?;

        let signal = self.stage(Stage::Decode, || {
            Ok(ctx.decoder.decode(&store.upload_path(&upload))?)
        })?;

        let slice = self.stage(Stage::ExtractSlice, || {
            Ok(extract_centered_slice(&signal, config.slice_length)?)
        })?;
        drop(signal);
        let sample_rate = slice.sample_rate;

        let slice_audio_path = self.stage(Stage::PersistSlice, || {
            let wav = encode_wav(&slice.samples, sample_rate)?;
            let stored = store.write_bytes(&store.slice_audio_path(job_id), &wav)?;
            record_artifact(ctx.db(), job_id, ArtifactKind::Audio, &stored)?;
            Ok(stored.path)
        })?;

        let frames = self.stage(Stage::Segment, || {
            Ok(split_to_frames(config.frame_size, config.hop_size, slice.len())?)
        })?;
        log::info!("{}: {} frames of {} samples", job_id, frames.len(), config.frame_size);

        let mut feature_arrays = Vec::new();
        let mut videos = Vec::new();

        for kind in FeatureKind::ALL {
            let features = self.stage(Stage::Feature(kind, FeatureStep::Computed), || {
                ctx.features
                    .extract(kind, &slice.samples, &frames, sample_rate)
                    .map_err(PipelineError::feature(kind))
            })?;

            self.stage(Stage::Feature(kind, FeatureStep::Images), || {
                if config.generate_video {
                    let rendered = ctx.renderer.render_set(&features, store, job_id)?;
                    record_frames(ctx, job_id, &rendered)?;
                }
                Ok(())
            })?;

            self.stage(Stage::Feature(kind, FeatureStep::Video), || {
                if config.generate_video {
                    let request =
                        MuxRequest::for_kind(store, kind, job_id, &slice_audio_path, features.len());
                    let path = ctx.muxer.mux(&request);
                    if path.exists() {
                        let stored = store.describe(&path)?;
                        record_artifact(ctx.db(), job_id, ArtifactKind::Video, &stored)?;
                    }
                    videos.push(path);
                }
                Ok(())
            })?;

            self.stage(Stage::Feature(kind, FeatureStep::Persisted), || {
                if config.generate_features {
                    let shape = features.shape().map_err(PipelineError::feature(kind))?;
                    let array = NpyArray::new(shape.to_vec(), features.flatten())?;
                    let stored = store.write_array(&store.feature_array_path(kind, job_id), &array)?;
                    record_artifact(ctx.db(), job_id, ArtifactKind::Array, &stored)?;
                    feature_arrays.push(stored.path);
                }
                Ok(())
            })?;

            drop(features);
        }

        self.stage(Stage::Complete, || Ok(()))?;

        Ok(TransformSummary {
            job_id: job_id.to_string(),
            upload,
            artifact_root: store.root().to_path_buf(),
            sample_rate,
            frame_count: frames.len(),
            slice_audio_path,
            feature_arrays,
            videos,
        })
    }
}

/// Ledger rows for freshly rendered frames; rows of frames that were deleted and not redrawn go
pub(super) fn record_frames(
    ctx: &AppContext,
    job_id: &str,
    rendered: &RenderedFrames,
) -> PipelineResult<()> {
    for path in rendered.removed.iter().filter(|p| !rendered.paths.contains(*p)) {
        forget_artifact(ctx.db(), path)?;
    }
    for path in &rendered.paths {
        let stored = ctx.store.describe(path)?;
        record_artifact(ctx.db(), job_id, ArtifactKind::Image, &stored)?;
    }
    Ok(())
}
