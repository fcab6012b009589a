// Stepped runner
// The same work split over three caller-driven calls. Nothing is kept server-side between
// calls: each step hands back a typed checkpoint that the caller replays on the next one.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{PipelineError, PipelineResult};
use super::monolithic::record_frames;
use crate::audio::{encode_wav, extract_centered_slice, split_to_frames, FeatureKind};
use crate::context::AppContext;
use crate::render::MuxRequest;
use crate::state::{record_artifact, ArtifactKind, NpyArray, StorageError};

/// Feature kinds rendered by `step_2`, in order
pub const STEP2_KINDS: [FeatureKind; 3] = [
    FeatureKind::MelSpectrogram,
    FeatureKind::PowerSpectrogram,
    FeatureKind::Mfcc,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step1Checkpoint {
    pub slice_array_path: PathBuf,
    pub slice_audio_path: PathBuf,
    pub sampling_rate: u32,
    pub filename: String,
}

impl Step1Checkpoint {
    pub fn into_step2(self, frame_size: usize, hop_size: usize) -> Step2Request {
        Step2Request {
            audio_path: self.slice_audio_path,
            array_path: self.slice_array_path,
            sampling_rate: self.sampling_rate,
            frame_size,
            hop_size,
            filename: self.filename,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step2Request {
    pub audio_path: PathBuf,
    pub array_path: PathBuf,
    pub sampling_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub filename: String,
}

impl Step2Request {
    /// Check caller-carried state before any of it is used
    pub fn validate(&self, ctx: &AppContext) -> PipelineResult<()> {
        if self.frame_size == 0 {
            return Err(PipelineError::InvalidCheckpoint(
                "frame_size must be positive".to_string(),
            ));
        }
        if self.sampling_rate == 0 {
            return Err(PipelineError::InvalidCheckpoint(
                "sampling_rate must be positive".to_string(),
            ));
        }
        job_stem(&self.filename)?;
        for path in [&self.audio_path, &self.array_path] {
            ensure_inside_root(ctx, path)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step2Output {
    pub mel_mp4: PathBuf,
    pub power_mp4: PathBuf,
    pub mfcc_mp4: PathBuf,
}

/// Job id for a stepped run: the filename without its extension
pub fn job_stem(filename: &str) -> PipelineResult<String> {
    Path::new(filename)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::InvalidCheckpoint(format!("bad filename '{}'", filename)))
}

fn ensure_inside_root(ctx: &AppContext, path: &Path) -> PipelineResult<()> {
    ensure_inside(ctx.store.root(), path)
}

/// `path` must be an existing file that resolves somewhere below `dir`
fn ensure_inside(dir: &Path, path: &Path) -> PipelineResult<()> {
    if !path.is_file() {
        return Err(PipelineError::NotFound(path.display().to_string()));
    }
    let base = dir.canonicalize().map_err(StorageError::from)?;
    let resolved = path.canonicalize().map_err(StorageError::from)?;
    if !resolved.starts_with(&base) {
        return Err(PipelineError::InvalidCheckpoint(format!(
            "{} is outside {}",
            path.display(),
            dir.display()
        )));
    }
    Ok(())
}

/// Holds the job lease for the lifetime of a step
struct LeaseGuard<'a> {
    ctx: &'a AppContext,
    job_id: String,
}

impl<'a> LeaseGuard<'a> {
    fn acquire(ctx: &'a AppContext, job_id: &str) -> PipelineResult<Self> {
        ctx.progress.acquire_lease(job_id, ctx.config.lease_ttl())?;
        Ok(LeaseGuard {
            ctx,
            job_id: job_id.to_string(),
        })
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.progress.release_lease(&self.job_id) {
            log::warn!("Failed to release lease for {}: {}", self.job_id, e);
        }
    }
}

/// First upload (filename order) starting with `partial_id`
pub fn check(ctx: &AppContext, partial_id: &str) -> PipelineResult<String> {
    let found = ctx
        .store
        .find_upload(partial_id)?
        .ok_or_else(|| PipelineError::NotFound(format!("no upload matches '{}'", partial_id)))?;
    log::info!("check({}) matched {}", partial_id, found);
    Ok(found)
}

/// Decode an upload, slice it, and persist the slice as both an array and playable audio
pub fn step_1(ctx: &AppContext, file_path: &Path, filename: &str) -> PipelineResult<Step1Checkpoint> {
    let job_id = job_stem(filename)?;
    ensure_inside(&ctx.store.uploads_dir(), file_path)?;
    let _lease = LeaseGuard::acquire(ctx, &job_id)?;

    let signal = ctx.decoder.decode(file_path)?;
    let slice = extract_centered_slice(&signal, ctx.config.slice_length)?;
    drop(signal);

    let store = &ctx.store;
    let array = store.write_array(
        &store.slice_array_path(&job_id),
        &NpyArray::vector(slice.samples.clone()),
    )?;
    record_artifact(ctx.db(), &job_id, ArtifactKind::Array, &array)?;

    let wav = encode_wav(&slice.samples, slice.sample_rate)?;
    let audio = store.write_bytes(&store.slice_audio_path(&job_id), &wav)?;
    record_artifact(ctx.db(), &job_id, ArtifactKind::Audio, &audio)?;

    log::info!(
        "step_1 for {}: {} samples at {} Hz",
        job_id,
        slice.len(),
        slice.sample_rate
    );

    Ok(Step1Checkpoint {
        slice_array_path: array.path,
        slice_audio_path: audio.path,
        sampling_rate: slice.sample_rate,
        filename: filename.to_string(),
    })
}

/// Segment the stored slice with caller-chosen sizes, then render and mux mel, power and MFCC
pub fn step_2(ctx: &AppContext, request: &Step2Request) -> PipelineResult<Step2Output> {
    request.validate(ctx)?;
    let job_id = job_stem(&request.filename)?;
    let _lease = LeaseGuard::acquire(ctx, &job_id)?;

    let array = ctx.store.read_array(&request.array_path)?;
    if array.shape.len() != 1 {
        return Err(PipelineError::InvalidCheckpoint(format!(
            "expected a 1-D slice array, found shape {:?}",
            array.shape
        )));
    }
    let samples = array.data;
    let frames = split_to_frames(request.frame_size, request.hop_size, samples.len())?;

    let mut videos = Vec::with_capacity(STEP2_KINDS.len());
    for kind in STEP2_KINDS {
        let features = ctx
            .features
            .extract(kind, &samples, &frames, request.sampling_rate)
            .map_err(PipelineError::feature(kind))?;

        let rendered = ctx.renderer.render_set(&features, &ctx.store, &job_id)?;
        record_frames(ctx, &job_id, &rendered)?;

        let mux = MuxRequest::for_kind(&ctx.store, kind, &job_id, &request.audio_path, features.len());
        let video = ctx.muxer.mux(&mux);
        if video.exists() {
            let stored = ctx.store.describe(&video)?;
            record_artifact(ctx.db(), &job_id, ArtifactKind::Video, &stored)?;
        }
        videos.push(video);
        drop(features);
    }

    log::info!("step_2 for {}: {} frames", job_id, frames.len());

    let [mel_mp4, power_mp4, mfcc_mp4]: [PathBuf; 3] = videos
        .try_into()
        .map_err(|_| PipelineError::InvalidCheckpoint("missing video output".to_string()))?;
    Ok(Step2Output {
        mel_mp4,
        power_mp4,
        mfcc_mp4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorKind;
    use crate::audio::FileDecoder;
    use crate::pipeline::testing::{test_context, write_tone_wav, RecordingMuxer};
    use crate::render::HeatmapRenderer;
    use crate::state::list_artifacts;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_check_prefix() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        std::fs::write(ctx.store.upload_path("abc123.mp3"), b"x").unwrap();
        std::fs::write(ctx.store.upload_path("xyz999.wav"), b"x").unwrap();

        assert_eq!(check(&ctx, "abc").unwrap(), "abc123.mp3");
        let err = check(&ctx, "zzz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_step_1_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        let upload = ctx.store.upload_path("track01.wav");
        write_tone_wav(&upload, 4000, 61.0);

        let first = step_1(&ctx, &upload, "track01.wav").unwrap();
        let array_bytes = std::fs::read(&first.slice_array_path).unwrap();
        let audio_bytes = std::fs::read(&first.slice_audio_path).unwrap();

        let second = step_1(&ctx, &upload, "track01.wav").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second.slice_array_path).unwrap(), array_bytes);
        assert_eq!(std::fs::read(&second.slice_audio_path).unwrap(), audio_bytes);

        assert_eq!(first.sampling_rate, 4000);
        assert_eq!(first.slice_array_path, ctx.store.slice_array_path("track01"));
        assert_eq!(
            ctx.store.read_array(&first.slice_array_path).unwrap().shape,
            vec![30 * 4000]
        );
        assert!(ctx.progress.lease("track01").unwrap().is_none());
    }

    #[test]
    fn test_step_1_rejects_short_audio() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        let upload = ctx.store.upload_path("short.wav");
        write_tone_wav(&upload, 4000, 30.0);

        let err = step_1(&ctx, &upload, "short.wav").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientDuration);
    }

    #[test]
    fn test_step_2_produces_three_videos() {
        let dir = TempDir::new().unwrap();
        let muxer = Arc::new(RecordingMuxer::default());
        let ctx = test_context(dir.path()).with_muxer(muxer.clone());
        let upload = ctx.store.upload_path("track02.wav");
        write_tone_wav(&upload, 4000, 61.0);

        let checkpoint = step_1(&ctx, &upload, "track02.wav").unwrap();
        let output = step_2(&ctx, &checkpoint.into_step2(4096, 512)).unwrap();

        assert_eq!(
            output.mel_mp4,
            ctx.store.video_path(FeatureKind::MelSpectrogram, "track02")
        );
        assert_eq!(
            output.power_mp4,
            ctx.store.video_path(FeatureKind::PowerSpectrogram, "track02")
        );
        assert_eq!(output.mfcc_mp4, ctx.store.video_path(FeatureKind::Mfcc, "track02"));

        let requests = muxer.requests();
        assert_eq!(requests.len(), 3);
        // 120000 samples / 4096 = 29 frames
        assert!(requests.iter().all(|r| r.frame_count == 29));
        assert!(ctx
            .store
            .frame_image_path(FeatureKind::Mfcc, "track02", 28)
            .exists());
    }

    #[test]
    fn test_step_2_validates_checkpoint() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());
        let upload = ctx.store.upload_path("track03.wav");
        write_tone_wav(&upload, 4000, 61.0);
        let checkpoint = step_1(&ctx, &upload, "track03.wav").unwrap();

        let zero_frame = checkpoint.clone().into_step2(0, 512);
        assert_eq!(
            step_2(&ctx, &zero_frame).unwrap_err().kind(),
            ErrorKind::InvalidCheckpoint
        );

        let mut missing = checkpoint.clone().into_step2(4096, 512);
        missing.array_path = ctx.store.slice_array_path("nobody");
        assert_eq!(step_2(&ctx, &missing).unwrap_err().kind(), ErrorKind::NotFound);

        let outside = dir.path().join("elsewhere.npy");
        std::fs::write(&outside, b"x").unwrap();
        let mut escaped = checkpoint.into_step2(4096, 512);
        escaped.array_path = outside;
        assert_eq!(
            step_2(&ctx, &escaped).unwrap_err().kind(),
            ErrorKind::InvalidCheckpoint
        );
    }

    #[test]
    fn test_step_2_rerun_leaves_no_stale_frames() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path())
            .with_muxer(Arc::new(RecordingMuxer::default()))
            .with_renderer(Arc::new(HeatmapRenderer::new(4, 4)));
        let upload = ctx.store.upload_path("t.wav");
        write_tone_wav(&upload, 4000, 61.0);
        let checkpoint = step_1(&ctx, &upload, "t.wav").unwrap();

        step_2(&ctx, &checkpoint.clone().into_step2(2048, 256)).unwrap();
        let mel_40 = ctx.store.frame_image_path(FeatureKind::MelSpectrogram, "t", 40);
        assert!(mel_40.exists());

        step_2(&ctx, &checkpoint.into_step2(4096, 512)).unwrap();
        assert!(!mel_40.exists());
        for kind in STEP2_KINDS {
            assert!(ctx.store.frame_image_path(kind, "t", 28).exists());
            assert!(!ctx.store.frame_image_path(kind, "t", 29).exists());
        }

        let images = list_artifacts(ctx.db(), "t")
            .unwrap()
            .into_iter()
            .filter(|a| a.kind == ArtifactKind::Image)
            .count();
        assert_eq!(images, 3 * 29);
    }

    #[test]
    fn test_step_1_requires_an_upload() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(dir.path());

        let stray = dir.path().join("stray.wav");
        write_tone_wav(&stray, 4000, 61.0);
        let err = step_1(&ctx, &stray, "stray.wav").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCheckpoint);

        // traversal out of uploads/ resolves outside it
        let sneaky = ctx.store.uploads_dir().join("..").join("..").join("stray.wav");
        let err = step_1(&ctx, &sneaky, "stray.wav").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCheckpoint);

        let missing = ctx.store.upload_path("gone.wav");
        assert_eq!(
            step_1(&ctx, &missing, "gone.wav").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_step_1_resamples_cd_audio() {
        let dir = TempDir::new().unwrap();
        let mut ctx = test_context(dir.path());
        ctx.decoder = Arc::new(FileDecoder::default());
        let upload = ctx.store.upload_path("cd.wav");
        write_tone_wav(&upload, 44100, 61.0);

        let checkpoint = step_1(&ctx, &upload, "cd.wav").unwrap();
        assert_eq!(checkpoint.sampling_rate, 22050);
        assert_eq!(
            ctx.store.read_array(&checkpoint.slice_array_path).unwrap().shape,
            vec![30 * 22050]
        );

        let wav = hound::WavReader::open(&checkpoint.slice_audio_path).unwrap();
        assert_eq!(wav.spec().sample_rate, 22050);
        assert_eq!(wav.duration(), 30 * 22050);
    }

    #[test]
    fn test_job_stem() {
        assert_eq!(job_stem("abc123.mp3").unwrap(), "abc123");
        assert_eq!(job_stem("noext").unwrap(), "noext");
        assert!(job_stem("").is_err());
    }
}
