// Application context
// Built once at startup and passed by reference to every operation

use std::sync::Arc;

use crate::audio::{AudioDecoder, FeatureExtractor, FileDecoder, SpectralFeatures};
use crate::config::Config;
use crate::render::{FfmpegMuxer, FrameRenderer, HeatmapRenderer, VideoMuxer};
use crate::state::{self, ArtifactStore, DbConnection, ProgressTracker};

#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub progress: ProgressTracker,
    pub store: ArtifactStore,
    pub decoder: Arc<dyn AudioDecoder>,
    pub features: Arc<dyn FeatureExtractor>,
    pub renderer: Arc<dyn FrameRenderer>,
    pub muxer: Arc<dyn VideoMuxer>,
}

impl AppContext {
    /// Default collaborators over the configured database and artifact root
    pub fn from_config(config: Config) -> ContextResult<Self> {
        config.ensure_directories()?;
        let db = state::init_db(&config.database_path())?;
        Ok(Self::with_db(config, db))
    }

    pub fn with_db(config: Config, db: DbConnection) -> Self {
        let renderer = HeatmapRenderer::new(config.image_width, config.image_height);
        let muxer = FfmpegMuxer::new(config.ffmpeg_path.clone());

        AppContext {
            store: ArtifactStore::new(&config.artifact_root),
            progress: ProgressTracker::new(db),
            decoder: Arc::new(FileDecoder::new(config.target_sample_rate)),
            features: Arc::new(SpectralFeatures::default()),
            renderer: Arc::new(renderer),
            muxer: Arc::new(muxer),
            config,
        }
    }

    pub fn with_muxer(mut self, muxer: Arc<dyn VideoMuxer>) -> Self {
        self.muxer = muxer;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn FrameRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn db(&self) -> &DbConnection {
        self.progress.db()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Db(#[from] state::DbError),
}

pub type ContextResult<T> = Result<T, ContextError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_config_builds_layout_and_db() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            artifact_root: dir.path().join("server_data"),
            ..Config::default()
        };

        let ctx = AppContext::from_config(config).unwrap();
        assert!(ctx.store.uploads_dir().is_dir());
        assert!(dir.path().join("signal_etl.db").exists());
        assert_eq!(ctx.progress.get("nothing").unwrap(), None);
    }
}
