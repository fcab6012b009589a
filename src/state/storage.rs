// File system layout for uploads and generated artifacts
// Every artifact name is derived from the job id, so re-running a stage overwrites in place
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::npy::{self, NpyArray, NpyError};
use crate::audio::FeatureKind;

pub const UPLOADS_DIR: &str = "uploads";
pub const SLICES_DIR: &str = "slices";
pub const ARRAYS_DIR: &str = "transformed_signals";
pub const VIDEOS_DIR: &str = "videos";
pub const TRACES_DIR: &str = "traces";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Array error: {0}")]
    Npy(#[from] NpyError),
    #[error("Upload directory missing: {0}")]
    MissingUploads(PathBuf),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A file written by the store, with the digest recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArtifactStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every directory the pipeline writes into, in a stable order
    pub fn layout(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.uploads_dir(),
            self.slices_dir(),
            self.arrays_dir(),
        ];
        dirs.extend(FeatureKind::ALL.iter().map(|kind| self.feature_dir(*kind)));
        dirs.push(self.videos_dir());
        dirs.push(self.traces_dir());
        dirs
    }

    pub fn ensure_layout(&self) -> StorageResult<()> {
        for dir in self.layout() {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn slices_dir(&self) -> PathBuf {
        self.root.join(SLICES_DIR)
    }

    pub fn arrays_dir(&self) -> PathBuf {
        self.root.join(ARRAYS_DIR)
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join(VIDEOS_DIR)
    }

    pub fn traces_dir(&self) -> PathBuf {
        self.root.join(TRACES_DIR)
    }

    /// Frame images and the feature array of one kind share this directory
    pub fn feature_dir(&self, kind: FeatureKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn slice_audio_path(&self, job_id: &str) -> PathBuf {
        self.slices_dir().join(format!("{}.wav", job_id))
    }

    pub fn slice_array_path(&self, job_id: &str) -> PathBuf {
        self.arrays_dir().join(format!("{}.npy", job_id))
    }

    pub fn frame_image_path(&self, kind: FeatureKind, job_id: &str, index: usize) -> PathBuf {
        self.feature_dir(kind).join(format!("{}-{}.png", job_id, index))
    }

    /// Input pattern handed to ffmpeg's image demuxer
    pub fn frame_image_pattern(&self, kind: FeatureKind, job_id: &str) -> PathBuf {
        self.feature_dir(kind).join(format!("{}-%d.png", job_id))
    }

    /// Delete every `{job_id}-{index}.png` of a kind. ffmpeg's `%d` input reads consecutive
    /// indices, so frames left over from a longer run would end up in the next video.
    pub fn clear_frame_images(&self, kind: FeatureKind, job_id: &str) -> StorageResult<Vec<PathBuf>> {
        let dir = self.feature_dir(kind);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}-", job_id);
        let mut removed = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|n| n.strip_suffix(".png"))
            else {
                continue;
            };
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            fs::remove_file(entry.path())?;
            removed.push(entry.path());
        }
        removed.sort();
        Ok(removed)
    }

    pub fn feature_array_path(&self, kind: FeatureKind, job_id: &str) -> PathBuf {
        self.feature_dir(kind).join(format!("{}.npy", job_id))
    }

    pub fn video_path(&self, kind: FeatureKind, job_id: &str) -> PathBuf {
        self.videos_dir()
            .join(format!("{}-{}.mp4", kind.slug(), job_id))
    }

    pub fn trace_path(&self, job_id: &str) -> PathBuf {
        self.traces_dir().join(format!("{}.jsonl", job_id))
    }

    /// First upload (in filename order) whose name starts with `prefix`
    pub fn find_upload(&self, prefix: &str) -> StorageResult<Option<String>> {
        let dir = self.uploads_dir();
        if !dir.is_dir() {
            return Err(StorageError::MissingUploads(dir));
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names.into_iter().next())
    }

    pub fn upload_path(&self, filename: &str) -> PathBuf {
        self.uploads_dir().join(filename)
    }

    /// Write `data` to `path`, replacing any previous content
    pub fn write_bytes(&self, path: &Path, data: &[u8]) -> StorageResult<StoredFile> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;

        Ok(StoredFile {
            path: path.to_path_buf(),
            sha256: calculate_sha256(data),
            bytes: data.len() as u64,
        })
    }

    pub fn write_array(&self, path: &Path, array: &NpyArray) -> StorageResult<StoredFile> {
        let bytes = npy::to_npy_bytes(array)?;
        self.write_bytes(path, &bytes)
    }

    pub fn read_array(&self, path: &Path) -> StorageResult<NpyArray> {
        let mut file = std::io::BufReader::new(fs::File::open(path)?);
        Ok(npy::read_npy(&mut file)?)
    }

    /// Digest an artifact something else (ffmpeg, the renderer) wrote
    pub fn describe(&self, path: &Path) -> StorageResult<StoredFile> {
        let data = fs::read(path)?;
        Ok(StoredFile {
            path: path.to_path_buf(),
            sha256: calculate_sha256(&data),
            bytes: data.len() as u64,
        })
    }
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
