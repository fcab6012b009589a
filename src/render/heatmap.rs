// Frame heatmaps
// One PNG per feature frame, low rows at the bottom, values mapped through a viridis ramp

use image::{ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};

use super::{RenderError, RenderResult};
use crate::audio::{FeatureKind, FeatureMatrix, FeatureSet};
use crate::state::ArtifactStore;

/// How matrix values map onto the color ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorScale {
    /// Stretch between the frame's own min and max
    Auto,
    /// Clamp into a fixed window
    Fixed { min: f32, max: f32 },
    /// Convert power to dB relative to the frame peak, clamped at `floor`
    DecibelsFromPeak { floor: f32 },
}

impl ColorScale {
    pub fn for_kind(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::MelSpectrogram => ColorScale::DecibelsFromPeak { floor: -80.0 },
            FeatureKind::Spectrogram => ColorScale::Fixed {
                min: -80.0,
                max: 0.0,
            },
            FeatureKind::ChromaStft | FeatureKind::ChromaCqt | FeatureKind::ChromaCens => {
                ColorScale::Fixed { min: 0.0, max: 1.0 }
            }
            _ => ColorScale::Auto,
        }
    }

    /// Every cell of `matrix` mapped into `[0, 1]`
    pub fn normalize(&self, matrix: &FeatureMatrix) -> Vec<f32> {
        let (values, lo, hi) = match *self {
            ColorScale::Auto => {
                let (lo, hi) = matrix.value_range();
                (matrix.data.clone(), lo, hi)
            }
            ColorScale::Fixed { min, max } => (matrix.data.clone(), min, max),
            ColorScale::DecibelsFromPeak { floor } => {
                let amin = 1e-10f32;
                let peak = matrix.data.iter().fold(amin, |acc, &v| acc.max(v));
                let db = matrix
                    .data
                    .iter()
                    .map(|&v| (10.0 * (v.max(amin) / peak).log10()).max(floor))
                    .collect();
                (db, floor, 0.0)
            }
        };

        let span = hi - lo;
        values
            .into_iter()
            .map(|v| {
                if !v.is_finite() || span <= 0.0 {
                    0.0
                } else {
                    ((v - lo) / span).clamp(0.0, 1.0)
                }
            })
            .collect()
    }
}

const VIRIDIS: [(f32, [f32; 3]); 5] = [
    (0.0, [68.0, 1.0, 84.0]),
    (0.25, [59.0, 82.0, 139.0]),
    (0.5, [33.0, 145.0, 140.0]),
    (0.75, [94.0, 201.0, 98.0]),
    (1.0, [253.0, 231.0, 37.0]),
];

pub fn viridis(t: f32) -> Rgb<u8> {
    let t = t.clamp(0.0, 1.0);
    for pair in VIRIDIS.windows(2) {
        let (t0, c0) = pair[0];
        let (t1, c1) = pair[1];
        if t <= t1 {
            let f = (t - t0) / (t1 - t0);
            let mix = |i: usize| (c0[i] + (c1[i] - c0[i]) * f).round() as u8;
            return Rgb([mix(0), mix(1), mix(2)]);
        }
    }
    let last = VIRIDIS[VIRIDIS.len() - 1].1;
    Rgb([last[0] as u8, last[1] as u8, last[2] as u8])
}

/// Image renderer seam
pub trait FrameRenderer: Send + Sync {
    fn render_frame(
        &self,
        kind: FeatureKind,
        index: usize,
        matrix: &FeatureMatrix,
        path: &Path,
    ) -> RenderResult<()>;

    /// Render every frame to `{kind_dir}/{job_id}-{index}.png`, after removing the job's
    /// frames from any earlier run of the same kind
    fn render_set(
        &self,
        features: &FeatureSet,
        store: &ArtifactStore,
        job_id: &str,
    ) -> RenderResult<RenderedFrames> {
        std::fs::create_dir_all(store.feature_dir(features.kind))?;
        let removed = store.clear_frame_images(features.kind, job_id)?;

        let mut paths = Vec::with_capacity(features.len());
        for (index, matrix) in features.frames.iter().enumerate() {
            let path = store.frame_image_path(features.kind, job_id, index);
            self.render_frame(features.kind, index, matrix, &path)?;
            paths.push(path);
        }

        log::info!(
            "Rendered {} {} frames for {} ({} old frames removed)",
            paths.len(),
            features.kind,
            job_id,
            removed.len()
        );
        Ok(RenderedFrames { paths, removed })
    }
}

/// Output of `render_set`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedFrames {
    /// Written frames in index order
    pub paths: Vec<PathBuf>,
    /// Frames deleted before rendering; paths that were rewritten appear in both lists
    pub removed: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HeatmapRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for HeatmapRenderer {
    fn default() -> Self {
        HeatmapRenderer {
            width: 640,
            height: 480,
        }
    }
}

impl HeatmapRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        HeatmapRenderer {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn draw(&self, kind: FeatureKind, index: usize, matrix: &FeatureMatrix) -> RenderResult<RgbImage> {
        let (rows, cols) = matrix.shape();
        if rows == 0 || cols == 0 {
            return Err(RenderError::EmptyFrame(index));
        }

        let cells = ColorScale::for_kind(kind).normalize(matrix);
        let (width, height) = (self.width as usize, self.height as usize);

        Ok(RgbImage::from_fn(self.width, self.height, |x, y| {
            let col = (x as usize * cols / width).min(cols - 1);
            let row = rows - 1 - (y as usize * rows / height).min(rows - 1);
            viridis(cells[row * cols + col])
        }))
    }
}

impl FrameRenderer for HeatmapRenderer {
    fn render_frame(
        &self,
        kind: FeatureKind,
        index: usize,
        matrix: &FeatureMatrix,
        path: &Path,
    ) -> RenderResult<()> {
        let img = self.draw(kind, index, matrix)?;
        img.save_with_format(path, ImageFormat::Png)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ramp(rows: usize, cols: usize) -> FeatureMatrix {
        let mut m = FeatureMatrix::zeros(rows, cols);
        for (i, v) in m.data.iter_mut().enumerate() {
            *v = i as f32;
        }
        m
    }

    #[test]
    fn test_viridis_endpoints() {
        assert_eq!(viridis(0.0), Rgb([68, 1, 84]));
        assert_eq!(viridis(1.0), Rgb([253, 231, 37]));
        assert_eq!(viridis(2.0), Rgb([253, 231, 37]));
    }

    #[test]
    fn test_auto_scale_spans_range() {
        let cells = ColorScale::Auto.normalize(&ramp(2, 2));
        assert_eq!(cells, vec![0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]);
    }

    #[test]
    fn test_constant_matrix_does_not_divide_by_zero() {
        let cells = ColorScale::Auto.normalize(&FeatureMatrix::zeros(3, 3));
        assert!(cells.iter().all(|&c| c == 0.0));
    }

    #[test]
    fn test_decibel_scale_peak_is_top() {
        let mut m = FeatureMatrix::zeros(1, 2);
        m.data = vec![1.0, 1e-12];
        let cells = ColorScale::DecibelsFromPeak { floor: -80.0 }.normalize(&m);
        assert_eq!(cells, vec![1.0, 0.0]);
    }

    #[test]
    fn test_low_rows_drawn_at_bottom() {
        let renderer = HeatmapRenderer::new(4, 4);
        let mut m = FeatureMatrix::zeros(2, 1);
        m.data = vec![0.0, 1.0]; // row 0 low, row 1 high
        let img = renderer.draw(FeatureKind::Mfcc, 0, &m).unwrap();
        assert_eq!(*img.get_pixel(0, 0), viridis(1.0));
        assert_eq!(*img.get_pixel(0, 3), viridis(0.0));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let renderer = HeatmapRenderer::default();
        let result = renderer.draw(FeatureKind::Mfcc, 7, &FeatureMatrix::zeros(0, 0));
        assert!(matches!(result, Err(RenderError::EmptyFrame(7))));
    }

    #[test]
    fn test_render_set_names_frames() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let set = FeatureSet {
            kind: FeatureKind::PowerSpectrogram,
            frames: vec![ramp(3, 4), ramp(3, 4)],
        };

        let paths = HeatmapRenderer::new(16, 12)
            .render_set(&set, &store, "abc")
            .unwrap()
            .paths;

        assert_eq!(paths.len(), 2);
        assert_eq!(paths[1], dir.path().join("power").join("abc-1.png"));
        let img = image::open(&paths[0]).unwrap();
        assert_eq!((img.width(), img.height()), (16, 12));
    }

    #[test]
    fn test_render_set_drops_frames_from_longer_run() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let renderer = HeatmapRenderer::new(8, 6);
        let long = FeatureSet {
            kind: FeatureKind::MelSpectrogram,
            frames: vec![ramp(2, 2); 5],
        };
        let short = FeatureSet {
            kind: FeatureKind::MelSpectrogram,
            frames: vec![ramp(2, 2); 2],
        };

        renderer.render_set(&long, &store, "t").unwrap();
        let rerun = renderer.render_set(&short, &store, "t").unwrap();

        assert_eq!(rerun.paths.len(), 2);
        assert_eq!(rerun.removed.len(), 5);
        assert!(store
            .frame_image_path(FeatureKind::MelSpectrogram, "t", 1)
            .exists());
        for index in 2..5 {
            assert!(!store
                .frame_image_path(FeatureKind::MelSpectrogram, "t", index)
                .exists());
        }
    }
}
