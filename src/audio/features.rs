// Spectral feature extraction
// Per-frame spectrum, spectrogram, mel, power, MFCC, chroma (STFT / CENS / CQT) and tonnetz
// matrices, computed with realfft

use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use thiserror::Error;

use super::segment::Frame;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Sample rate must be positive")]
    InvalidSampleRate,

    #[error("FFT failed: {0}")]
    Fft(String),

    #[error("Feature frames have mismatched shapes: {expected:?} vs {found:?}")]
    Ragged {
        expected: (usize, usize),
        found: (usize, usize),
    },
}

pub type FeatureResult<T> = Result<T, FeatureError>;

/// The spectral/cepstral representations computed for every job, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Spectrum,
    Spectrogram,
    MelSpectrogram,
    PowerSpectrogram,
    Mfcc,
    ChromaStft,
    ChromaCens,
    ChromaCqt,
    Tonnetz,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 9] = [
        FeatureKind::Spectrum,
        FeatureKind::Spectrogram,
        FeatureKind::MelSpectrogram,
        FeatureKind::PowerSpectrogram,
        FeatureKind::Mfcc,
        FeatureKind::ChromaStft,
        FeatureKind::ChromaCens,
        FeatureKind::ChromaCqt,
        FeatureKind::Tonnetz,
    ];

    /// Short name used as the video filename prefix
    pub fn slug(&self) -> &'static str {
        match self {
            FeatureKind::Spectrum => "ft",
            FeatureKind::Spectrogram => "spectr",
            FeatureKind::MelSpectrogram => "mel",
            FeatureKind::PowerSpectrogram => "power",
            FeatureKind::Mfcc => "mfcc",
            FeatureKind::ChromaStft => "stft",
            FeatureKind::ChromaCens => "cens",
            FeatureKind::ChromaCqt => "cqt",
            FeatureKind::Tonnetz => "tonnetz",
        }
    }

    /// Artifact subdirectory holding this kind's images and arrays
    pub fn dir_name(&self) -> &'static str {
        match self {
            FeatureKind::MelSpectrogram => "mels",
            other => other.slug(),
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            FeatureKind::Spectrum => "Fourier transform magnitude",
            FeatureKind::Spectrogram => "Spectrogram (dB)",
            FeatureKind::MelSpectrogram => "Mel-frequency spectrogram",
            FeatureKind::PowerSpectrogram => "Power spectrogram",
            FeatureKind::Mfcc => "Mel-frequency cepstral coefficients",
            FeatureKind::ChromaStft => "Chroma (STFT)",
            FeatureKind::ChromaCens => "Chroma energy normalized (CENS)",
            FeatureKind::ChromaCqt => "Chroma (constant-Q)",
            FeatureKind::Tonnetz => "Tonal centroids (tonnetz)",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Row-major matrix: rows are feature bins, columns are time steps
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl FeatureMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        FeatureMatrix {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    fn add(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] += value;
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// (min, max) over finite values; (0, 0) when there are none
    pub fn value_range(&self) -> (f32, f32) {
        let mut range: Option<(f32, f32)> = None;
        for &v in self.data.iter().filter(|v| v.is_finite()) {
            range = Some(match range {
                None => (v, v),
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
            });
        }
        range.unwrap_or((0.0, 0.0))
    }

    fn column(&self, col: usize) -> Vec<f32> {
        (0..self.rows).map(|r| self.get(r, col)).collect()
    }

    fn map_columns(&mut self, f: impl Fn(&mut [f32])) {
        for c in 0..self.cols {
            let mut column = self.column(c);
            f(&mut column);
            for (r, v) in column.into_iter().enumerate() {
                self.set(r, c, v);
            }
        }
    }
}

/// Every frame's matrix for one feature kind
#[derive(Debug, Clone)]
pub struct FeatureSet {
    pub kind: FeatureKind,
    pub frames: Vec<FeatureMatrix>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `[frames, rows, cols]`, failing if frames disagree on shape
    pub fn shape(&self) -> FeatureResult<[usize; 3]> {
        let Some(first) = self.frames.first() else {
            return Ok([0, 0, 0]);
        };
        let expected = first.shape();
        for frame in &self.frames[1..] {
            if frame.shape() != expected {
                return Err(FeatureError::Ragged {
                    expected,
                    found: frame.shape(),
                });
            }
        }
        Ok([self.frames.len(), expected.0, expected.1])
    }

    /// Contiguous C-order copy of every frame
    pub fn flatten(&self) -> Vec<f32> {
        self.frames
            .iter()
            .flat_map(|m| m.data.iter().copied())
            .collect()
    }
}

/// Feature library seam
pub trait FeatureExtractor: Send + Sync {
    fn extract_frame(
        &self,
        kind: FeatureKind,
        samples: &[f32],
        sample_rate: u32,
    ) -> FeatureResult<FeatureMatrix>;

    fn extract(
        &self,
        kind: FeatureKind,
        signal: &[f32],
        frames: &[Frame],
        sample_rate: u32,
    ) -> FeatureResult<FeatureSet> {
        let matrices = frames
            .iter()
            .map(|frame| self.extract_frame(kind, frame.slice(signal), sample_rate))
            .collect::<FeatureResult<Vec<_>>>()?;

        Ok(FeatureSet {
            kind,
            frames: matrices,
        })
    }
}

/// Configuration for the built-in extractor
#[derive(Debug, Clone)]
pub struct SpectralFeatures {
    /// FFT window for spectrogram, power, MFCC and chroma kinds
    pub n_fft: usize,

    /// Hop between STFT columns
    pub hop_length: usize,

    /// Smaller FFT window used for the mel spectrogram
    pub mel_n_fft: usize,

    /// Mel bands in the mel spectrogram
    pub n_mels: usize,

    /// Cepstral coefficients kept
    pub n_mfcc: usize,

    /// Mel bands feeding the MFCC DCT
    pub mfcc_mels: usize,

    /// Floor of the dB scale, relative to the frame maximum
    pub top_db: f32,
}

impl Default for SpectralFeatures {
    fn default() -> Self {
        SpectralFeatures {
            n_fft: 2048,
            hop_length: 512,
            mel_n_fft: 256,
            n_mels: 20,
            n_mfcc: 20,
            mfcc_mels: 40,
            top_db: 80.0,
        }
    }
}

impl FeatureExtractor for SpectralFeatures {
    fn extract_frame(
        &self,
        kind: FeatureKind,
        samples: &[f32],
        sample_rate: u32,
    ) -> FeatureResult<FeatureMatrix> {
        if sample_rate == 0 {
            return Err(FeatureError::InvalidSampleRate);
        }
        let sr = sample_rate as f32;

        match kind {
            FeatureKind::Spectrum => spectrum_magnitude(samples),
            FeatureKind::Spectrogram => {
                let mut power = stft_power(samples, self.n_fft, self.hop_length)?;
                for v in power.data.iter_mut() {
                    *v = v.sqrt();
                }
                Ok(to_db(power, 20.0, self.top_db))
            }
            FeatureKind::MelSpectrogram => {
                let power = stft_power(samples, self.mel_n_fft, self.mel_n_fft / 4)?;
                Ok(apply_filterbank(
                    &power,
                    &mel_filterbank(self.n_mels, self.mel_n_fft, sr),
                ))
            }
            FeatureKind::PowerSpectrogram => stft_power(samples, self.n_fft, self.hop_length),
            FeatureKind::Mfcc => {
                let power = stft_power(samples, self.n_fft, self.hop_length)?;
                let mel = apply_filterbank(&power, &mel_filterbank(self.mfcc_mels, self.n_fft, sr));
                let log_mel = to_db(mel, 10.0, self.top_db);
                Ok(dct_ortho(&log_mel, self.n_mfcc))
            }
            FeatureKind::ChromaStft => {
                let power = stft_power(samples, self.n_fft, self.hop_length)?;
                let mut chroma = chroma_from_bins(&power, self.n_fft, sr);
                chroma.map_columns(normalize_max);
                Ok(chroma)
            }
            FeatureKind::ChromaCqt => {
                let power = stft_power(samples, self.n_fft, self.hop_length)?;
                Ok(chroma_cqt(&power, self.n_fft, sr))
            }
            FeatureKind::ChromaCens => {
                let power = stft_power(samples, self.n_fft, self.hop_length)?;
                Ok(chroma_cens(chroma_cqt(&power, self.n_fft, sr)))
            }
            FeatureKind::Tonnetz => {
                let power = stft_power(samples, self.n_fft, self.hop_length)?;
                Ok(tonnetz(chroma_cqt(&power, self.n_fft, sr)))
            }
        }
    }
}

/// Magnitude of one FFT over the whole frame, as a single column
fn spectrum_magnitude(samples: &[f32]) -> FeatureResult<FeatureMatrix> {
    if samples.is_empty() {
        return Ok(FeatureMatrix::zeros(1, 1));
    }

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(samples.len());
    let mut input = samples.to_vec();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum)
        .map_err(|e| FeatureError::Fft(e.to_string()))?;

    Ok(FeatureMatrix {
        rows: spectrum.len(),
        cols: 1,
        data: spectrum.iter().map(|c| c.norm()).collect(),
    })
}

/// Hann-windowed short-time power spectrum, `n_fft / 2 + 1` rows.
/// Frames shorter than `n_fft` are zero-padded into a single column.
fn stft_power(samples: &[f32], n_fft: usize, hop: usize) -> FeatureResult<FeatureMatrix> {
    let n_fft = n_fft.max(2);
    let hop = hop.max(1);
    let bins = n_fft / 2 + 1;
    let cols = if samples.len() <= n_fft {
        1
    } else {
        1 + (samples.len() - n_fft) / hop
    };

    let window = periodic_hann(n_fft);
    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut input = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let mut out = FeatureMatrix::zeros(bins, cols);

    for col in 0..cols {
        let start = col * hop;
        for (i, slot) in input.iter_mut().enumerate() {
            *slot = samples.get(start + i).copied().unwrap_or(0.0) * window[i];
        }
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| FeatureError::Fft(e.to_string()))?;
        for (bin, c) in spectrum.iter().enumerate() {
            out.set(bin, col, c.norm_sqr());
        }
    }

    Ok(out)
}

fn periodic_hann(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// `multiplier * log10(x / max)`, floored at `-top_db`
fn to_db(mut matrix: FeatureMatrix, multiplier: f32, top_db: f32) -> FeatureMatrix {
    let amin = 1e-10f32;
    let reference = matrix.data.iter().fold(amin, |acc, &v| acc.max(v));
    for v in matrix.data.iter_mut() {
        *v = (multiplier * (v.max(amin) / reference).log10()).max(-top_db);
    }
    matrix
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular HTK mel filters, `n_mels x (n_fft / 2 + 1)`
fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: f32) -> FeatureMatrix {
    let bins = n_fft / 2 + 1;
    let max_mel = hz_to_mel(sample_rate / 2.0);
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut bank = FeatureMatrix::zeros(n_mels, bins);
    for m in 0..n_mels {
        let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
        for bin in 0..bins {
            let freq = bin as f32 * sample_rate / n_fft as f32;
            let weight = if freq > lower && freq <= center {
                (freq - lower) / (center - lower)
            } else if freq > center && freq < upper {
                (upper - freq) / (upper - center)
            } else {
                0.0
            };
            bank.set(m, bin, weight);
        }
    }
    bank
}

/// `bank (m x bins) * power (bins x cols)`
fn apply_filterbank(power: &FeatureMatrix, bank: &FeatureMatrix) -> FeatureMatrix {
    let mut out = FeatureMatrix::zeros(bank.rows, power.cols);
    for m in 0..bank.rows {
        for bin in 0..bank.cols.min(power.rows) {
            let w = bank.get(m, bin);
            if w == 0.0 {
                continue;
            }
            for col in 0..power.cols {
                out.add(m, col, w * power.get(bin, col));
            }
        }
    }
    out
}

/// Orthonormal DCT-II along rows, keeping the first `n_coeffs`
fn dct_ortho(input: &FeatureMatrix, n_coeffs: usize) -> FeatureMatrix {
    let n = input.rows;
    let keep = n_coeffs.min(n);
    let mut out = FeatureMatrix::zeros(keep, input.cols);
    if n == 0 {
        return out;
    }

    for k in 0..keep {
        let scale = if k == 0 {
            (1.0 / n as f32).sqrt()
        } else {
            (2.0 / n as f32).sqrt()
        };
        for col in 0..input.cols {
            let sum: f32 = (0..n)
                .map(|i| {
                    input.get(i, col) * (PI * k as f32 * (2 * i + 1) as f32 / (2 * n) as f32).cos()
                })
                .sum();
            out.set(k, col, scale * sum);
        }
    }
    out
}

fn hz_to_midi(hz: f32) -> f32 {
    12.0 * (hz / 440.0).log2() + 69.0
}

/// Fold each STFT bin into the pitch class of its nearest semitone
fn chroma_from_bins(power: &FeatureMatrix, n_fft: usize, sample_rate: f32) -> FeatureMatrix {
    let mut chroma = FeatureMatrix::zeros(12, power.cols);
    for bin in 1..power.rows {
        let freq = bin as f32 * sample_rate / n_fft as f32;
        let class = (hz_to_midi(freq).round() as i64).rem_euclid(12) as usize;
        for col in 0..power.cols {
            chroma.add(class, col, power.get(bin, col));
        }
    }
    chroma
}

/// Semitone-resolution log-frequency energies (C1..B7) folded into 12 classes.
/// Each note collects bins within one semitone with a triangular weight, which
/// gives constant-Q bandwidths without a separate transform.
fn chroma_cqt(power: &FeatureMatrix, n_fft: usize, sample_rate: f32) -> FeatureMatrix {
    let mut chroma = FeatureMatrix::zeros(12, power.cols);
    for note in 24..108usize {
        let center = 440.0 * 2f32.powf((note as f32 - 69.0) / 12.0);
        if center >= sample_rate / 2.0 {
            break;
        }
        for bin in 1..power.rows {
            let freq = bin as f32 * sample_rate / n_fft as f32;
            let distance = (hz_to_midi(freq) - note as f32).abs();
            if distance >= 1.0 {
                continue;
            }
            let weight = 1.0 - distance;
            for col in 0..power.cols {
                chroma.add(note % 12, col, weight * power.get(bin, col));
            }
        }
    }
    chroma.map_columns(normalize_max);
    chroma
}

/// Quantized, temporally smoothed, L2-normalized chroma
fn chroma_cens(mut chroma: FeatureMatrix) -> FeatureMatrix {
    const STEPS: [(f32, f32); 4] = [(0.4, 4.0), (0.2, 3.0), (0.1, 2.0), (0.05, 1.0)];

    chroma.map_columns(normalize_l1);
    for v in chroma.data.iter_mut() {
        let energy = *v;
        *v = STEPS
            .iter()
            .find(|(threshold, _)| energy > *threshold)
            .map(|(_, level)| *level)
            .unwrap_or(0.0);
    }

    let smoothing = periodic_hann(chroma.cols.clamp(1, 41) + 1)[1..].to_vec();
    let total: f32 = smoothing.iter().sum();
    let half = smoothing.len() / 2;
    let mut smoothed = FeatureMatrix::zeros(chroma.rows, chroma.cols);
    for row in 0..chroma.rows {
        for col in 0..chroma.cols {
            let mut acc = 0.0;
            for (k, w) in smoothing.iter().enumerate() {
                let src = col as i64 + k as i64 - half as i64;
                if src >= 0 && (src as usize) < chroma.cols {
                    acc += w * chroma.get(row, src as usize);
                }
            }
            smoothed.set(row, col, if total > 0.0 { acc / total } else { acc });
        }
    }

    smoothed.map_columns(normalize_l2);
    smoothed
}

/// Project L1-normalized chroma onto fifths, minor thirds and major thirds
fn tonnetz(mut chroma: FeatureMatrix) -> FeatureMatrix {
    chroma.map_columns(normalize_l1);

    let intervals = [
        (7.0 * PI / 6.0, 1.0f32),
        (3.0 * PI / 2.0, 1.0),
        (2.0 * PI / 3.0, 0.5),
    ];
    let mut out = FeatureMatrix::zeros(6, chroma.cols);
    for (i, (phi, radius)) in intervals.iter().enumerate() {
        for col in 0..chroma.cols {
            let (mut sin_acc, mut cos_acc) = (0.0, 0.0);
            for class in 0..12 {
                let c = chroma.get(class, col);
                sin_acc += radius * (phi * class as f32).sin() * c;
                cos_acc += radius * (phi * class as f32).cos() * c;
            }
            out.set(2 * i, col, sin_acc);
            out.set(2 * i + 1, col, cos_acc);
        }
    }
    out
}

fn normalize_max(column: &mut [f32]) {
    let max = column.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    if max > 0.0 {
        column.iter_mut().for_each(|v| *v /= max);
    }
}

fn normalize_l1(column: &mut [f32]) {
    let sum: f32 = column.iter().map(|v| v.abs()).sum();
    if sum > 0.0 {
        column.iter_mut().for_each(|v| *v /= sum);
    }
}

fn normalize_l2(column: &mut [f32]) {
    let norm = column.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        column.iter_mut().for_each(|v| *v /= norm);
    }
}
