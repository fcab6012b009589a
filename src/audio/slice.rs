// Centered slice extraction
// Cuts a fixed-length window from the middle of a track, peak-normalizes it and
// tapers both ends with half a Hann window so the slice loops without clicks

use serde::{Deserialize, Serialize};

use super::ingest::{AudioError, AudioSignal};

/// Tracks must be strictly longer than this to be sliced
pub const MIN_DURATION_SECS: f64 = 60.0;

/// Length of the fade applied to each end of a slice
pub const TAPER_SECS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum SliceLength {
    Fifteen,
    Thirty,
}

impl SliceLength {
    pub fn seconds(&self) -> usize {
        match self {
            SliceLength::Fifteen => 15,
            SliceLength::Thirty => 30,
        }
    }
}

impl TryFrom<u32> for SliceLength {
    type Error = String;

    fn try_from(secs: u32) -> Result<Self, Self::Error> {
        match secs {
            15 => Ok(SliceLength::Fifteen),
            30 => Ok(SliceLength::Thirty),
            other => Err(format!("slice length must be 15 or 30 seconds, got {}", other)),
        }
    }
}

impl From<SliceLength> for u32 {
    fn from(length: SliceLength) -> u32 {
        length.seconds() as u32
    }
}

/// Full extraction: duration check, centered window, peak normalization, taper
pub fn extract_centered_slice(
    signal: &AudioSignal,
    length: SliceLength,
) -> Result<AudioSignal, AudioError> {
    ensure_min_duration(signal)?;

    let sr = signal.sample_rate as usize;
    let mut window = center_window(&signal.samples, sr, length.seconds())?.to_vec();
    normalize_peak(&mut window)?;
    apply_loop_taper(&mut window, sr * TAPER_SECS);

    Ok(AudioSignal::new(window, signal.sample_rate))
}

pub fn ensure_min_duration(signal: &AudioSignal) -> Result<(), AudioError> {
    let secs = signal.duration_secs();
    if secs > MIN_DURATION_SECS {
        Ok(())
    } else {
        Err(AudioError::InsufficientDuration { secs })
    }
}

/// Borrow `amount_secs * sample_rate` samples centered on `floor(len / 2)`
pub fn center_window(
    samples: &[f32],
    sample_rate: usize,
    amount_secs: usize,
) -> Result<&[f32], AudioError> {
    let requested = amount_secs * sample_rate;
    if requested > samples.len() {
        return Err(AudioError::WindowExceedsSignal {
            requested,
            available: samples.len(),
        });
    }

    let mid = samples.len() / 2;
    let start = mid - requested / 2;
    let end = start + requested;

    Ok(&samples[start..end])
}

/// Scale samples so the largest magnitude becomes exactly 1.0
pub fn normalize_peak(samples: &mut [f32]) -> Result<(), AudioError> {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak == 0.0 || !peak.is_finite() {
        return Err(AudioError::SilentSignal);
    }

    for sample in samples.iter_mut() {
        *sample /= peak;
    }

    Ok(())
}

/// Symmetric Hann window of `n` points (first and last points are zero)
pub fn hann_window(n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..n)
            .map(|i| {
                let phase = 2.0 * std::f64::consts::PI * i as f64 / (n - 1) as f64;
                (0.5 - 0.5 * phase.cos()) as f32
            })
            .collect(),
    }
}

/// Fade in over the first half of a `taper_len` Hann window and fade out
/// over the second half of another one at the tail. The interior is untouched.
pub fn apply_loop_taper(samples: &mut [f32], taper_len: usize) {
    let n = taper_len.min(samples.len());
    if n == 0 {
        return;
    }

    let window = hann_window(n);
    let half = n / 2;

    for (sample, w) in samples[..half].iter_mut().zip(&window[..half]) {
        *sample *= w;
    }

    let tail_start = samples.len() - n;
    for (sample, w) in samples[tail_start + half..].iter_mut().zip(&window[half..]) {
        *sample *= w;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_signal(secs: usize, sample_rate: u32) -> AudioSignal {
        let len = secs * sample_rate as usize;
        let samples = (0..len)
            .map(|i| ((i as f32) * 0.01).sin() * 0.4)
            .collect();
        AudioSignal::new(samples, sample_rate)
    }

    #[test]
    fn test_minimum_duration_is_strict() {
        let exactly_sixty = AudioSignal::new(vec![0.1; 60 * 100], 100);
        assert!(matches!(
            ensure_min_duration(&exactly_sixty),
            Err(AudioError::InsufficientDuration { .. })
        ));

        let longer = AudioSignal::new(vec![0.1; 60 * 100 + 1], 100);
        assert!(ensure_min_duration(&longer).is_ok());
    }

    #[test]
    fn test_center_window_bounds() {
        let samples: Vec<f32> = (0..1001).map(|i| i as f32).collect();
        let window = center_window(&samples, 10, 30).unwrap();

        assert_eq!(window.len(), 300);
        // mid = 500, start = 500 - 150
        assert_eq!(window[0], 350.0);
        assert_eq!(window[299], 649.0);
    }

    #[test]
    fn test_center_window_odd_amount() {
        let samples = vec![0.0; 2000];
        let window = center_window(&samples, 11, 15).unwrap();
        assert_eq!(window.len(), 165);
    }

    #[test]
    fn test_center_window_too_long() {
        let samples = vec![0.0; 100];
        let err = center_window(&samples, 10, 30).unwrap_err();
        assert!(matches!(
            err,
            AudioError::WindowExceedsSignal {
                requested: 300,
                available: 100
            }
        ));
    }

    #[test]
    fn test_normalize_peak() {
        let mut samples = vec![0.1, -0.5, 0.25];
        normalize_peak(&mut samples).unwrap();

        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
        assert!((samples[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_silent_signal_fails() {
        let mut samples = vec![0.0; 64];
        assert!(matches!(
            normalize_peak(&mut samples),
            Err(AudioError::SilentSignal)
        ));
    }

    #[test]
    fn test_hann_window_shape() {
        let window = hann_window(101);
        assert_eq!(window.len(), 101);
        assert!(window[0].abs() < 1e-7);
        assert!(window[100].abs() < 1e-7);
        assert!((window[50] - 1.0).abs() < 1e-6);
        assert_eq!(hann_window(1), vec![1.0]);
    }

    #[test]
    fn test_taper_leaves_interior() {
        let mut samples = vec![1.0; 1000];
        apply_loop_taper(&mut samples, 100);

        assert!(samples[0].abs() < 1e-7);
        assert!(samples[999].abs() < 1e-7);
        assert!(samples[25] < 1.0);
        // second half of the leading fade is discarded
        assert_eq!(samples[50], 1.0);
        assert_eq!(samples[500], 1.0);
        // first half of the trailing fade is discarded
        assert_eq!(samples[949], 1.0);
        assert!(samples[975] < 1.0);
    }

    #[test]
    fn test_extract_centered_slice() {
        let signal = ramp_signal(61, 200);
        let slice = extract_centered_slice(&signal, SliceLength::Thirty).unwrap();

        assert_eq!(slice.len(), 30 * 200);
        assert_eq!(slice.sample_rate, 200);
        let peak = slice.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak <= 1.0 + 1e-6);
        assert!(slice.samples[0].abs() < 1e-7);
    }

    #[test]
    fn test_extract_rejects_short_track() {
        let signal = ramp_signal(45, 200);
        assert!(matches!(
            extract_centered_slice(&signal, SliceLength::Fifteen),
            Err(AudioError::InsufficientDuration { .. })
        ));
    }

    #[test]
    fn test_slice_length_parsing() {
        assert_eq!(SliceLength::try_from(15), Ok(SliceLength::Fifteen));
        assert_eq!(SliceLength::try_from(30), Ok(SliceLength::Thirty));
        assert!(SliceLength::try_from(20).is_err());
        let parsed: SliceLength = serde_json::from_str("30").unwrap();
        assert_eq!(parsed, SliceLength::Thirty);
    }
}
