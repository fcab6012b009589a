// Sample rate conversion
// Decoded uploads are brought to one analysis rate before slicing so frame sizes mean the same
// duration whatever the source was recorded at

use rubato::{FftFixedIn, Resampler};

use super::ingest::{AudioError, AudioSignal};

/// Analysis rate used unless configured otherwise
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Resample a mono signal to `target_rate`. Output length is `len * target / source`.
pub fn resample(signal: AudioSignal, target_rate: u32) -> Result<AudioSignal, AudioError> {
    let source_rate = signal.sample_rate;
    if source_rate == 0 || target_rate == 0 {
        return Err(AudioError::InvalidData);
    }
    if source_rate == target_rate || signal.is_empty() {
        return Ok(AudioSignal::new(signal.samples, target_rate));
    }

    let mut resampler = FftFixedIn::<f32>::new(
        source_rate as usize,
        target_rate as usize,
        CHUNK_SIZE,
        SUB_CHUNKS,
        1,
    )?;

    let input = &signal.samples;
    let expected = (input.len() as u64 * target_rate as u64 / source_rate as u64) as usize;
    let delay = resampler.output_delay();

    let mut output = Vec::with_capacity(expected + delay + CHUNK_SIZE);
    let mut pos = 0;
    // zero-padded chunks past the end flush the filter delay
    while output.len() < expected + delay {
        let needed = resampler.input_frames_next();
        let mut chunk = vec![0.0f32; needed];
        if pos < input.len() {
            let copy = needed.min(input.len() - pos);
            chunk[..copy].copy_from_slice(&input[pos..pos + copy]);
        }
        pos += needed;

        let processed = resampler.process(std::slice::from_ref(&chunk), None)?;
        match processed.first() {
            Some(channel) if !channel.is_empty() => output.extend_from_slice(channel),
            _ => return Err(AudioError::InvalidData),
        }
    }

    output.drain(..delay);
    output.truncate(expected);

    log::debug!(
        "Resampled {} samples at {} Hz to {} samples at {} Hz",
        input.len(),
        source_rate,
        output.len(),
        target_rate
    );

    Ok(AudioSignal::new(output, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, secs: f32) -> AudioSignal {
        let total = (sample_rate as f32 * secs) as usize;
        let samples = (0..total)
            .map(|n| (2.0 * PI * freq * n as f32 / sample_rate as f32).sin() * 0.5)
            .collect();
        AudioSignal::new(samples, sample_rate)
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn test_same_rate_is_untouched() {
        let signal = sine(220.0, 22050, 0.1);
        let out = resample(signal.clone(), 22050).unwrap();
        assert_eq!(out, signal);
    }

    #[test]
    fn test_downsample_cd_rate() {
        let out = resample(sine(440.0, 44100, 2.0), DEFAULT_SAMPLE_RATE).unwrap();

        assert_eq!(out.sample_rate, 22050);
        assert_eq!(out.len(), 44100);

        // level is kept away from the edges
        let middle = &out.samples[5000..out.len() - 5000];
        assert!((rms(middle) - 0.5 / 2f32.sqrt()).abs() < 0.02);
    }

    #[test]
    fn test_upsample_keeps_timing() {
        let out = resample(sine(100.0, 8000, 1.0), 16000).unwrap();
        assert_eq!(out.len(), 16000);

        // 100 Hz has a rising zero crossing every 160 samples at 16 kHz
        let crossings = out.samples[1000..15000]
            .windows(2)
            .filter(|w| w[0] < 0.0 && w[1] >= 0.0)
            .count();
        assert!((86..=89).contains(&crossings), "{} crossings", crossings);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let signal = AudioSignal::new(vec![0.1; 10], 0);
        assert!(matches!(resample(signal, 22050), Err(AudioError::InvalidData)));
    }
}
