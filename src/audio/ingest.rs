// Audio ingestion module
// Decodes uploads (WAV via hound, compressed formats via symphonia) into mono signals

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

use super::resample::{resample, DEFAULT_SAMPLE_RATE};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV file: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("Failed to decode audio: {0}")]
    DecodeError(#[from] SymphoniaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid audio data")]
    InvalidData,

    #[error("Signal is {secs:.2}s long, more than 60s is required")]
    InsufficientDuration { secs: f64 },

    #[error("Signal is silent, cannot peak-normalize")]
    SilentSignal,

    #[error("Requested window of {requested} samples exceeds signal of {available} samples")]
    WindowExceedsSignal { requested: usize, available: usize },

    #[error("Resampler setup failed: {0}")]
    ResamplerSetup(#[from] rubato::ResamplerConstructionError),

    #[error("Resampling failed: {0}")]
    Resample(#[from] rubato::ResampleError),
}

/// Decoded mono signal at its native sampling rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSignal {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        AudioSignal {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples normalized to f32 in range [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Total number of frames (samples / channels)
    pub frame_count: usize,
}

impl AudioData {
    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }
        downmix(&self.samples, self.channels as usize)
    }

    pub fn into_signal(self) -> AudioSignal {
        let mono = self.to_mono();
        AudioSignal::new(mono, self.sample_rate)
    }
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Anything that can turn an uploaded file into a mono signal
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<AudioSignal, AudioError>;
}

/// Default decoder: hound for `.wav`, symphonia for everything else.
/// With a target rate set, the decoded signal is resampled to it.
#[derive(Debug, Clone, Copy)]
pub struct FileDecoder {
    target_rate: Option<u32>,
}

impl FileDecoder {
    pub fn new(target_rate: Option<u32>) -> Self {
        FileDecoder { target_rate }
    }

    /// Keep whatever rate the file was recorded at
    pub fn native() -> Self {
        Self::new(None)
    }

    pub fn target_rate(&self) -> Option<u32> {
        self.target_rate
    }
}

impl Default for FileDecoder {
    fn default() -> Self {
        Self::new(Some(DEFAULT_SAMPLE_RATE))
    }
}

impl AudioDecoder for FileDecoder {
    fn decode(&self, path: &Path) -> Result<AudioSignal, AudioError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let signal = match extension.as_deref() {
            Some("wav") => ingest_wav(&fs::read(path)?)?.into_signal(),
            _ => decode_compressed(path, extension.as_deref())?,
        };
        let source_rate = signal.sample_rate;
        let signal = match self.target_rate {
            Some(rate) => resample(signal, rate)?,
            None => signal,
        };

        log::info!(
            "Decoded {}: {} samples at {} Hz from {} Hz ({:.2}s)",
            path.display(),
            signal.len(),
            signal.sample_rate,
            source_rate,
            signal.duration_secs()
        );

        Ok(signal)
    }
}

/// Ingest a WAV file from raw bytes
pub fn ingest_wav(data: &[u8]) -> Result<AudioData, AudioError> {
    let cursor = Cursor::new(data);
    let mut reader = WavReader::new(cursor)?;

    let spec = reader.spec();
    let channels = spec.channels;
    let bit_depth = spec.bits_per_sample;
    let sample_format = spec.sample_format;

    if channels == 0 {
        return Err(AudioError::InvalidData);
    }

    let samples: Vec<f32> = match (sample_format, bit_depth) {
        // hound already recenters unsigned 8-bit PCM around zero
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 128.0)
            .collect(),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 32768.0)
            .collect(),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 8388608.0)
            .collect(),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| s as f32 / 2147483648.0)
            .collect(),
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} bit {}-bit audio",
                sample_format, bit_depth
            )));
        }
    };

    let frame_count = samples.len() / channels as usize;

    Ok(AudioData {
        samples,
        sample_rate: spec.sample_rate,
        channels,
        frame_count,
    })
}

fn decode_compressed(path: &Path, extension: Option<&str>) -> Result<AudioSignal, AudioError> {
    let src = fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::UnsupportedFormat("no decodable audio track".to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(AudioError::InvalidData)?;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let channels = spec.channels.count().max(1);
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                mono.extend(downmix(buf.samples(), channels));
            }
            // Corrupt packets are skipped, the rest of the stream is still usable
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet in {}: {}", path.display(), e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(AudioSignal::new(mono, sample_rate))
}

/// Encode a mono signal as 16-bit PCM WAV bytes
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AudioError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            let sample_i16 = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer.write_sample(sample_i16)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_audio_data_to_mono() {
        // Stereo audio: [L, R, L, R, L, R]
        let audio_data = AudioData {
            samples: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
            sample_rate: 44100,
            channels: 2,
            frame_count: 3,
        };

        let mono = audio_data.to_mono();

        assert_eq!(mono.len(), 3);
        assert!((mono[0] - 0.15).abs() < 1e-6);
        assert!((mono[1] - 0.35).abs() < 1e-6);
        assert!((mono[2] - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_signal_duration() {
        let signal = AudioSignal::new(vec![0.0; 44100 * 5], 44100);
        assert_eq!(signal.duration_secs(), 5.0);

        let broken = AudioSignal::new(vec![0.0; 10], 0);
        assert_eq!(broken.duration_secs(), 0.0);
    }

    #[test]
    fn test_wav_encode_then_ingest() {
        let samples: Vec<f32> = (0..800).map(|i| ((i as f32) * 0.05).sin() * 0.5).collect();
        let bytes = encode_wav(&samples, 8000).unwrap();

        let data = ingest_wav(&bytes).unwrap();
        assert_eq!(data.sample_rate, 8000);
        assert_eq!(data.channels, 1);
        assert_eq!(data.frame_count, 800);
        for (a, b) in samples.iter().zip(data.samples.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn test_file_decoder_reads_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        fs::write(&path, encode_wav(&vec![0.25; 1000], 1000).unwrap()).unwrap();

        let signal = FileDecoder::native().decode(&path).unwrap();
        assert_eq!(signal.sample_rate, 1000);
        assert_eq!(signal.len(), 1000);
        assert!((signal.samples[0] - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_file_decoder_missing_file() {
        let result = FileDecoder::default().decode(Path::new("/definitely/not/here.wav"));
        assert!(matches!(result, Err(AudioError::Io(_))));
    }

    #[test]
    fn test_file_decoder_resamples_to_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cd.wav");
        fs::write(&path, encode_wav(&vec![0.25; 44100], 44100).unwrap()).unwrap();

        let decoder = FileDecoder::default();
        assert_eq!(decoder.target_rate(), Some(22050));

        let signal = decoder.decode(&path).unwrap();
        assert_eq!(signal.sample_rate, 22050);
        assert_eq!(signal.len(), 22050);
    }

    #[test]
    fn test_ingest_8bit_wav_is_centered() {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 8,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for sample in [0i8, 64, -64, 0, 127, -128] {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }

        let data = ingest_wav(&cursor.into_inner()).unwrap();
        assert_eq!(data.frame_count, 6);
        let expected = [0.0, 0.5, -0.5, 0.0, 127.0 / 128.0, -1.0];
        for (got, want) in data.samples.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "{} != {}", got, want);
        }
    }
}
