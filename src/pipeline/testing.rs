// Shared fixtures for pipeline tests
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::Config;
use crate::context::AppContext;
use crate::render::{MuxRequest, VideoMuxer};
use crate::state::init_in_memory;

/// Records every request and writes a placeholder file at the output path
#[derive(Default)]
pub struct RecordingMuxer {
    requests: Mutex<Vec<MuxRequest>>,
}

impl RecordingMuxer {
    pub fn requests(&self) -> Vec<MuxRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl VideoMuxer for RecordingMuxer {
    fn mux(&self, request: &MuxRequest) -> PathBuf {
        std::fs::create_dir_all(request.output.parent().unwrap()).unwrap();
        std::fs::write(&request.output, format!("{:?}", request)).unwrap();
        self.requests.lock().unwrap().push(request.clone());
        request.output.clone()
    }
}

/// Small frames and images so a full run stays fast
pub fn test_context(dir: &Path) -> AppContext {
    let config = Config {
        artifact_root: dir.join("server_data"),
        target_sample_rate: None,
        frame_size: 12000,
        hop_size: 1200,
        image_width: 32,
        image_height: 24,
        ..Config::default()
    };
    config.ensure_directories().unwrap();
    AppContext::with_db(config, init_in_memory().unwrap())
}

/// 16-bit mono sine at 220 Hz
pub fn write_tone_wav(path: &Path, sample_rate: u32, secs: f32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let total = (sample_rate as f32 * secs) as usize;
    for n in 0..total {
        let t = n as f32 / sample_rate as f32;
        let sample = (2.0 * PI * 220.0 * t).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}
