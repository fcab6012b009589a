// Audio processing module
// Decoding, slicing, frame segmentation and spectral features

pub mod features;
pub mod ingest;
pub mod resample;
pub mod segment;
pub mod slice;

pub use features::{FeatureError, FeatureExtractor, FeatureKind, FeatureMatrix, FeatureSet, SpectralFeatures};
pub use ingest::{encode_wav, ingest_wav, AudioDecoder, AudioError, AudioSignal, FileDecoder};
pub use resample::{resample, DEFAULT_SAMPLE_RATE};
pub use segment::{split_to_frames, Frame, SegmentError};
pub use slice::{extract_centered_slice, SliceLength};
