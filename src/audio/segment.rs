// Frame segmentation
// Splits a signal into frame index ranges; the first frame also spans the hop region

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("Frame size must be greater than zero")]
    ZeroFrameSize,

    #[error("Hop size {hop_size} exceeds frame size {frame_size}")]
    HopExceedsFrame { frame_size: usize, hop_size: usize },
}

/// Half-open sample range `[start, end)` into a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub start: usize,
    pub end: usize,
}

impl Frame {
    pub fn new(start: usize, end: usize) -> Self {
        Frame { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the frame's samples, clamping the end to the signal length
    pub fn slice<'a>(&self, signal: &'a [f32]) -> &'a [f32] {
        let end = self.end.min(signal.len());
        let start = self.start.min(end);
        &signal[start..end]
    }
}

/// Compute frame ranges for a signal of `signal_len` samples.
///
/// `frame_count = signal_len / frame_size`; frame 0 is `(0, frame_size + hop_size)`,
/// frame `i` is `(i * frame_size - hop_size, (i + 1) * frame_size)`.
pub fn split_to_frames(
    frame_size: usize,
    hop_size: usize,
    signal_len: usize,
) -> Result<Vec<Frame>, SegmentError> {
    if frame_size == 0 {
        return Err(SegmentError::ZeroFrameSize);
    }

    let frame_count = signal_len / frame_size;
    if frame_count >= 2 && hop_size > frame_size {
        return Err(SegmentError::HopExceedsFrame {
            frame_size,
            hop_size,
        });
    }

    let frames = (0..frame_count)
        .map(|i| {
            if i == 0 {
                Frame::new(0, frame_size + hop_size)
            } else {
                Frame::new(i * frame_size - hop_size, (i + 1) * frame_size)
            }
        })
        .collect();

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count_and_ranges() {
        let frames = split_to_frames(100, 10, 1050).unwrap();

        assert_eq!(frames.len(), 10);
        assert_eq!(frames[0], Frame::new(0, 110));
        assert_eq!(frames[1], Frame::new(90, 200));
        assert_eq!(frames[9], Frame::new(890, 1000));
    }

    #[test]
    fn test_formula_holds_across_sizes() {
        for &(frame_size, hop_size, len) in &[
            (22050, 2205, 661500),
            (4096, 512, 661500),
            (7, 0, 50),
            (3, 3, 3),
        ] {
            let frames = split_to_frames(frame_size, hop_size, len).unwrap();
            assert_eq!(frames.len(), len / frame_size);
            for (i, frame) in frames.iter().enumerate() {
                if i == 0 {
                    assert_eq!(*frame, Frame::new(0, frame_size + hop_size));
                } else {
                    assert_eq!(frame.start, i * frame_size - hop_size);
                    assert_eq!(frame.end, (i + 1) * frame_size);
                }
            }
        }
    }

    #[test]
    fn test_frame_overlap() {
        let frames = split_to_frames(50, 5, 500).unwrap();
        for (i, pair) in frames.windows(2).enumerate() {
            let overlap = pair[0].end - pair[1].start;
            // frame 0 reaches hop_size past its end as well
            let expected = if i == 0 { 10 } else { 5 };
            assert_eq!(overlap, expected, "pair {}", i);
        }
    }

    #[test]
    fn test_short_signal_is_empty() {
        assert!(split_to_frames(100, 10, 99).unwrap().is_empty());
        assert!(split_to_frames(100, 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_zero_frame_size_fails() {
        assert_eq!(split_to_frames(0, 10, 100), Err(SegmentError::ZeroFrameSize));
    }

    #[test]
    fn test_hop_larger_than_frame_fails() {
        let err = split_to_frames(10, 20, 100).unwrap_err();
        assert_eq!(
            err,
            SegmentError::HopExceedsFrame {
                frame_size: 10,
                hop_size: 20
            }
        );

        // a single frame never needs a negative start
        assert_eq!(split_to_frames(10, 20, 15).unwrap().len(), 1);
    }

    #[test]
    fn test_slice_clamps_to_signal() {
        let signal = vec![1.0; 100];
        let frames = split_to_frames(100, 20, signal.len()).unwrap();
        assert_eq!(frames[0].len(), 120);
        assert_eq!(frames[0].slice(&signal).len(), 100);
    }
}
