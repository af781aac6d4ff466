//! Millisecond ↔ file offset conversion and the pending-seek slot.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, SessionError};
use crate::format::StreamParams;

/// Maps playback time to absolute file offsets for one open track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionTranslator {
    /// Constant byte rate: exact, frame-aligned conversion.
    Pcm {
        data_offset: u64,
        data_len: u64,
        params: StreamParams,
    },
    /// Variable or unknown bitrate: linear estimate over the audio data.
    Compressed {
        data_offset: u64,
        file_size: u64,
        duration_ms: u64,
    },
}

impl PositionTranslator {
    pub fn duration_ms(&self) -> u64 {
        match *self {
            PositionTranslator::Pcm {
                data_len, params, ..
            } => match params.byte_rate() {
                0 => 0,
                rate => data_len * 1000 / rate,
            },
            PositionTranslator::Compressed { duration_ms, .. } => duration_ms,
        }
    }

    /// Absolute file offset to resume reading from for `ms`.
    ///
    /// PCM offsets land on a sample frame boundary, rounded up so converting back yields
    /// `ms` again. Compressed offsets are clamped into the file.
    pub fn ms_to_byte_offset(&self, ms: u64) -> u64 {
        match *self {
            PositionTranslator::Pcm {
                data_offset,
                data_len,
                params,
            } => {
                let rate = u64::from(params.sample_rate);
                let frames = (ms * rate).div_ceil(1000);
                let rel = (frames * params.frame_bytes()).min(data_len);
                data_offset + rel
            }
            PositionTranslator::Compressed {
                data_offset,
                file_size,
                duration_ms,
            } => {
                let last = file_size.saturating_sub(1).max(data_offset);
                if duration_ms == 0 {
                    return data_offset.min(last);
                }
                let span = file_size.saturating_sub(data_offset);
                let rel = (u128::from(ms) * u128::from(span) / u128::from(duration_ms)) as u64;
                (data_offset + rel).clamp(data_offset.min(last), last)
            }
        }
    }

    /// Playback time corresponding to an absolute file offset.
    pub fn byte_offset_to_ms(&self, offset: u64) -> u64 {
        match *self {
            PositionTranslator::Pcm {
                data_offset,
                params,
                ..
            } => match params.byte_rate() {
                0 => 0,
                rate => offset.saturating_sub(data_offset) * 1000 / rate,
            },
            PositionTranslator::Compressed {
                data_offset,
                file_size,
                duration_ms,
            } => {
                let span = file_size.saturating_sub(data_offset);
                if span == 0 {
                    return 0;
                }
                let rel = offset.saturating_sub(data_offset).min(span);
                (u128::from(rel) * u128::from(duration_ms) / u128::from(span)) as u64
            }
        }
    }
}

/// Target of a relative seek from `current_ms`.
///
/// Backward steps stop at 0. A forward step that would reach the end lands `end_margin_ms`
/// before it instead.
pub fn step_target(current_ms: u64, delta_ms: i64, duration_ms: u64, end_margin_ms: u64) -> u64 {
    if delta_ms < 0 {
        return current_ms.saturating_sub(delta_ms.unsigned_abs());
    }
    let target = current_ms.saturating_add(delta_ms as u64);
    if target >= duration_ms {
        duration_ms.saturating_sub(end_margin_ms)
    } else {
        target
    }
}

const NO_SEEK: u64 = u64::MAX;

/// Single-slot seek request shared by the controller and the refill callback.
#[derive(Debug)]
pub struct PendingSeek {
    target: AtomicU64,
}

impl Default for PendingSeek {
    fn default() -> Self {
        Self {
            target: AtomicU64::new(NO_SEEK),
        }
    }
}

impl PendingSeek {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `offset` unless a previous request is still waiting.
    pub fn request(&self, offset: u64) -> Result<()> {
        let offset = offset.min(NO_SEEK - 1);
        self.target
            .compare_exchange(NO_SEEK, offset, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| SessionError::Busy)
    }

    /// Take the waiting request, clearing the slot.
    pub fn take(&self) -> Option<u64> {
        match self.target.swap(NO_SEEK, Ordering::AcqRel) {
            NO_SEEK => None,
            offset => Some(offset),
        }
    }

    pub fn peek(&self) -> Option<u64> {
        match self.target.load(Ordering::Acquire) {
            NO_SEEK => None,
            offset => Some(offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(sample_rate: u32, channels: u16, bits_per_sample: u16, secs: u64) -> PositionTranslator {
        let params = StreamParams {
            sample_rate,
            channels,
            bits_per_sample,
        };
        PositionTranslator::Pcm {
            data_offset: 44,
            data_len: params.byte_rate() * secs,
            params,
        }
    }

    #[test]
    fn pcm_round_trip_is_exact_and_monotonic() {
        for t in [
            pcm(44_100, 2, 16, 10),
            pcm(44_100, 1, 16, 10),
            pcm(48_000, 2, 24, 10),
            pcm(22_050, 1, 8, 10),
            pcm(8_000, 2, 32, 10),
            pcm(11_025, 1, 16, 10),
        ] {
            let params = match t {
                PositionTranslator::Pcm { params, .. } => params,
                _ => unreachable!(),
            };
            let mut last = 0;
            for ms in (0..t.duration_ms()).step_by(7) {
                let offset = t.ms_to_byte_offset(ms);
                assert_eq!((offset - 44) % params.frame_bytes(), 0);
                let back = t.byte_offset_to_ms(offset);
                assert_eq!(back, ms, "{params} at {ms} ms");
                assert!(back >= last);
                last = back;
            }
        }
    }

    #[test]
    fn pcm_offsets_stay_inside_payload() {
        let t = pcm(44_100, 2, 16, 2);
        assert_eq!(t.ms_to_byte_offset(0), 44);
        assert_eq!(t.ms_to_byte_offset(60_000), 44 + 176_400 * 2);
        assert_eq!(t.duration_ms(), 2000);
    }

    #[test]
    fn compressed_offsets_are_proportional_and_clamped() {
        let t = PositionTranslator::Compressed {
            data_offset: 0,
            file_size: 1_000_000,
            duration_ms: 100_000,
        };
        assert_eq!(t.ms_to_byte_offset(0), 0);
        assert_eq!(t.ms_to_byte_offset(50_000), 500_000);
        assert_eq!(t.ms_to_byte_offset(200_000), 999_999);
        assert_eq!(t.byte_offset_to_ms(250_000), 25_000);
        assert_eq!(t.byte_offset_to_ms(5_000_000), 100_000);
    }

    #[test]
    fn compressed_skips_leading_tag() {
        let t = PositionTranslator::Compressed {
            data_offset: 1000,
            file_size: 11_000,
            duration_ms: 10_000,
        };
        assert_eq!(t.ms_to_byte_offset(0), 1000);
        assert_eq!(t.ms_to_byte_offset(5000), 6000);
        assert_eq!(t.byte_offset_to_ms(500), 0);
    }

    #[test]
    fn unknown_duration_seeks_to_start_of_data() {
        let t = PositionTranslator::Compressed {
            data_offset: 10,
            file_size: 100,
            duration_ms: 0,
        };
        assert_eq!(t.ms_to_byte_offset(5000), 10);
        assert_eq!(t.byte_offset_to_ms(50), 0);
    }

    #[test]
    fn step_backward_clamps_at_zero() {
        assert_eq!(step_target(4_000, -10_000, 60_000, 1_000), 0);
        assert_eq!(step_target(25_000, -10_000, 60_000, 1_000), 15_000);
    }

    #[test]
    fn step_forward_keeps_end_margin() {
        assert_eq!(step_target(55_000, 10_000, 60_000, 1_000), 59_000);
        assert_eq!(step_target(50_000, 10_000, 60_000, 1_000), 59_000);
        assert_eq!(step_target(10_000, 10_000, 60_000, 1_000), 20_000);
        assert!(step_target(59_500, 10_000, 60_000, 1_000) < 60_000);
        assert_eq!(step_target(0, 10_000, 500, 1_000), 0);
    }

    #[test]
    fn second_request_is_busy_until_taken() {
        let seek = PendingSeek::new();
        seek.request(100).unwrap();
        assert!(matches!(seek.request(200), Err(SessionError::Busy)));
        assert_eq!(seek.peek(), Some(100));
        assert_eq!(seek.take(), Some(100));
        assert_eq!(seek.take(), None);
        seek.request(200).unwrap();
        assert_eq!(seek.take(), Some(200));
    }
}
