use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::format::{AudioFormat, StreamParams};
use crate::state::SessionState;

/// Why the stream stopped producing audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Natural end of the file.
    Eof,
    /// A compressed chunk was read but no PCM could be decoded from it.
    DecodeFailed,
    /// Reading or seeking the source failed.
    ReadFailed,
    /// The output rejected a buffer or its message loop failed.
    OutputFailed,
    /// Playback was explicitly stopped by the controller.
    Stopped,
}

impl EndReason {
    fn to_u8(self) -> u8 {
        match self {
            EndReason::Eof => 1,
            EndReason::DecodeFailed => 2,
            EndReason::ReadFailed => 3,
            EndReason::Stopped => 4,
            EndReason::OutputFailed => 5,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(EndReason::Eof),
            2 => Some(EndReason::DecodeFailed),
            3 => Some(EndReason::ReadFailed),
            4 => Some(EndReason::Stopped),
            5 => Some(EndReason::OutputFailed),
            _ => None,
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EndReason::Eof => "eof",
            EndReason::DecodeFailed => "decode failed",
            EndReason::ReadFailed => "read failed",
            EndReason::Stopped => "stopped",
            EndReason::OutputFailed => "output failed",
        };
        f.write_str(s)
    }
}

/// Frame decoder counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    /// Frames dropped on recoverable decode errors.
    pub frames_skipped: u64,
    /// Samples that did not fit the PCM scratch.
    pub truncated_samples: u64,
    /// Bytes discarded while searching for frame sync.
    pub resync_bytes: u64,
}

/// Playback state shared between the controller and the refill callback.
///
/// Written by the refill side, read by anyone; every field is a plain atomic so the audio
/// path never takes a lock to publish progress.
#[derive(Debug)]
pub struct PlaybackStatus {
    /// Absolute offset of the next source byte to be consumed.
    pub file_position: AtomicU64,
    /// Whether the source file is still open.
    pub source_open: AtomicBool,
    sample_rate: AtomicU32,
    channels: AtomicU32,
    bits_per_sample: AtomicU32,
    /// Buffers handed back to the output with data.
    pub refills: AtomicU64,
    /// PCM bytes written into output buffers.
    pub bytes_delivered: AtomicU64,
    /// Set once the output reports that the last buffer finished playing.
    pub finished: AtomicBool,
    end_reason: AtomicU8,
    frames_decoded: AtomicU64,
    frames_skipped: AtomicU64,
    truncated_samples: AtomicU64,
    resync_bytes: AtomicU64,
}

impl PlaybackStatus {
    pub fn new(params: StreamParams, file_position: u64) -> Self {
        Self {
            file_position: AtomicU64::new(file_position),
            source_open: AtomicBool::new(true),
            sample_rate: AtomicU32::new(params.sample_rate),
            channels: AtomicU32::new(u32::from(params.channels)),
            bits_per_sample: AtomicU32::new(u32::from(params.bits_per_sample)),
            refills: AtomicU64::new(0),
            bytes_delivered: AtomicU64::new(0),
            finished: AtomicBool::new(false),
            end_reason: AtomicU8::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            truncated_samples: AtomicU64::new(0),
            resync_bytes: AtomicU64::new(0),
        }
    }

    pub fn params(&self) -> StreamParams {
        StreamParams {
            sample_rate: self.sample_rate.load(Ordering::Relaxed),
            channels: self.channels.load(Ordering::Relaxed) as u16,
            bits_per_sample: self.bits_per_sample.load(Ordering::Relaxed) as u16,
        }
    }

    pub fn set_params(&self, params: StreamParams) {
        self.sample_rate.store(params.sample_rate, Ordering::Relaxed);
        self.channels
            .store(u32::from(params.channels), Ordering::Relaxed);
        self.bits_per_sample
            .store(u32::from(params.bits_per_sample), Ordering::Relaxed);
    }

    /// Record the end reason; the first reason wins.
    pub fn set_end_reason(&self, reason: EndReason) {
        let _ = self.end_reason.compare_exchange(
            0,
            reason.to_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        EndReason::from_u8(self.end_reason.load(Ordering::Acquire))
    }

    pub fn store_decoder_stats(&self, stats: DecoderStats) {
        self.frames_decoded
            .store(stats.frames_decoded, Ordering::Relaxed);
        self.frames_skipped
            .store(stats.frames_skipped, Ordering::Relaxed);
        self.truncated_samples
            .store(stats.truncated_samples, Ordering::Relaxed);
        self.resync_bytes.store(stats.resync_bytes, Ordering::Relaxed);
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            truncated_samples: self.truncated_samples.load(Ordering::Relaxed),
            resync_bytes: self.resync_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a session for logs and the CLI.
#[derive(Clone, Debug)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub format: AudioFormat,
    pub params: StreamParams,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub file_position: u64,
    pub source_open: bool,
    pub finished: bool,
    pub end_reason: Option<EndReason>,
    pub volume: u8,
    pub refills: u64,
    pub bytes_delivered: u64,
    pub underrun_events: u64,
    pub decoder: DecoderStats,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] {}/{} ms vol={}",
            self.state,
            self.format,
            self.params,
            self.position_ms,
            self.duration_ms,
            self.volume
        )?;
        if let Some(reason) = self.end_reason {
            write!(f, " end={reason}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_end_reason_wins() {
        let status = PlaybackStatus::new(StreamParams::PROVISIONAL, 0);
        assert!(status.end_reason().is_none());
        status.set_end_reason(EndReason::Eof);
        status.set_end_reason(EndReason::Stopped);
        assert_eq!(status.end_reason(), Some(EndReason::Eof));
    }

    #[test]
    fn params_round_trip_through_atomics() {
        let status = PlaybackStatus::new(StreamParams::PROVISIONAL, 44);
        let p = StreamParams {
            sample_rate: 22_050,
            channels: 1,
            bits_per_sample: 8,
        };
        status.set_params(p);
        assert_eq!(status.params(), p);
        assert_eq!(status.file_position.load(Ordering::Relaxed), 44);
    }

    #[test]
    fn decoder_stats_are_published() {
        let status = PlaybackStatus::new(StreamParams::PROVISIONAL, 0);
        let stats = DecoderStats {
            frames_decoded: 10,
            frames_skipped: 1,
            truncated_samples: 7,
            resync_bytes: 3,
        };
        status.store_decoder_stats(stats);
        assert_eq!(status.decoder_stats(), stats);
    }

    #[test]
    fn snapshot_display_mentions_end_reason() {
        let snap = StatusSnapshot {
            state: SessionState::Stopped,
            format: AudioFormat::Pcm,
            params: StreamParams::PROVISIONAL,
            position_ms: 1500,
            duration_ms: 2000,
            file_position: 0,
            source_open: false,
            finished: true,
            end_reason: Some(EndReason::Eof),
            volume: 30,
            refills: 3,
            bytes_delivered: 0,
            underrun_events: 0,
            decoder: DecoderStats::default(),
        };
        let line = snap.to_string();
        assert!(line.starts_with("stopped WAV"));
        assert!(line.contains("1500/2000 ms"));
        assert!(line.ends_with("end=eof"));
    }
}
