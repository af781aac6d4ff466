//! Per-session Layer III frame decoder.
//!
//! Frames are cut out of the byte stream by [`FrameSync`] and handed one at a time to
//! Symphonia's MPEG audio decoder. Output is interleaved stereo `i16`, written into a
//! fixed-capacity scratch.

use anyhow::{Result, anyhow};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error;
use symphonia::core::formats::Packet;

use super::header::FrameHeader;
use super::sync::FrameSync;
use crate::format::StreamParams;
use crate::status::DecoderStats;

/// Convert a normalized sample to 16 bits, rounding to nearest and saturating.
pub fn pcm_from_f32(sample: f32) -> i16 {
    let scaled = (sample * 32768.0).round();
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

/// Fixed-capacity sample store; anything past capacity is dropped and counted.
#[derive(Debug)]
struct PcmScratch {
    samples: Vec<i16>,
    capacity: usize,
    truncated: u64,
}

impl PcmScratch {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            truncated: 0,
        }
    }

    fn push(&mut self, sample: i16) {
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.truncated += 1;
        }
    }
}

pub struct FrameDecoder {
    sync: FrameSync,
    codec: Box<dyn Decoder>,
    scratch: PcmScratch,
    ts: u64,
    params: Option<StreamParams>,
    params_reported: bool,
    frames_decoded: u64,
    frames_skipped: u64,
}

impl FrameDecoder {
    /// Build a decoder whose scratch holds at most `capacity` samples.
    ///
    /// `first_frame`, when known from a probe, seeds the codec parameters.
    pub fn new(capacity: usize, first_frame: Option<&FrameHeader>) -> Result<Self> {
        let (rate, channels) = first_frame
            .map(|h| (h.sample_rate, h.channels))
            .unwrap_or((StreamParams::PROVISIONAL.sample_rate, 2));
        let layout = if channels == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        };
        let mut codec_params = CodecParameters::new();
        codec_params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(rate)
            .with_channels(layout);
        let codec = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| anyhow!("mp3 codec unavailable: {e}"))?;

        Ok(Self {
            sync: FrameSync::new(),
            codec,
            scratch: PcmScratch::new(capacity),
            ts: 0,
            params: None,
            params_reported: false,
            frames_decoded: 0,
            frames_skipped: 0,
        })
    }

    /// Decode every complete frame in the carried bytes plus `raw`.
    ///
    /// The returned slice is interleaved L/R and valid until the next call. An incomplete
    /// trailing frame stays buffered for the next call.
    pub fn decode_chunk(&mut self, raw: &[u8]) -> &[i16] {
        self.scratch.samples.clear();
        self.sync.push(raw);

        while let Some((header, frame)) = self.sync.next_frame() {
            let packet = Packet::new_from_slice(
                0,
                self.ts,
                u64::from(header.samples_per_frame()),
                frame,
            );
            self.ts += u64::from(header.samples_per_frame());

            let decoded = match self.codec.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::DecodeError(msg)) => {
                    self.frames_skipped += 1;
                    tracing::debug!(reason = msg, "skipping undecodable frame");
                    continue;
                }
                Err(Error::IoError(e)) => {
                    self.frames_skipped += 1;
                    tracing::debug!(error = %e, "skipping truncated frame");
                    continue;
                }
                Err(Error::ResetRequired) => {
                    self.frames_skipped += 1;
                    self.codec.reset();
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "mp3 decode stopped");
                    break;
                }
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count();
            if channels == 0 {
                self.frames_skipped += 1;
                continue;
            }
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            for frame in sample_buf.samples().chunks_exact(channels) {
                let left = pcm_from_f32(frame[0]);
                let right = if channels == 1 { left } else { pcm_from_f32(frame[1]) };
                self.scratch.push(left);
                self.scratch.push(right);
            }

            self.frames_decoded += 1;
            if self.params.is_none() {
                self.params = Some(StreamParams {
                    sample_rate: spec.rate,
                    channels: 2,
                    bits_per_sample: 16,
                });
            }
        }

        &self.scratch.samples
    }

    /// Parameters of the first decoded frame, returned once.
    pub fn take_params(&mut self) -> Option<StreamParams> {
        if self.params_reported {
            return None;
        }
        let params = self.params?;
        self.params_reported = true;
        Some(params)
    }

    /// Forget the bitstream position and synthesis history (after a seek).
    pub fn reset(&mut self) {
        self.sync.reset();
        self.codec.reset();
        self.scratch.samples.clear();
    }

    pub fn truncated_samples(&self) -> u64 {
        self.scratch.truncated
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_skipped: self.frames_skipped,
            truncated_samples: self.scratch.truncated,
            resync_bytes: self.sync.skipped_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::header::{MpegVersion, header_bytes};
    use super::*;

    fn silent_frames(count: usize) -> Vec<u8> {
        let raw = header_bytes(MpegVersion::Mpeg1, 9, 0, false, false);
        let len = FrameHeader::parse(&raw).unwrap().frame_len;
        let mut out = Vec::new();
        for _ in 0..count {
            let start = out.len();
            out.extend_from_slice(&raw);
            out.resize(start + len, 0);
        }
        out
    }

    #[test]
    fn pcm_conversion_rounds_and_saturates() {
        assert_eq!(pcm_from_f32(0.0), 0);
        assert_eq!(pcm_from_f32(0.5), 16384);
        assert_eq!(pcm_from_f32(-0.5), -16384);
        assert_eq!(pcm_from_f32(1.0), i16::MAX);
        assert_eq!(pcm_from_f32(-1.0), i16::MIN);
        assert_eq!(pcm_from_f32(3.0), i16::MAX);
        assert_eq!(pcm_from_f32(-3.0), i16::MIN);
        assert_eq!(pcm_from_f32(1.6 / 32768.0), 2);
        assert_eq!(pcm_from_f32(1.4 / 32768.0), 1);
    }

    #[test]
    fn scratch_counts_dropped_samples() {
        let mut scratch = PcmScratch::new(3);
        for s in 0..5 {
            scratch.push(s);
        }
        assert_eq!(scratch.samples, vec![0, 1, 2]);
        assert_eq!(scratch.truncated, 2);
    }

    #[test]
    fn output_never_exceeds_capacity() {
        let mut dec = FrameDecoder::new(100, None).unwrap();
        let produced = dec.decode_chunk(&silent_frames(4)).len();
        assert!(produced <= 100);
        let stats = dec.stats();
        assert_eq!(
            produced as u64 + stats.truncated_samples,
            stats.frames_decoded * 1152 * 2
        );
    }

    #[test]
    fn decoded_output_is_interleaved_stereo() {
        let mut dec = FrameDecoder::new(1 << 16, None).unwrap();
        let out = dec.decode_chunk(&silent_frames(3)).to_vec();
        assert_eq!(out.len() % 2, 0);
        assert!(!out.is_empty());
        assert!(out.iter().all(|&s| s == 0));
        let params = dec.take_params().unwrap();
        assert_eq!(params.sample_rate, 44_100);
        assert_eq!(params.channels, 2);
        assert!(dec.take_params().is_none());
    }

    #[test]
    fn garbage_produces_no_samples() {
        let mut dec = FrameDecoder::new(1024, None).unwrap();
        assert!(dec.decode_chunk(&[0x55; 4096]).is_empty());
        assert_eq!(dec.stats().frames_decoded, 0);
        assert!(dec.stats().resync_bytes > 0);
    }
}
