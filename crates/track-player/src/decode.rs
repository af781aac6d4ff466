//! Per-format fill logic used by the refill callback.
//!
//! PCM payload is copied straight from the file. Compressed data is read one chunk at a
//! time, decoded, and whatever does not fit the current buffer is kept for the next one.

use std::fs::File;
use std::io::{self, Read};

use crate::status::{EndReason, PlaybackStatus};

#[cfg(feature = "mp3")]
use crate::mp3::FrameDecoder;
#[cfg(feature = "mp3")]
use crate::mp3::header::{FrameHeader, MAX_FRAME_LEN};

/// Result of one fill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// This many bytes of audio were written.
    Filled(usize),
    /// The stream is over; nothing was written.
    End(EndReason),
}

/// Decoder state owned by one session.
pub enum DecodeContext {
    /// Raw PCM ending at absolute file offset `data_end`.
    Pcm { data_end: u64 },
    #[cfg(feature = "mp3")]
    Mp3(Mp3Stream),
}

impl DecodeContext {
    /// Write the next audio bytes into `out`, advancing `position` by the source bytes read.
    #[cfg_attr(not(feature = "mp3"), allow(unused_variables))]
    pub fn fill(
        &mut self,
        file: &mut File,
        position: &mut u64,
        out: &mut [u8],
        status: &PlaybackStatus,
    ) -> FillOutcome {
        match self {
            DecodeContext::Pcm { data_end } => fill_pcm(file, *data_end, position, out),
            #[cfg(feature = "mp3")]
            DecodeContext::Mp3(stream) => stream.fill(file, position, out, status),
        }
    }

    /// Drop buffered state after the file cursor moved.
    pub fn reset(&mut self) {
        match self {
            DecodeContext::Pcm { .. } => {}
            #[cfg(feature = "mp3")]
            DecodeContext::Mp3(stream) => stream.reset(),
        }
    }
}

fn fill_pcm(file: &mut File, data_end: u64, position: &mut u64, out: &mut [u8]) -> FillOutcome {
    let remaining = data_end.saturating_sub(*position);
    let want = (out.len() as u64).min(remaining) as usize;
    if want == 0 {
        return FillOutcome::End(EndReason::Eof);
    }
    match read_full(file, &mut out[..want]) {
        Ok(got) => {
            *position += got as u64;
            if got < want {
                tracing::debug!(got, want, "short PCM read");
                FillOutcome::End(EndReason::Eof)
            } else {
                FillOutcome::Filled(got)
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "PCM read failed");
            FillOutcome::End(EndReason::ReadFailed)
        }
    }
}

/// Read until `buf` is full or the file ends.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Compressed stream state: the frame decoder plus decoded bytes not yet delivered.
#[cfg(feature = "mp3")]
pub struct Mp3Stream {
    decoder: FrameDecoder,
    chunk: Vec<u8>,
    backlog: Vec<u8>,
    backlog_pos: usize,
}

#[cfg(feature = "mp3")]
impl Mp3Stream {
    pub fn new(
        chunk_bytes: usize,
        scratch_samples: usize,
        first_frame: Option<&FrameHeader>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            decoder: FrameDecoder::new(scratch_samples, first_frame)?,
            chunk: vec![0; chunk_bytes.max(1)],
            backlog: Vec::new(),
            backlog_pos: 0,
        })
    }

    fn fill(
        &mut self,
        file: &mut File,
        position: &mut u64,
        out: &mut [u8],
        status: &PlaybackStatus,
    ) -> FillOutcome {
        if self.backlog_pos < self.backlog.len() {
            let pending = &self.backlog[self.backlog_pos..];
            let n = pending.len().min(out.len());
            out[..n].copy_from_slice(&pending[..n]);
            self.backlog_pos += n;
            return FillOutcome::Filled(n);
        }

        // One chunk normally suffices; tiny chunks may need a few to complete a frame.
        let budget = self.chunk.len().max(2 * MAX_FRAME_LEN);
        let mut read_total = 0;
        loop {
            let n = match file.read(&mut self.chunk) {
                Ok(0) => return FillOutcome::End(EndReason::Eof),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "compressed read failed");
                    return FillOutcome::End(EndReason::ReadFailed);
                }
            };
            *position += n as u64;
            read_total += n;

            let pcm = self.decoder.decode_chunk(&self.chunk[..n]);
            if !pcm.is_empty() {
                let written = split_pcm(pcm, out, &mut self.backlog);
                self.backlog_pos = 0;
                self.publish(status);
                return FillOutcome::Filled(written);
            }
            if read_total >= budget {
                self.publish(status);
                tracing::warn!(bytes = read_total, "no audio decoded from chunk");
                return FillOutcome::End(EndReason::DecodeFailed);
            }
        }
    }

    fn publish(&mut self, status: &PlaybackStatus) {
        if let Some(params) = self.decoder.take_params() {
            let current = status.params();
            if params != current {
                tracing::info!(from = %current, to = %params, "stream parameters refined");
            }
            status.set_params(params);
        }
        status.store_decoder_stats(self.decoder.stats());
    }

    fn reset(&mut self) {
        self.decoder.reset();
        self.backlog.clear();
        self.backlog_pos = 0;
    }
}

/// Write samples as little-endian bytes into `out`; the remainder goes to `backlog`.
#[cfg(feature = "mp3")]
fn split_pcm(pcm: &[i16], out: &mut [u8], backlog: &mut Vec<u8>) -> usize {
    let fits = (out.len() / 2).min(pcm.len());
    for (dst, s) in out.chunks_exact_mut(2).zip(&pcm[..fits]) {
        dst.copy_from_slice(&s.to_le_bytes());
    }
    backlog.clear();
    for s in &pcm[fits..] {
        backlog.extend_from_slice(&s.to_le_bytes());
    }
    fits * 2
}
