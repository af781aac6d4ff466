//! MPEG audio Layer III support: frame headers, bitstream sync and (with the `mp3` feature)
//! the frame decoder.

pub mod header;
pub mod sync;

#[cfg(feature = "mp3")]
mod decoder;

#[cfg(feature = "mp3")]
pub use decoder::{FrameDecoder, pcm_from_f32};

use std::io::{self, Read, Seek, SeekFrom};

use self::header::{FrameHeader, MAX_FRAME_LEN, MIN_FRAME_LEN};
use self::sync::FrameSync;

/// Upper bound of interleaved stereo samples one pass over `chunk_bytes` can produce.
///
/// The densest stream is MPEG-2 at 8 kbit/s: 576 samples per 24-byte frame. A chunk can also
/// complete a frame carried over from the previous chunk, hence the extra frame of input.
pub fn worst_case_samples(chunk_bytes: usize) -> usize {
    let frames = (chunk_bytes + MAX_FRAME_LEN) / MIN_FRAME_LEN + 1;
    frames * 576 * 2
}

/// What a scan of the file head (and optionally the whole file) tells us before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamProbe {
    /// Offset of the first byte after any leading ID3v2 tag.
    pub data_offset: u64,
    /// Header of the first frame found, if any.
    pub first_frame: Option<FrameHeader>,
    /// Total duration from summing frame durations, when a full scan was requested.
    pub duration_ms: Option<u64>,
}

const PROBE_CHUNK: usize = 64 * 1024;

/// Locate the audio data and the first frame, optionally walking every frame to sum the
/// playing time. Leaves the reader at `data_offset`.
pub fn probe<R: Read + Seek>(reader: &mut R, scan_duration: bool) -> io::Result<StreamProbe> {
    reader.seek(SeekFrom::Start(0))?;
    let mut head = [0u8; 10];
    let n = crate::decode::read_full(reader, &mut head)?;
    let data_offset = header::id3v2_len(&head[..n]) as u64;

    reader.seek(SeekFrom::Start(data_offset))?;
    let mut sync = FrameSync::new();
    let mut chunk = vec![0u8; PROBE_CHUNK];
    let mut first_frame = None;
    let mut total_us = 0u64;

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        sync.push(&chunk[..n]);
        while let Some((h, _)) = sync.next_frame() {
            first_frame.get_or_insert(h);
            total_us += h.duration_us();
        }
        if first_frame.is_some() && !scan_duration {
            break;
        }
    }

    reader.seek(SeekFrom::Start(data_offset))?;
    let duration_ms = if scan_duration && first_frame.is_some() {
        Some(total_us / 1000)
    } else {
        None
    };
    Ok(StreamProbe {
        data_offset,
        first_frame,
        duration_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::header::{MpegVersion, header_bytes};
    use super::*;
    use std::io::Cursor;

    fn frames(count: usize) -> Vec<u8> {
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
    fn worst_case_covers_densest_stream() {
        // 8 KiB of 24-byte frames plus one carried frame, stereo.
        assert!(worst_case_samples(8192) >= (8192 / 24 + 1) * 576 * 2);
    }

    #[test]
    fn probe_skips_id3_and_sums_durations() {
        let mut data = vec![b'I', b'D', b'3', 3, 0, 0, 0, 0, 0, 20];
        data.resize(30, 0);
        data.extend(frames(100));
        let mut cur = Cursor::new(data);
        let probe = probe(&mut cur, true).unwrap();
        assert_eq!(probe.data_offset, 30);
        assert_eq!(probe.first_frame.unwrap().sample_rate, 44_100);
        // 100 frames * 26.122 ms
        assert_eq!(probe.duration_ms, Some(2612));
        assert_eq!(cur.position(), 30);
    }

    #[test]
    fn probe_without_frames_finds_nothing() {
        let mut cur = Cursor::new(vec![0u8; 4096]);
        let probe = probe(&mut cur, true).unwrap();
        assert_eq!(probe.data_offset, 0);
        assert!(probe.first_frame.is_none());
        assert!(probe.duration_ms.is_none());
    }
}
