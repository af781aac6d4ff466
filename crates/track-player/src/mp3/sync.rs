//! Bitstream cursor that splits arbitrary byte chunks into whole Layer III frames.
//!
//! Chunks read from the file rarely end on a frame boundary. The cursor keeps the tail of
//! the previous chunk and hands out a frame only once all of its bytes are present.

use super::header::{FrameHeader, HEADER_LEN};

#[derive(Debug, Default)]
pub struct FrameSync {
    buf: Vec<u8>,
    pos: usize,
    locked: bool,
    skipped: u64,
}

impl FrameSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes behind whatever is still unconsumed.
    pub fn push(&mut self, bytes: &[u8]) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet handed out as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bytes discarded while hunting for a frame header.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Whether the last frame was accepted without having to resynchronize.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Drop all buffered data and forget the sync position (used after a seek).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.locked = false;
    }

    /// Next complete frame, or `None` when more input is needed.
    pub fn next_frame(&mut self) -> Option<(FrameHeader, &[u8])> {
        loop {
            let avail = &self.buf[self.pos..];
            let Some(offset) = find_sync(avail) else {
                // Keep a possible partial header at the very end.
                let keep = avail.len().min(HEADER_LEN - 1);
                let dropped = avail.len() - keep;
                if dropped > 0 {
                    self.skipped += dropped as u64;
                    self.locked = false;
                }
                self.pos = self.buf.len() - keep;
                return None;
            };
            if offset > 0 {
                self.skipped += offset as u64;
                self.pos += offset;
                self.locked = false;
            }

            let avail = &self.buf[self.pos..];
            let header = FrameHeader::parse(avail)?;
            if avail.len() < header.frame_len {
                return None;
            }

            // A fresh sync point must be confirmed by the header that follows it, when the
            // bytes are already here. Once locked, frames are taken as they come.
            if !self.locked {
                let next = &avail[header.frame_len..];
                if next.len() >= HEADER_LEN && !same_stream(&header, next) {
                    self.pos += 1;
                    self.skipped += 1;
                    continue;
                }
            }

            self.locked = true;
            let start = self.pos;
            self.pos += header.frame_len;
            return Some((header, &self.buf[start..start + header.frame_len]));
        }
    }
}

/// Offset of the first plausible header, or of a trailing partial header.
fn find_sync(bytes: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0xff {
            match bytes.get(i + 1) {
                None => return Some(i),
                Some(b) if b & 0xe0 == 0xe0 => {
                    if bytes.len() - i < HEADER_LEN || FrameHeader::parse(&bytes[i..]).is_some() {
                        return Some(i);
                    }
                }
                Some(_) => {}
            }
        }
        i += 1;
    }
    None
}

fn same_stream(header: &FrameHeader, next: &[u8]) -> bool {
    match FrameHeader::parse(next) {
        Some(h) => h.version == header.version && h.sample_rate == header.sample_rate,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::header::{MpegVersion, header_bytes};
    use super::*;

    fn frame(fill: u8) -> Vec<u8> {
        let raw = header_bytes(MpegVersion::Mpeg1, 9, 0, false, false);
        let len = FrameHeader::parse(&raw).unwrap().frame_len;
        let mut f = raw.to_vec();
        f.resize(len, fill);
        f
    }

    #[test]
    fn splits_frames_across_chunk_boundaries() {
        let mut stream = Vec::new();
        for n in 0..3 {
            stream.extend(frame(n));
        }
        let mut sync = FrameSync::new();
        let mut seen = Vec::new();
        for chunk in stream.chunks(100) {
            sync.push(chunk);
            while let Some((h, bytes)) = sync.next_frame() {
                assert_eq!(bytes.len(), h.frame_len);
                seen.push(bytes[HEADER_LEN]);
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(sync.buffered(), 0);
        assert_eq!(sync.skipped_bytes(), 0);
    }

    #[test]
    fn skips_leading_garbage() {
        let mut stream = vec![0x12, 0x34, 0xff, 0x00, 0x56];
        stream.extend(frame(7));
        stream.extend(frame(8));
        let mut sync = FrameSync::new();
        sync.push(&stream);
        let (_, first) = sync.next_frame().unwrap();
        assert_eq!(first[HEADER_LEN], 7);
        assert_eq!(sync.skipped_bytes(), 5);
        assert!(sync.is_locked());
    }

    #[test]
    fn rejects_false_sync_not_followed_by_header() {
        // A header-shaped word whose "next frame" is garbage.
        let mut stream = frame(0);
        stream.extend(vec![0x00; 420]);
        let mut sync = FrameSync::new();
        sync.push(&stream);
        assert!(sync.next_frame().is_none());
        assert!(sync.skipped_bytes() > 0);
    }

    #[test]
    fn incomplete_frame_waits_for_more_input() {
        let f = frame(3);
        let mut sync = FrameSync::new();
        sync.push(&f[..200]);
        assert!(sync.next_frame().is_none());
        assert_eq!(sync.buffered(), 200);
        sync.push(&f[200..]);
        let (_, bytes) = sync.next_frame().unwrap();
        assert_eq!(bytes.len(), f.len());
    }

    #[test]
    fn reset_drops_partial_state() {
        let f = frame(3);
        let mut sync = FrameSync::new();
        sync.push(&f[..10]);
        sync.reset();
        assert_eq!(sync.buffered(), 0);
        assert!(!sync.is_locked());
    }
}
