//! MPEG audio Layer III frame header parsing.

/// MPEG version carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg2_5,
}

/// Decoded fields of a 4-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channels: u16,
    /// Whole frame length in bytes, header included.
    pub frame_len: usize,
}

/// Length of the fixed header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest possible Layer III frame (320 kbit/s at 32 kHz, padded).
pub const MAX_FRAME_LEN: usize = 1441;

/// Smallest possible Layer III frame (8 kbit/s at 24 kHz, MPEG-2).
pub const MIN_FRAME_LEN: usize = 24;

const BITRATES_V1: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

impl FrameHeader {
    /// Parse a header from the first four bytes of `bytes`.
    ///
    /// Returns `None` for anything that is not a Layer III header this decoder can size:
    /// bad sync, reserved version/rate, free-format or invalid bitrate, other layers.
    pub fn parse(bytes: &[u8]) -> Option<FrameHeader> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if word >> 21 != 0x7ff {
            return None;
        }
        let version = match (word >> 19) & 0b11 {
            0b00 => MpegVersion::Mpeg2_5,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // Layer bits 0b01 are Layer III.
        if (word >> 17) & 0b11 != 0b01 {
            return None;
        }
        let bitrate_index = ((word >> 12) & 0xf) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let rate_index = ((word >> 10) & 0b11) as usize;
        if rate_index == 3 {
            return None;
        }
        let base_rate = [44_100, 48_000, 32_000][rate_index];
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg2_5 => base_rate / 4,
        };
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => BITRATES_V1[bitrate_index],
            _ => BITRATES_V2[bitrate_index],
        };
        let padding = (word >> 9) & 1 == 1;
        let channels = if (word >> 6) & 0b11 == 0b11 { 1 } else { 2 };

        let coeff = match version {
            MpegVersion::Mpeg1 => 144,
            _ => 72,
        };
        let frame_len =
            (coeff * bitrate_kbps * 1000 / sample_rate) as usize + usize::from(padding);

        Some(FrameHeader {
            version,
            bitrate_kbps,
            sample_rate,
            padding,
            channels,
            frame_len,
        })
    }

    /// PCM frames (per channel) produced by one frame.
    pub fn samples_per_frame(&self) -> u32 {
        match self.version {
            MpegVersion::Mpeg1 => 1152,
            _ => 576,
        }
    }

    /// Playback time covered by one frame, in microseconds.
    pub fn duration_us(&self) -> u64 {
        u64::from(self.samples_per_frame()) * 1_000_000 / u64::from(self.sample_rate)
    }
}

/// Size of an ID3v2 tag at the start of `bytes`, or 0 if none is present.
///
/// The size field is a 28-bit synchsafe integer; a footer adds another 10 bytes.
pub fn id3v2_len(bytes: &[u8]) -> usize {
    if bytes.len() < 10 || &bytes[..3] != b"ID3" {
        return 0;
    }
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7f));
    let footer = if bytes[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

#[cfg(test)]
pub(crate) fn header_bytes(
    version: MpegVersion,
    bitrate_index: u32,
    rate_index: u32,
    padding: bool,
    mono: bool,
) -> [u8; 4] {
    let version_bits = match version {
        MpegVersion::Mpeg1 => 0b11,
        MpegVersion::Mpeg2 => 0b10,
        MpegVersion::Mpeg2_5 => 0b00,
    };
    let mut word: u32 = 0x7ff << 21;
    word |= version_bits << 19;
    word |= 0b01 << 17;
    word |= 1 << 16; // no CRC
    word |= bitrate_index << 12;
    word |= rate_index << 10;
    word |= u32::from(padding) << 9;
    word |= if mono { 0b11 << 6 } else { 0 };
    word.to_be_bytes()
}
