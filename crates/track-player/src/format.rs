//! Audio format detection by file extension.

use std::fmt;
use std::path::Path;

/// Decodable source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// RIFF/WAVE with a linear PCM payload.
    Pcm,
    /// MPEG audio Layer III frames.
    Compressed,
    Unknown,
}

impl AudioFormat {
    /// Short label used in logs and status output.
    pub fn label(self) -> &'static str {
        match self {
            AudioFormat::Pcm => "WAV",
            AudioFormat::Compressed => "MP3",
            AudioFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// PCM layout the output is initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl StreamParams {
    /// Used for compressed sources until the first frame header is known.
    pub const PROVISIONAL: StreamParams = StreamParams {
        sample_rate: 44_100,
        channels: 2,
        bits_per_sample: 16,
    };

    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> u64 {
        u64::from(self.channels) * u64::from(self.bits_per_sample / 8)
    }

    /// Bytes per second of playback.
    pub fn byte_rate(&self) -> u64 {
        u64::from(self.sample_rate) * self.frame_bytes()
    }
}

impl fmt::Display for StreamParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {} bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Classify `path` by its last four characters, ignoring ASCII case.
///
/// No I/O is performed. Paths shorter than four characters are [`AudioFormat::Unknown`].
pub fn detect(path: &Path) -> AudioFormat {
    let name = path.to_string_lossy();
    let bytes = name.as_bytes();
    if bytes.len() < 4 {
        return AudioFormat::Unknown;
    }
    let ext = &bytes[bytes.len() - 4..];
    if ext.eq_ignore_ascii_case(b".wav") {
        AudioFormat::Pcm
    } else if cfg!(feature = "mp3") && ext.eq_ignore_ascii_case(b".mp3") {
        AudioFormat::Compressed
    } else {
        AudioFormat::Unknown
    }
}
