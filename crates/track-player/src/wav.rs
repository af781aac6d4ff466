//! Canonical 44-byte RIFF/WAVE header reader.
//!
//! Only the fixed layout is understood: `RIFF` / `WAVE`, a 16-byte `fmt ` chunk with linear
//! PCM, then the `data` chunk. The payload after the header is passed through untouched.

use std::io::Read;

use anyhow::{Context, Result, bail};

use crate::format::StreamParams;

pub const HEADER_LEN: usize = 44;

const WAVE_FORMAT_PCM: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub params: StreamParams,
    /// Payload length in bytes as declared by the `data` chunk.
    pub data_len: u64,
}

impl WavHeader {
    /// Offset of the first payload byte.
    pub const DATA_OFFSET: u64 = HEADER_LEN as u64;

    /// Read the header region in one go; on success the reader sits at the payload start.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut raw)
            .context("short RIFF/WAVE header")?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        if &raw[0..4] != b"RIFF" || &raw[8..12] != b"WAVE" {
            bail!("not a RIFF/WAVE file");
        }
        if &raw[12..16] != b"fmt " {
            bail!("missing fmt chunk");
        }
        if &raw[36..40] != b"data" {
            bail!("data chunk does not follow a 16-byte fmt chunk");
        }
        let audio_format = u16_at(raw, 20);
        if audio_format != WAVE_FORMAT_PCM {
            bail!("unsupported WAVE encoding {audio_format:#06x}");
        }
        let channels = u16_at(raw, 22);
        let sample_rate = u32_at(raw, 24);
        let bits_per_sample = u16_at(raw, 34);
        if channels == 0 || sample_rate == 0 {
            bail!("zero channels or sample rate");
        }
        if !matches!(bits_per_sample, 8 | 16 | 24 | 32) {
            bail!("unsupported bit depth {bits_per_sample}");
        }

        Ok(Self {
            params: StreamParams {
                sample_rate,
                channels,
                bits_per_sample,
            },
            data_len: u64::from(u32_at(raw, 40)),
        })
    }

    /// Cap the declared payload to what the file actually holds.
    ///
    /// Streaming writers leave the size at 0 or `u32::MAX`; both mean "until end of file".
    pub fn fit_to_file(&mut self, file_size: u64) {
        let available = file_size.saturating_sub(Self::DATA_OFFSET);
        if self.data_len == 0 || self.data_len == u64::from(u32::MAX) || self.data_len > available
        {
            self.data_len = available;
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self.params.byte_rate() {
            0 => 0,
            rate => self.data_len * 1000 / rate,
        }
    }
}

fn u16_at(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

fn u32_at(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

#[cfg(test)]
pub(crate) fn header_bytes(params: StreamParams, data_len: u32) -> [u8; HEADER_LEN] {
    let mut raw = [0u8; HEADER_LEN];
    let block_align = params.channels * (params.bits_per_sample / 8);
    raw[0..4].copy_from_slice(b"RIFF");
    raw[4..8].copy_from_slice(&36u32.wrapping_add(data_len).to_le_bytes());
    raw[8..12].copy_from_slice(b"WAVE");
    raw[12..16].copy_from_slice(b"fmt ");
    raw[16..20].copy_from_slice(&16u32.to_le_bytes());
    raw[20..22].copy_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    raw[22..24].copy_from_slice(&params.channels.to_le_bytes());
    raw[24..28].copy_from_slice(&params.sample_rate.to_le_bytes());
    raw[28..32].copy_from_slice(&(params.byte_rate() as u32).to_le_bytes());
    raw[32..34].copy_from_slice(&block_align.to_le_bytes());
    raw[34..36].copy_from_slice(&params.bits_per_sample.to_le_bytes());
    raw[36..40].copy_from_slice(b"data");
    raw[40..44].copy_from_slice(&data_len.to_le_bytes());
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const MONO_16: StreamParams = StreamParams {
        sample_rate: 44_100,
        channels: 1,
        bits_per_sample: 16,
    };

    #[test]
    fn parses_canonical_header() {
        let mut data = header_bytes(MONO_16, 176_400).to_vec();
        data.extend_from_slice(&[1, 2, 3]);
        let mut cur = Cursor::new(data);
        let header = WavHeader::read_from(&mut cur).unwrap();
        assert_eq!(header.params, MONO_16);
        assert_eq!(header.data_len, 176_400);
        assert_eq!(header.duration_ms(), 2000);
        assert_eq!(cur.position(), 44);
    }

    #[test]
    fn rejects_foreign_and_malformed_headers() {
        let mut raw = header_bytes(MONO_16, 10);
        raw[8..12].copy_from_slice(b"AVI ");
        assert!(WavHeader::parse(&raw).is_err());

        let mut raw = header_bytes(MONO_16, 10);
        raw[20..22].copy_from_slice(&3u16.to_le_bytes());
        assert!(WavHeader::parse(&raw).is_err());

        let mut raw = header_bytes(MONO_16, 10);
        raw[22..24].copy_from_slice(&0u16.to_le_bytes());
        assert!(WavHeader::parse(&raw).is_err());

        let mut raw = header_bytes(MONO_16, 10);
        raw[36..40].copy_from_slice(b"LIST");
        assert!(WavHeader::parse(&raw).is_err());
    }

    #[test]
    fn short_file_is_an_error() {
        let mut cur = Cursor::new(b"RIFF".to_vec());
        let err = WavHeader::read_from(&mut cur).unwrap_err();
        assert!(format!("{err:#}").contains("short"));
    }

    #[test]
    fn unknown_or_oversized_length_fits_the_file() {
        let mut header = WavHeader::parse(&header_bytes(MONO_16, u32::MAX)).unwrap();
        header.fit_to_file(44 + 1000);
        assert_eq!(header.data_len, 1000);

        let mut header = WavHeader::parse(&header_bytes(MONO_16, 500)).unwrap();
        header.fit_to_file(44 + 1000);
        assert_eq!(header.data_len, 500);
    }
}
