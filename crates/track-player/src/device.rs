//! Output device discovery and stream config selection.
//!
//! Thin wrappers around CPAL for:
//! - listing output devices with their sample-rate ranges
//! - selecting the default device or one by case-insensitive substring
//! - choosing a stream config that plays a given rate without resampling

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle`, or the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let mut devices = host.output_devices().context("No output devices")?;
        return devices
            .find(|d| {
                d.description()
                    .map(|n| matches_device_name(&n.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| anyhow!("No output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("No default output device"))
}

/// Choose a config that runs at exactly `rate` Hz.
///
/// Among ranges containing the rate, prefer one with `channels` channels, then the better
/// sample format. Fails when no range covers the rate: there is no resampling stage.
pub fn pick_output_config(
    device: &cpal::Device,
    rate: u32,
    channels: u16,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_output_configs()
        .context("query output configs")?
        .collect();
    if ranges.is_empty() {
        return Err(anyhow!("No supported output configs"));
    }

    let mut best: Option<(u8, cpal::SupportedStreamConfigRange)> = None;
    for range in ranges {
        if rate < range.min_sample_rate() || rate > range.max_sample_rate() {
            continue;
        }
        let rank = candidate_rank(range.channels(), channels, range.sample_format());
        if best.as_ref().is_none_or(|(b, _)| rank < *b) {
            best = Some((rank, range));
        }
    }

    best.map(|(_, range)| range.with_sample_rate(rate))
        .ok_or_else(|| anyhow!("device does not support {rate} Hz"))
}

/// Pick a fixed device period no longer than half an output buffer.
///
/// Returns `None` when the device only supports its default size.
pub fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    buffer_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let target = (buffer_frames / 2).max(1);
            Some(cpal::BufferSize::Fixed(target.clamp(*min, (*max).max(*min))))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn candidate_rank(range_channels: u16, wanted: u16, format: cpal::SampleFormat) -> u8 {
    let channel_rank = if range_channels == wanted {
        0
    } else if range_channels >= 2 && wanted <= 2 {
        1
    } else {
        2
    };
    channel_rank * 16 + sample_format_rank(format)
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

/// Output device metadata for `trackctl devices`.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub min_rate: u32,
    pub max_rate: u32,
    pub is_default: bool,
}

pub fn list_devices(host: &cpal::Host) -> Result<Vec<DeviceInfo>> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.name().to_string());
    let devices = host.output_devices().context("No output devices")?;

    let mut out = Vec::new();
    for d in devices {
        let name = d.description()?.name().to_string();
        let (min_rate, max_rate) = match d.supported_output_configs() {
            Ok(ranges) => ranges.fold((u32::MAX, 0), |(lo, hi), r| {
                (lo.min(r.min_sample_rate()), hi.max(r.max_sample_rate()))
            }),
            Err(e) => {
                tracing::warn!(device = %name, error = %e, "can't query output configs");
                continue;
            }
        };
        if max_rate == 0 {
            continue;
        }
        out.push(DeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            min_rate,
            max_rate,
        });
    }
    Ok(out)
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
