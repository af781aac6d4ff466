use std::path::PathBuf;

use track_player::PlayerConfig;

use crate::cli::PlayArgs;

/// Everything `trackctl play` needs, resolved from the command line.
#[derive(Clone, Debug)]
pub struct TrackPlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub duration_ms: Option<u64>,
    pub null_output: bool,
    pub player: PlayerConfig,
}

impl From<PlayArgs> for TrackPlayConfig {
    fn from(args: PlayArgs) -> Self {
        Self {
            path: args.path,
            device: normalize_device_name(args.device),
            duration_ms: args.duration_ms,
            null_output: args.null_output,
            player: PlayerConfig {
                chunk_bytes: args.chunk_bytes.max(1),
                buffer_count: args.buffers.max(1),
                buffer_bytes: args.buffer_bytes.max(1),
                default_volume: args.volume,
                ..PlayerConfig::default()
            },
        }
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_device_name_trims_and_drops_empty() {
        assert_eq!(normalize_device_name(None), None);
        assert_eq!(normalize_device_name(Some("  ".to_string())), None);
        assert_eq!(
            normalize_device_name(Some("  USB  DAC ".to_string())),
            Some("USB  DAC".to_string())
        );
    }

    #[test]
    fn zero_sizes_are_raised_to_one() {
        let args = PlayArgs {
            path: PathBuf::from("a.mp3"),
            device: None,
            buffers: 0,
            buffer_bytes: 0,
            chunk_bytes: 4096,
            volume: 55,
            duration_ms: Some(1000),
            null_output: true,
        };
        let cfg = TrackPlayConfig::from(args);
        assert_eq!(cfg.player.buffer_count, 1);
        assert_eq!(cfg.player.buffer_bytes, 1);
        assert_eq!(cfg.player.chunk_bytes, 4096);
        assert_eq!(cfg.player.default_volume, 55);
        assert_eq!(cfg.duration_ms, Some(1000));
    }
}
