use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "trackctl", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a WAV or MP3 file; control it with line commands on stdin
    Play(PlayArgs),

    /// List output devices and exit
    Devices,

    /// Print detected format, stream parameters and duration of a file
    Info {
        /// Path to audio file (.wav or .mp3)
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub struct PlayArgs {
    /// Path to audio file (.wav or .mp3)
    pub path: PathBuf,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Number of output buffers cycled between the refill callback and the device
    #[arg(long, default_value_t = 2)]
    pub buffers: usize,

    /// Size of each output buffer in bytes
    #[arg(long, default_value_t = 8192)]
    pub buffer_bytes: usize,

    /// Compressed bytes read from the file per refill
    #[arg(long, default_value_t = 8192)]
    pub chunk_bytes: usize,

    /// Initial volume (0-100)
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: u8,

    /// Track duration in milliseconds; skips the MP3 frame scan
    #[arg(long)]
    pub duration_ms: Option<u64>,

    /// Play into a real-time paced null output instead of a device
    #[arg(long)]
    pub null_output: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_defaults_match_player_defaults() {
        let args = Args::try_parse_from(["trackctl", "play", "a.wav"]).unwrap();
        let Command::Play(play) = args.cmd else {
            panic!("expected play");
        };
        let defaults = track_player::PlayerConfig::default();
        assert_eq!(play.buffers, defaults.buffer_count);
        assert_eq!(play.buffer_bytes, defaults.buffer_bytes);
        assert_eq!(play.chunk_bytes, defaults.chunk_bytes);
        assert_eq!(play.volume, defaults.default_volume);
        assert!(!play.null_output);
    }

    #[test]
    fn volume_above_100_is_rejected() {
        assert!(Args::try_parse_from(["trackctl", "play", "a.wav", "--volume", "101"]).is_err());
    }
}
