//! `trackctl`: play a WAV or MP3 file through the track-player pipeline.
//!
//! ## Commands
//! - `play <path>`: open a session on a CPAL device (or the null output) and control it from
//!   stdin (`p` pause/resume, `f`/`b` step, `s <ms>` seek, `v <n>` volume, `i` status, `q` quit).
//! - `devices`: list output devices.
//! - `info <path>`: print what the player would detect about a file.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use track_cli::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,track_player=info,track_cli=info")
        }))
        .init();

    match args.cmd {
        cli::Command::Play(play) => runtime::run_play(play.into(), true),
        cli::Command::Devices => runtime::list_devices(),
        cli::Command::Info { path } => runtime::print_info(&path),
    }
}
