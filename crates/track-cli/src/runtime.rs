//! trackctl runtime helpers.
//!
//! Device enumeration, file inspection and the interactive playback loop.

use std::fs::File;
use std::io::BufRead;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Sender, select};

use track_player::output::memory::Pacing;
use track_player::output::{CpalBackend, MemoryBackend};
use track_player::wav::WavHeader;
use track_player::{
    AudioFormat, EndReason, OutputBackend, PlaybackSession, SessionError, SessionState,
    StreamParams, TrackInfo, device, format, mp3,
};

use crate::config::TrackPlayConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = device::list_devices(&host)?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for (i, d) in devices.iter().enumerate() {
        let marker = if d.is_default { " (default)" } else { "" };
        println!(
            "#{i}: {}{marker} [{}-{} Hz]",
            d.name, d.min_rate, d.max_rate
        );
    }
    Ok(())
}

/// Print what `open` would learn about `path` without binding an output.
pub fn print_info(path: &Path) -> Result<()> {
    let format = format::detect(path);
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let size = file
        .metadata()
        .with_context(|| format!("stat {}", path.display()))?
        .len();

    let (params, data_offset, duration_ms) = match format {
        AudioFormat::Pcm => {
            let mut header = WavHeader::read_from(&mut file)?;
            header.fit_to_file(size);
            (
                header.params,
                WavHeader::DATA_OFFSET,
                Some(header.duration_ms()),
            )
        }
        AudioFormat::Compressed => {
            let probe = mp3::probe(&mut file, true).context("scan frames")?;
            let params = probe
                .first_frame
                .as_ref()
                .map(|h| StreamParams {
                    sample_rate: h.sample_rate,
                    channels: 2,
                    bits_per_sample: 16,
                })
                .unwrap_or(StreamParams::PROVISIONAL);
            (params, probe.data_offset, probe.duration_ms)
        }
        AudioFormat::Unknown => return Err(anyhow!("unsupported format: {}", path.display())),
    };

    println!("file:     {}", path.display());
    println!("format:   {format}");
    println!("stream:   {params}");
    println!("size:     {size} bytes (data at {data_offset})");
    match duration_ms {
        Some(ms) => println!("duration: {ms} ms"),
        None => println!("duration: unknown"),
    }
    Ok(())
}

/// A line typed on stdin during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    TogglePause,
    Forward,
    Backward,
    Seek(u64),
    Volume(u8),
    Info,
    Quit,
}

pub fn parse_command(line: &str) -> std::result::Result<ControlCommand, String> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Err("empty command".to_string());
    };
    let arg = parts.next();
    let parsed = match (cmd, arg) {
        ("p", None) => ControlCommand::TogglePause,
        ("f", None) => ControlCommand::Forward,
        ("b", None) => ControlCommand::Backward,
        ("i", None) => ControlCommand::Info,
        ("q", None) => ControlCommand::Quit,
        ("s", Some(ms)) => ControlCommand::Seek(
            ms.parse()
                .map_err(|_| format!("bad position '{ms}' (expected milliseconds)"))?,
        ),
        ("v", Some(v)) => match v.parse::<u8>() {
            Ok(v) if v <= 100 => ControlCommand::Volume(v),
            _ => return Err(format!("bad volume '{v}' (expected 0-100)")),
        },
        _ => return Err(format!("unknown command '{}'", line.trim())),
    };
    if parts.next().is_some() {
        return Err(format!("trailing input in '{}'", line.trim()));
    }
    Ok(parsed)
}

/// Play one file and drive it from stdin until it ends or the user quits.
pub fn run_play(config: TrackPlayConfig, install_ctrlc: bool) -> Result<()> {
    let backend: Box<dyn OutputBackend> = if config.null_output {
        Box::new(MemoryBackend::new(Pacing::RealTime))
    } else {
        Box::new(CpalBackend::new(
            config.device.clone(),
            config.player.buffer_bytes,
        ))
    };

    let mut track = TrackInfo::new(&config.path);
    track.duration_ms = config.duration_ms;
    let mut session = PlaybackSession::open(track, config.player.clone(), backend.as_ref())
        .with_context(|| format!("open {}", config.path.display()))?;
    session.start()?;
    tracing::info!(status = %session.status(), "playing");

    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    if install_ctrlc {
        let tx = cmd_tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(ControlCommand::Quit);
        })
        .context("install ctrl-c handler")?;
    }
    spawn_stdin_reader(cmd_tx.clone());

    let ticker = crossbeam_channel::tick(POLL_INTERVAL);
    let mut last_status = Instant::now();
    loop {
        select! {
            recv(cmd_rx) -> msg => {
                let Ok(cmd) = msg else { break };
                if cmd == ControlCommand::Quit {
                    break;
                }
                apply_command(&mut session, cmd);
            }
            recv(ticker) -> _ => {
                if session.finished() {
                    tracing::info!("track finished");
                    break;
                }
                if session.end_reason() == Some(EndReason::OutputFailed) {
                    tracing::warn!("output failed; stopping");
                    break;
                }
                if last_status.elapsed() >= STATUS_INTERVAL {
                    last_status = Instant::now();
                    tracing::info!(status = %session.status(), "status");
                }
            }
        }
    }
    drop(cmd_tx);

    if matches!(session.state(), SessionState::Playing | SessionState::Paused) {
        session.stop()?;
    }
    let status = session.status();
    tracing::info!(
        status = %status,
        refills = status.refills,
        underruns = status.underrun_events,
        frames_decoded = status.decoder.frames_decoded,
        frames_skipped = status.decoder.frames_skipped,
        "playback ended"
    );
    session.close();
    Ok(())
}

fn apply_command(session: &mut PlaybackSession, cmd: ControlCommand) {
    let result = match cmd {
        ControlCommand::TogglePause => match session.state() {
            SessionState::Paused => session.resume(),
            _ => session.pause(),
        },
        ControlCommand::Forward => session.seek_forward(),
        ControlCommand::Backward => session.seek_backward(),
        ControlCommand::Seek(ms) => session.seek_to(ms),
        ControlCommand::Volume(v) => session.set_volume(v),
        ControlCommand::Info => {
            tracing::info!(status = %session.status(), "status");
            Ok(())
        }
        ControlCommand::Quit => Ok(()),
    };
    match result {
        Ok(()) => tracing::debug!(?cmd, "command applied"),
        Err(SessionError::Busy) => tracing::info!("seek still pending; try again"),
        Err(e) => tracing::warn!(?cmd, error = %e, "command failed"),
    }
}

/// Forward parsed stdin lines until stdin closes or the receiver is gone.
fn spawn_stdin_reader(tx: Sender<ControlCommand>) {
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(msg) => tracing::warn!("{msg}"),
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "can't read commands from stdin");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_letter_commands() {
        assert_eq!(parse_command("p"), Ok(ControlCommand::TogglePause));
        assert_eq!(parse_command(" f "), Ok(ControlCommand::Forward));
        assert_eq!(parse_command("b"), Ok(ControlCommand::Backward));
        assert_eq!(parse_command("i"), Ok(ControlCommand::Info));
        assert_eq!(parse_command("q"), Ok(ControlCommand::Quit));
    }

    #[test]
    fn parses_arguments() {
        assert_eq!(parse_command("s 1500"), Ok(ControlCommand::Seek(1500)));
        assert_eq!(parse_command("v 0"), Ok(ControlCommand::Volume(0)));
        assert_eq!(parse_command("v 100"), Ok(ControlCommand::Volume(100)));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_command("").is_err());
        assert!(parse_command("s").is_err());
        assert!(parse_command("s -5").is_err());
        assert!(parse_command("v 101").is_err());
        assert!(parse_command("p now").is_err());
        assert!(parse_command("x").is_err());
    }
}
