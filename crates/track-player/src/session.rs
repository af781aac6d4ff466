//! Playback session: one open track bound to one output.
//!
//! `open` validates the file, binds the output and pre-fills every buffer on the calling
//! thread. `start` spawns the playback thread, which runs the output's message loop; from then
//! on refills happen there until the stream ends or `stop` joins the thread.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::PlayerConfig;
use crate::decode::DecodeContext;
use crate::error::{Result, SessionError};
use crate::format::{self, AudioFormat, StreamParams};
use crate::output::{AudioBuffer, OutputBackend, OutputDriver, Refill};
use crate::position::{PendingSeek, PositionTranslator, step_target};
use crate::refill::{RefillHandler, SourceReader, lock_source};
use crate::state::{SessionState, StateCell, Transition};
use crate::status::{EndReason, PlaybackStatus, StatusSnapshot};
use crate::wav::WavHeader;

/// Caller-supplied track metadata. Only `path` and `duration_ms` affect playback.
#[derive(Clone, Debug, Default)]
pub struct TrackInfo {
    pub path: PathBuf,
    pub display_name: Option<String>,
    pub artist: Option<String>,
    pub cover_path: Option<PathBuf>,
    /// Total duration; for compressed files a frame scan fills it in when absent.
    pub duration_ms: Option<u64>,
    pub theme_color: Option<String>,
}

impl TrackInfo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Name for logs: the display name, else the file name.
    pub fn label(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        })
    }
}

/// Everything `open` learns about a file before binding an output.
struct OpenedSource {
    file: File,
    context: DecodeContext,
    params: StreamParams,
    data_offset: u64,
    translator: PositionTranslator,
}

pub struct PlaybackSession {
    track: TrackInfo,
    format: AudioFormat,
    config: PlayerConfig,
    state: Arc<StateCell>,
    status: Arc<PlaybackStatus>,
    pending_seek: Arc<PendingSeek>,
    source: Arc<Mutex<SourceReader>>,
    output: Arc<dyn OutputDriver>,
    translator: PositionTranslator,
    handler: Option<RefillHandler>,
    thread: Option<JoinHandle<()>>,
    volume: AtomicU8,
}

impl PlaybackSession {
    /// Open `track`, bind an output from `backend` and pre-fill its buffers.
    ///
    /// On error every resource acquired so far is released.
    pub fn open(
        track: TrackInfo,
        config: PlayerConfig,
        backend: &dyn OutputBackend,
    ) -> Result<Self> {
        let format = format::detect(&track.path);
        let opened = match format {
            AudioFormat::Pcm => open_pcm(&track.path)?,
            AudioFormat::Compressed => open_compressed(&track, &config)?,
            AudioFormat::Unknown => {
                return Err(SessionError::UnsupportedFormat {
                    path: track.path.clone(),
                });
            }
        };

        let output = backend
            .init(opened.params)
            .map_err(|e| SessionError::HardwareInit {
                reason: format!("{e:#}"),
            })?;
        if let Err(e) = output.set_volume(config.default_volume) {
            tracing::warn!(error = %e, "can't apply default volume");
        }

        let status = Arc::new(PlaybackStatus::new(opened.params, opened.data_offset));
        let pending_seek = Arc::new(PendingSeek::new());
        let state = Arc::new(StateCell::new(SessionState::Ready));
        let source = Arc::new(Mutex::new(SourceReader::new(opened.file, opened.context)));
        let mut handler = RefillHandler::new(
            source.clone(),
            status.clone(),
            pending_seek.clone(),
            output.clone(),
            state.clone(),
        );

        let mut prefilled = 0;
        for _ in 0..config.buffer_count.max(1) {
            if handler.refill(AudioBuffer::new(config.buffer_bytes.max(1))) == Refill::EndOfStream {
                break;
            }
            prefilled += 1;
        }

        tracing::info!(
            track = %track.label(),
            format = %format,
            params = %opened.params,
            duration_ms = opened.translator.duration_ms(),
            output = %output.name(),
            prefilled,
            "session opened"
        );

        Ok(Self {
            track,
            format,
            volume: AtomicU8::new(config.default_volume.min(100)),
            config,
            state,
            status,
            pending_seek,
            source,
            output,
            translator: opened.translator,
            handler: Some(handler),
            thread: None,
        })
    }

    /// Start playback, or continue it when paused.
    ///
    /// If the output or the thread can't be started the session stays `Ready` and `start`
    /// may be retried.
    pub fn start(&mut self) -> Result<()> {
        let output = &self.output;
        let handler = &mut self.handler;
        let thread_slot = &mut self.thread;
        let status = &self.status;
        let source = &self.source;
        let state = &self.state;
        self.state.transition(Transition::Start, |from, _| {
            if from == SessionState::Paused {
                return output.resume().map_err(SessionError::output);
            }
            if handler.is_none() {
                return Err(SessionError::InvalidState {
                    op: "start",
                    state: from,
                });
            }
            output.start().map_err(SessionError::output)?;

            // The handler only leaves the session once the thread exists to receive it.
            let (handler_tx, handler_rx) = crossbeam_channel::bounded::<RefillHandler>(1);
            let loop_output = output.clone();
            let status = status.clone();
            let source = source.clone();
            let state = state.clone();
            let spawned = thread::Builder::new()
                .name("audioctl".to_string())
                .spawn(move || {
                    let Ok(mut handler) = handler_rx.recv() else {
                        return;
                    };
                    raise_thread_priority();
                    if let Err(e) = loop_output.run_message_loop(&mut handler) {
                        tracing::error!("output message loop failed: {e:#}");
                        lock_source(&source).close(&status, EndReason::OutputFailed);
                        state.mark_ended();
                    }
                });
            let handle = spawned.map_err(|e| SessionError::Output {
                reason: format!("can't spawn playback thread: {e}"),
            })?;
            if let Some(h) = handler.take() {
                if handler_tx.send(h).is_err() {
                    tracing::error!("playback thread exited before receiving its handler");
                }
            }
            *thread_slot = Some(handle);
            Ok(())
        })?;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let output = &self.output;
        self.state.transition(Transition::Pause, |_, _| {
            output.pause().map_err(SessionError::output)
        })?;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        let output = &self.output;
        self.state.transition(Transition::Resume, |_, _| {
            output.resume().map_err(SessionError::output)
        })?;
        Ok(())
    }

    /// Stop the output, wait for the playback thread to exit and close the source.
    pub fn stop(&mut self) -> Result<()> {
        let output = &self.output;
        let status = &self.status;
        self.state.transition(Transition::Stop, |_, _| {
            status.set_end_reason(EndReason::Stopped);
            if let Err(e) = output.stop() {
                tracing::warn!(error = %e, "output stop failed");
            }
            Ok(())
        })?;
        // Joined outside the state lock: the playback thread takes it when the stream ends.
        self.join_thread();
        lock_source(&self.source).close(&self.status, EndReason::Stopped);
        Ok(())
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!("playback thread panicked");
            }
        }
    }

    /// Request playback to continue from `ms`; applied by the next refill.
    pub fn seek_to(&self, ms: u64) -> Result<()> {
        let state = self.state.get();
        if matches!(state, SessionState::Uninitialized | SessionState::Stopped) {
            return Err(SessionError::InvalidState { op: "seek", state });
        }
        let ms = ms.min(self.duration_ms());
        let offset = self.translator.ms_to_byte_offset(ms);
        self.pending_seek.request(offset)?;
        tracing::debug!(ms, offset, "seek requested");
        Ok(())
    }

    /// Seek by `delta_ms` from the current position, clamped into the track.
    pub fn seek_relative(&self, delta_ms: i64) -> Result<()> {
        let target = step_target(
            self.position_ms(),
            delta_ms,
            self.duration_ms(),
            self.config.end_margin_ms,
        );
        self.seek_to(target)
    }

    pub fn seek_forward(&self) -> Result<()> {
        self.seek_relative(self.step_ms())
    }

    pub fn seek_backward(&self) -> Result<()> {
        self.seek_relative(-self.step_ms())
    }

    fn step_ms(&self) -> i64 {
        i64::try_from(self.config.seek_step_ms).unwrap_or(i64::MAX)
    }

    /// Current playback position; a seek not yet applied is reported as its target.
    pub fn position_ms(&self) -> u64 {
        let offset = self
            .pending_seek
            .peek()
            .unwrap_or_else(|| self.status.file_position.load(Ordering::Acquire));
        self.translator.byte_offset_to_ms(offset)
    }

    pub fn duration_ms(&self) -> u64 {
        self.translator.duration_ms()
    }

    pub fn set_volume(&self, percent: u8) -> Result<()> {
        let percent = percent.min(100);
        self.output
            .set_volume(percent)
            .map_err(SessionError::output)?;
        self.volume.store(percent, Ordering::Relaxed);
        Ok(())
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Current state; a stream that played out (or whose output failed) reads `Stopped`.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Stream parameters, refined after the first decoded frame for compressed sources.
    pub fn params(&self) -> StreamParams {
        self.status.params()
    }

    pub fn track(&self) -> &TrackInfo {
        &self.track
    }

    pub fn path(&self) -> &Path {
        &self.track.path
    }

    pub fn is_source_open(&self) -> bool {
        lock_source(&self.source).is_open()
    }

    /// Whether the output played the last buffer.
    pub fn finished(&self) -> bool {
        self.status.finished.load(Ordering::Acquire)
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.status.end_reason()
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state(),
            format: self.format,
            params: self.status.params(),
            position_ms: self.position_ms(),
            duration_ms: self.duration_ms(),
            file_position: self.status.file_position.load(Ordering::Acquire),
            source_open: self.status.source_open.load(Ordering::Acquire),
            finished: self.finished(),
            end_reason: self.end_reason(),
            volume: self.volume(),
            refills: self.status.refills.load(Ordering::Relaxed),
            bytes_delivered: self.status.bytes_delivered.load(Ordering::Relaxed),
            underrun_events: self.output.underrun_events(),
            decoder: self.status.decoder_stats(),
        }
    }

    /// Stop if still running, then release the thread, the source and the output.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if matches!(self.state(), SessionState::Playing | SessionState::Paused) {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "stop during close failed");
            }
        }
        // A stream that ended on its own leaves a finished thread behind.
        self.join_thread();
        lock_source(&self.source).close(&self.status, EndReason::Stopped);
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn open_file(path: &Path) -> Result<(File, u64)> {
    let open_err = |source| SessionError::Open {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(open_err)?;
    let size = file.metadata().map_err(open_err)?.len();
    Ok((file, size))
}

fn open_pcm(path: &Path) -> Result<OpenedSource> {
    let (mut file, file_size) = open_file(path)?;
    let mut header = WavHeader::read_from(&mut file).map_err(|e| SessionError::DecoderInit {
        reason: format!("{e:#}"),
    })?;
    header.fit_to_file(file_size);

    let data_offset = WavHeader::DATA_OFFSET;
    Ok(OpenedSource {
        file,
        context: DecodeContext::Pcm {
            data_end: data_offset + header.data_len,
        },
        params: header.params,
        data_offset,
        translator: PositionTranslator::Pcm {
            data_offset,
            data_len: header.data_len,
            params: header.params,
        },
    })
}

#[cfg(feature = "mp3")]
fn open_compressed(track: &TrackInfo, config: &PlayerConfig) -> Result<OpenedSource> {
    use crate::decode::Mp3Stream;

    let (mut file, file_size) = open_file(&track.path)?;
    let decoder_err = |reason: String| SessionError::DecoderInit { reason };

    let probe = crate::mp3::probe(&mut file, track.duration_ms.is_none())
        .map_err(|e| decoder_err(format!("probe failed: {e}")))?;
    let params = match &probe.first_frame {
        Some(h) => StreamParams {
            sample_rate: h.sample_rate,
            channels: 2,
            bits_per_sample: 16,
        },
        None => {
            tracing::warn!(path = %track.path.display(), "no frame header found, using defaults");
            StreamParams::PROVISIONAL
        }
    };
    let stream = Mp3Stream::new(
        config.chunk_bytes,
        config.scratch_capacity(),
        probe.first_frame.as_ref(),
    )
    .map_err(|e| decoder_err(format!("{e:#}")))?;

    let duration_ms = track.duration_ms.or(probe.duration_ms).unwrap_or(0);
    Ok(OpenedSource {
        file,
        context: DecodeContext::Mp3(stream),
        params,
        data_offset: probe.data_offset,
        translator: PositionTranslator::Compressed {
            data_offset: probe.data_offset,
            file_size,
            duration_ms,
        },
    })
}

#[cfg(not(feature = "mp3"))]
fn open_compressed(track: &TrackInfo, _config: &PlayerConfig) -> Result<OpenedSource> {
    Err(SessionError::UnsupportedFormat {
        path: track.path.clone(),
    })
}

/// Best-effort SCHED_FIFO priority for the calling thread; failure is only logged.
#[cfg(unix)]
fn raise_thread_priority() {
    // SAFETY: plain libc calls on the current thread with a zero-initialized param struct.
    unsafe {
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        if max < 0 || min < 0 {
            tracing::debug!("realtime priority range unavailable");
            return;
        }
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = (max - 9).max(min);
        let rc = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param);
        if rc != 0 {
            tracing::debug!(errno = rc, "realtime priority not granted");
        }
    }
}

#[cfg(not(unix))]
fn raise_thread_priority() {}
