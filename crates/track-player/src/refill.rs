//! Buffer refill callback.
//!
//! Runs on the playback thread (and on the opening thread while buffers are pre-filled).
//! Each call applies a pending seek, fills one buffer and hands it back to the output. The
//! first end-of-stream or failure closes the source; a closed source never refills again.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::decode::{DecodeContext, FillOutcome};
use crate::output::{AudioBuffer, OutputCallbacks, OutputDriver, Refill};
use crate::position::PendingSeek;
use crate::state::StateCell;
use crate::status::{EndReason, PlaybackStatus};

/// The open file and its decoder state, closed by whoever hits the end first.
pub struct SourceReader {
    file: Option<File>,
    context: DecodeContext,
}

impl SourceReader {
    pub fn new(file: File, context: DecodeContext) -> Self {
        Self {
            file: Some(file),
            context,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Release the file. Returns `false` if it was already closed.
    pub fn close(&mut self, status: &PlaybackStatus, reason: EndReason) -> bool {
        if self.file.take().is_none() {
            return false;
        }
        status.source_open.store(false, Ordering::Release);
        status.set_end_reason(reason);
        tracing::info!(%reason, "source closed");
        true
    }
}

pub(crate) fn lock_source(source: &Mutex<SourceReader>) -> MutexGuard<'_, SourceReader> {
    source.lock().unwrap_or_else(|e| e.into_inner())
}

/// Dequeue handler wired into the output's message loop.
pub struct RefillHandler {
    source: Arc<Mutex<SourceReader>>,
    status: Arc<PlaybackStatus>,
    pending_seek: Arc<PendingSeek>,
    output: Arc<dyn OutputDriver>,
    state: Arc<StateCell>,
}

impl RefillHandler {
    pub fn new(
        source: Arc<Mutex<SourceReader>>,
        status: Arc<PlaybackStatus>,
        pending_seek: Arc<PendingSeek>,
        output: Arc<dyn OutputDriver>,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            source,
            status,
            pending_seek,
            output,
            state,
        }
    }

    /// Fill `buffer` and enqueue it, or close the source and report the end.
    pub fn refill(&mut self, mut buffer: AudioBuffer) -> Refill {
        let mut guard = lock_source(&self.source);
        let reader = &mut *guard;
        let Some(file) = reader.file.as_mut() else {
            buffer.set_valid(0);
            return Refill::EndOfStream;
        };

        // The slot is cleared only after the new position is visible, so readers never see
        // the pre-seek offset in between.
        if let Some(offset) = self.pending_seek.peek() {
            if let Err(e) = file.seek(SeekFrom::Start(offset)) {
                tracing::warn!(offset, error = %e, "seek failed");
                self.pending_seek.take();
                buffer.set_valid(0);
                reader.close(&self.status, EndReason::ReadFailed);
                return Refill::EndOfStream;
            }
            self.status.file_position.store(offset, Ordering::Release);
            self.pending_seek.take();
            reader.context.reset();
            tracing::debug!(offset, "seek applied");
        }

        let mut position = self.status.file_position.load(Ordering::Acquire);
        let outcome = reader
            .context
            .fill(file, &mut position, buffer.storage_mut(), &self.status);
        self.status.file_position.store(position, Ordering::Release);

        match outcome {
            FillOutcome::Filled(n) => {
                buffer.set_valid(n);
                self.status.refills.fetch_add(1, Ordering::Relaxed);
                self.status
                    .bytes_delivered
                    .fetch_add(n as u64, Ordering::Relaxed);
                match self.output.enqueue(buffer) {
                    Ok(()) => Refill::Queued,
                    Err(e) => {
                        tracing::warn!(error = %e, "output rejected buffer");
                        reader.close(&self.status, EndReason::OutputFailed);
                        Refill::EndOfStream
                    }
                }
            }
            FillOutcome::End(reason) => {
                buffer.set_valid(0);
                reader.close(&self.status, reason);
                Refill::EndOfStream
            }
        }
    }
}

impl OutputCallbacks for RefillHandler {
    fn on_dequeue(&mut self, buffer: AudioBuffer) -> Refill {
        self.refill(buffer)
    }

    fn on_complete(&mut self) {
        // Only reachable once every buffer played, so the source is done either way.
        lock_source(&self.source).close(&self.status, EndReason::Eof);
        self.state.mark_ended();
        self.status.finished.store(true, Ordering::Release);
        tracing::info!("playback complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use crate::format::StreamParams;
    use crate::output::memory::{MemoryOutput, Pacing};
    use crate::state::SessionState;

    fn payload_file(name: &str, len: usize) -> File {
        let path = std::env::temp_dir().join(format!(
            "track-player-refill-{}-{name}",
            std::process::id()
        ));
        let mut f = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        f.write_all(&bytes).unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let _ = std::fs::remove_file(&path);
        f
    }

    fn handler(file: File, data_end: u64) -> (RefillHandler, Arc<MemoryOutput>) {
        let output = Arc::new(MemoryOutput::new(
            StreamParams::PROVISIONAL,
            Pacing::Immediate,
            false,
        ));
        let source = Arc::new(Mutex::new(SourceReader::new(
            file,
            DecodeContext::Pcm { data_end },
        )));
        let handler = RefillHandler::new(
            source,
            Arc::new(PlaybackStatus::new(StreamParams::PROVISIONAL, 0)),
            Arc::new(PendingSeek::new()),
            output.clone(),
            Arc::new(StateCell::new(SessionState::Playing)),
        );
        (handler, output)
    }

    #[test]
    fn pending_seek_moves_position_then_clears_slot() {
        let (mut handler, _output) = handler(payload_file("seek", 4096), 4096);
        handler.pending_seek.request(1000).unwrap();

        assert_eq!(handler.refill(AudioBuffer::new(256)), Refill::Queued);
        assert!(handler.pending_seek.peek().is_none());
        assert_eq!(handler.status.file_position.load(Ordering::Acquire), 1256);
        handler.pending_seek.request(0).unwrap();
    }

    #[test]
    fn completion_ends_session_before_reporting_finished() {
        let (mut handler, _output) = handler(payload_file("done", 16), 16);
        assert_eq!(handler.refill(AudioBuffer::new(64)), Refill::Queued);
        assert_eq!(handler.refill(AudioBuffer::new(64)), Refill::EndOfStream);
        handler.on_complete();
        assert!(handler.status.finished.load(Ordering::Acquire));
        assert_eq!(handler.state.get(), SessionState::Stopped);
        assert!(!lock_source(&handler.source).is_open());
        assert_eq!(handler.status.end_reason(), Some(EndReason::Eof));
    }
}
