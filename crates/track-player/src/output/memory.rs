//! In-memory output used for offline playback and as a test harness.
//!
//! Buffers are "played" by counting (and optionally keeping) their bytes. Playback can run
//! flat out, at real-time pace, or one buffer per [`MemoryOutput::step`] call.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::{AudioBuffer, OutputBackend, OutputCallbacks, OutputDriver, Refill};
use crate::format::StreamParams;

/// How fast the message loop consumes queued buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// As fast as the refill callback can keep up.
    Immediate,
    /// Sleep for each buffer's playing time.
    RealTime,
    /// One buffer per [`MemoryOutput::step`].
    Manual,
}

enum MemoryControl {
    Pause,
    Resume,
    Stop,
    Step(Sender<()>),
}

pub struct MemoryOutput {
    params: StreamParams,
    pacing: Pacing,
    queue_tx: Sender<AudioBuffer>,
    queue_rx: Receiver<AudioBuffer>,
    control_tx: Sender<MemoryControl>,
    control_rx: Receiver<MemoryControl>,
    started: AtomicBool,
    volume: AtomicU8,
    dequeues: AtomicU64,
    bytes_played: AtomicU64,
    capture: Option<Mutex<Vec<u8>>>,
}

impl MemoryOutput {
    pub fn new(params: StreamParams, pacing: Pacing, capture: bool) -> Self {
        let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        Self {
            params,
            pacing,
            queue_tx,
            queue_rx,
            control_tx,
            control_rx,
            started: AtomicBool::new(false),
            volume: AtomicU8::new(100),
            dequeues: AtomicU64::new(0),
            bytes_played: AtomicU64::new(0),
            capture: capture.then(|| Mutex::new(Vec::new())),
        }
    }

    /// Buffers handed to the dequeue callback so far.
    pub fn dequeue_calls(&self) -> u64 {
        self.dequeues.load(Ordering::Relaxed)
    }

    pub fn bytes_played(&self) -> u64 {
        self.bytes_played.load(Ordering::Relaxed)
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Everything played so far, when capture is enabled.
    pub fn captured(&self) -> Vec<u8> {
        self.capture
            .as_ref()
            .map(|c| c.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }

    /// Play exactly one buffer ([`Pacing::Manual`]) and wait until its dequeue callback ran.
    ///
    /// Returns `false` when the loop did not answer in time.
    pub fn step(&self) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.control_tx.send(MemoryControl::Step(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(Duration::from_secs(5)).is_ok()
    }

    fn play(&self, buffer: &AudioBuffer) {
        let bytes = buffer.bytes();
        self.bytes_played
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        if let Some(capture) = &self.capture {
            capture
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend_from_slice(bytes);
        }
        if self.pacing == Pacing::RealTime {
            let rate = self.params.byte_rate().max(1);
            thread::sleep(Duration::from_micros(
                bytes.len() as u64 * 1_000_000 / rate,
            ));
        }
    }

    /// Block while paused. Returns `false` if the loop should stop instead.
    fn wait_for_resume(&self) -> bool {
        loop {
            match self.control_rx.recv() {
                Ok(MemoryControl::Resume) => return true,
                Ok(MemoryControl::Stop) | Err(_) => return false,
                Ok(MemoryControl::Pause) => {}
                Ok(MemoryControl::Step(ack)) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    fn send(&self, msg: MemoryControl) -> Result<()> {
        self.control_tx
            .send(msg)
            .map_err(|_| anyhow!("memory output control channel closed"))
    }
}

impl OutputDriver for MemoryOutput {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn params(&self) -> StreamParams {
        self.params
    }

    fn enqueue(&self, buffer: AudioBuffer) -> Result<()> {
        self.queue_tx
            .send(buffer)
            .map_err(|_| anyhow!("memory output queue closed"))
    }

    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.send(MemoryControl::Pause)
    }

    fn resume(&self) -> Result<()> {
        self.send(MemoryControl::Resume)
    }

    fn stop(&self) -> Result<()> {
        self.send(MemoryControl::Stop)
    }

    fn set_volume(&self, percent: u8) -> Result<()> {
        self.volume.store(percent.min(100), Ordering::Relaxed);
        Ok(())
    }

    fn run_message_loop(&self, callbacks: &mut dyn OutputCallbacks) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            bail!("memory output not started");
        }
        let mut end_of_stream = false;
        loop {
            let ack = if self.pacing == Pacing::Manual {
                match self.control_rx.recv() {
                    Ok(MemoryControl::Step(ack)) => Some(ack),
                    Ok(MemoryControl::Pause | MemoryControl::Resume) => continue,
                    Ok(MemoryControl::Stop) | Err(_) => return Ok(()),
                }
            } else {
                match self.control_rx.try_recv() {
                    Ok(MemoryControl::Pause) => {
                        if !self.wait_for_resume() {
                            return Ok(());
                        }
                    }
                    Ok(MemoryControl::Stop) | Err(TryRecvError::Disconnected) => return Ok(()),
                    Ok(MemoryControl::Resume) | Err(TryRecvError::Empty) => {}
                    Ok(MemoryControl::Step(ack)) => {
                        let _ = ack.send(());
                    }
                }
                None
            };

            let Ok(buffer) = self.queue_rx.try_recv() else {
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                break;
            };
            self.play(&buffer);
            if !end_of_stream {
                self.dequeues.fetch_add(1, Ordering::Relaxed);
                if callbacks.on_dequeue(buffer) == Refill::EndOfStream {
                    end_of_stream = true;
                }
            }
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }

        callbacks.on_complete();
        Ok(())
    }
}

/// Backend producing [`MemoryOutput`]s; keeps the last one for inspection.
pub struct MemoryBackend {
    pacing: Pacing,
    capture: bool,
    supported_rates: Option<Vec<u32>>,
    last: Mutex<Option<Arc<MemoryOutput>>>,
}

impl MemoryBackend {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            capture: false,
            supported_rates: None,
            last: Mutex::new(None),
        }
    }

    /// Keep every played byte.
    pub fn capturing(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Refuse to bind streams at any other sample rate, like a fixed-rate codec.
    pub fn with_supported_rates(mut self, rates: &[u32]) -> Self {
        self.supported_rates = Some(rates.to_vec());
        self
    }

    /// The output created by the most recent successful `init`.
    pub fn output(&self) -> Option<Arc<MemoryOutput>> {
        self.last.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OutputBackend for MemoryBackend {
    fn init(&self, params: StreamParams) -> Result<Arc<dyn OutputDriver>> {
        if let Some(rates) = &self.supported_rates {
            if !rates.contains(&params.sample_rate) {
                bail!("sample rate {} Hz not supported", params.sample_rate);
            }
        }
        let output = Arc::new(MemoryOutput::new(params, self.pacing, self.capture));
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = Some(output.clone());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Refills each buffer `remaining` times, then reports end of stream.
    struct Countdown {
        output: Arc<MemoryOutput>,
        remaining: usize,
        calls: usize,
        completed: bool,
    }

    impl OutputCallbacks for Countdown {
        fn on_dequeue(&mut self, buffer: AudioBuffer) -> Refill {
            self.calls += 1;
            if self.remaining == 0 {
                return Refill::EndOfStream;
            }
            self.remaining -= 1;
            self.output.enqueue(buffer).unwrap();
            Refill::Queued
        }

        fn on_complete(&mut self) {
            self.completed = true;
        }
    }

    fn full_buffer(n: usize) -> AudioBuffer {
        let mut buf = AudioBuffer::new(n);
        buf.set_valid(n);
        buf
    }

    #[test]
    fn no_dequeue_after_end_of_stream() {
        let output = Arc::new(MemoryOutput::new(
            StreamParams::PROVISIONAL,
            Pacing::Immediate,
            false,
        ));
        output.enqueue(full_buffer(16)).unwrap();
        output.enqueue(full_buffer(16)).unwrap();
        output.start().unwrap();

        let mut cb = Countdown {
            output: output.clone(),
            remaining: 3,
            calls: 0,
            completed: false,
        };
        output.run_message_loop(&mut cb).unwrap();

        // 3 refills, then one end-of-stream answer; the other buffer plays out silently.
        assert_eq!(cb.calls, 4);
        assert_eq!(output.dequeue_calls(), 4);
        assert_eq!(output.bytes_played(), 5 * 16);
        assert!(cb.completed);
    }

    #[test]
    fn loop_requires_start() {
        let output = MemoryOutput::new(StreamParams::PROVISIONAL, Pacing::Immediate, false);
        struct Nop;
        impl OutputCallbacks for Nop {
            fn on_dequeue(&mut self, _: AudioBuffer) -> Refill {
                Refill::EndOfStream
            }
        }
        assert!(output.run_message_loop(&mut Nop).is_err());
    }

    #[test]
    fn stop_ends_loop_without_completion() {
        let output = Arc::new(MemoryOutput::new(
            StreamParams::PROVISIONAL,
            Pacing::Immediate,
            false,
        ));
        output.enqueue(full_buffer(4)).unwrap();
        output.start().unwrap();
        output.stop().unwrap();
        let mut cb = Countdown {
            output: output.clone(),
            remaining: 10,
            calls: 0,
            completed: false,
        };
        output.run_message_loop(&mut cb).unwrap();
        assert_eq!(cb.calls, 0);
        assert!(!cb.completed);
    }

    #[test]
    fn backend_enforces_supported_rates() {
        let backend = MemoryBackend::new(Pacing::Immediate).with_supported_rates(&[48_000]);
        assert!(backend.init(StreamParams::PROVISIONAL).is_err());
        assert!(backend.output().is_none());
        let params = StreamParams {
            sample_rate: 48_000,
            ..StreamParams::PROVISIONAL
        };
        let out = backend.init(params).unwrap();
        assert_eq!(out.params(), params);
        assert!(backend.output().is_some());
    }

    #[test]
    fn volume_is_clamped() {
        let output = MemoryOutput::new(StreamParams::PROVISIONAL, Pacing::Immediate, false);
        output.set_volume(150).unwrap();
        assert_eq!(output.volume(), 100);
    }
}
