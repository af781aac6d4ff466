//! Output collaborator interface.
//!
//! An output owns the device side of a buffer queue. The session fills [`AudioBuffer`]s and
//! enqueues them; once a buffer has played the output hands it back through
//! [`OutputCallbacks::on_dequeue`] on the thread running [`OutputDriver::run_message_loop`].

use std::sync::Arc;

use anyhow::Result;

use crate::format::StreamParams;

pub mod cpal;
pub mod memory;

pub use self::cpal::CpalBackend;
pub use self::memory::{MemoryBackend, MemoryOutput};

/// Byte buffer cycled between the refill callback and the output.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    data: Vec<u8>,
    valid: usize,
}

impl AudioBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            valid: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes holding audio.
    pub fn valid(&self) -> usize {
        self.valid
    }

    pub fn set_valid(&mut self, n: usize) {
        self.valid = n.min(self.data.len());
    }

    /// Whole writable storage, regardless of the valid length.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The valid audio bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.valid]
    }
}

/// Answer from the refill callback for a dequeued buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refill {
    /// The buffer was filled and enqueued again.
    Queued,
    /// No more data will come; the output should drain and finish.
    EndOfStream,
}

/// Callbacks the output invokes from its message loop.
pub trait OutputCallbacks {
    fn on_dequeue(&mut self, buffer: AudioBuffer) -> Refill;

    /// The last queued buffer has played.
    fn on_complete(&mut self) {}
}

/// A bound output stream.
pub trait OutputDriver: Send + Sync {
    /// Human readable output name for logs.
    fn name(&self) -> String;

    fn params(&self) -> StreamParams;

    fn enqueue(&self, buffer: AudioBuffer) -> Result<()>;

    /// Arm the output; audio starts flowing once the message loop runs.
    fn start(&self) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    /// Ask the message loop to return without draining.
    fn stop(&self) -> Result<()>;

    /// Output gain in percent, clamped to 0..=100.
    fn set_volume(&self, percent: u8) -> Result<()>;

    /// Deliver played buffers to `callbacks` until the queue drains or `stop` is called.
    ///
    /// After a callback answers [`Refill::EndOfStream`] no further dequeues are delivered;
    /// buffers still queued play out and `on_complete` fires.
    fn run_message_loop(&self, callbacks: &mut dyn OutputCallbacks) -> Result<()>;

    /// Times the device asked for audio and none was queued.
    fn underrun_events(&self) -> u64 {
        0
    }
}

/// Factory binding an output for a given stream layout.
pub trait OutputBackend {
    fn init(&self, params: StreamParams) -> Result<Arc<dyn OutputDriver>>;
}
