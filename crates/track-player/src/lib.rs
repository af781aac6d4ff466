//! Track playback pipeline: WAV and MP3 files streamed through a double-buffered output.
//!
//! A [`PlaybackSession`] owns the open file, its decoder state and one output binding.
//! The output pulls filled buffers and hands them back through the refill callback on a
//! dedicated playback thread.

pub mod config;
pub mod decode;
pub mod device;
pub mod error;
pub mod format;
pub mod mp3;
pub mod output;
pub mod position;
pub mod refill;
pub mod session;
pub mod state;
pub mod status;
pub mod wav;

pub use config::PlayerConfig;
pub use error::{Result, SessionError};
pub use format::{AudioFormat, StreamParams, detect};
pub use output::{AudioBuffer, OutputBackend, OutputCallbacks, OutputDriver, Refill};
pub use session::{PlaybackSession, TrackInfo};
pub use state::SessionState;
pub use status::{DecoderStats, EndReason, StatusSnapshot};
