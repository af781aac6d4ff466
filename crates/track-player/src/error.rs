//! Errors surfaced by the session control surface.
//!
//! Runtime failures inside the refill callback are never returned here; they end the
//! stream and show up as [`crate::status::EndReason`] instead.

use std::fmt;
use std::path::PathBuf;

use crate::state::SessionState;

/// Errors returned by [`crate::session::PlaybackSession`] operations.
#[derive(Debug)]
pub enum SessionError {
    /// The path extension is not one of the decodable formats.
    UnsupportedFormat { path: PathBuf },
    /// The source file could not be opened.
    Open { path: PathBuf, source: std::io::Error },
    /// The output device rejected the derived stream parameters.
    HardwareInit { reason: String },
    /// The container header or the frame decoder could not be set up.
    DecoderInit { reason: String },
    /// The call is not permitted from the current state.
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    /// A previous seek has not been consumed by the refill callback yet.
    Busy,
    /// The output collaborator failed a control call.
    Output { reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnsupportedFormat { path } => {
                write!(f, "unsupported audio format: {}", path.display())
            }
            SessionError::Open { path, source } => {
                write!(f, "can't open audio file {}: {source}", path.display())
            }
            SessionError::HardwareInit { reason } => write!(f, "output init failed: {reason}"),
            SessionError::DecoderInit { reason } => write!(f, "decoder init failed: {reason}"),
            SessionError::InvalidState { op, state } => {
                write!(f, "{op} is not allowed while {state}")
            }
            SessionError::Busy => f.write_str("a seek is already pending"),
            SessionError::Output { reason } => write!(f, "output error: {reason}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Open { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl SessionError {
    /// Wrap an output driver failure from a control call.
    pub(crate) fn output(err: anyhow::Error) -> Self {
        SessionError::Output {
            reason: format!("{err:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_operation_and_state() {
        let err = SessionError::InvalidState {
            op: "pause",
            state: SessionState::Ready,
        };
        assert_eq!(err.to_string(), "pause is not allowed while ready");
    }

    #[test]
    fn open_error_exposes_io_source() {
        use std::error::Error as _;
        let err = SessionError::Open {
            path: PathBuf::from("/missing.wav"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/missing.wav"));
    }
}
