//! Session lifecycle states and the transition guards between them.

use std::fmt;
use std::sync::Mutex;

use crate::error::{Result, SessionError};

/// Lifecycle state of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No track bound.
    Uninitialized,
    /// Opened, output bound, buffers pre-filled, thread not running.
    Ready,
    /// Playback thread running and the output pulling buffers.
    Playing,
    /// Output paused; the playback thread stays parked in its message loop.
    Paused,
    /// Terminal: stopped by the controller, or the stream ended on its own.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Playing => "playing",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Control operations that move a session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
}

impl Transition {
    fn name(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
        }
    }
}

/// Resolve the state reached by applying `op` in `from`, or reject it.
pub fn next_state(from: SessionState, op: Transition) -> Result<SessionState> {
    use SessionState::*;
    match (from, op) {
        (Ready | Paused, Transition::Start) => Ok(Playing),
        (Playing, Transition::Pause) => Ok(Paused),
        (Paused, Transition::Resume) => Ok(Playing),
        (Playing | Paused, Transition::Stop) => Ok(Stopped),
        (state, op) => Err(SessionError::InvalidState {
            op: op.name(),
            state,
        }),
    }
}

/// Mutex-guarded session state shared by the controller-facing API.
///
/// Control calls take the lock for the whole transition so two controllers can't interleave
/// a check and an update.
#[derive(Debug)]
pub struct StateCell {
    inner: Mutex<SessionState>,
}

impl StateCell {
    pub fn new(initial: SessionState) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate `op`, run `apply` with the target state, and commit only if it succeeds.
    pub fn transition<F>(&self, op: Transition, apply: F) -> Result<SessionState>
    where
        F: FnOnce(SessionState, SessionState) -> Result<()>,
    {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let from = *guard;
        let to = next_state(from, op)?;
        apply(from, to)?;
        *guard = to;
        tracing::debug!(%from, %to, "session state changed");
        Ok(to)
    }

    /// Move a running session to `Stopped` once its stream is over.
    ///
    /// Called from the playback thread; returns `false` if the session was not running.
    pub fn mark_ended(&self) -> bool {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let from = *guard;
        if !matches!(from, SessionState::Playing | SessionState::Paused) {
            return false;
        }
        *guard = SessionState::Stopped;
        tracing::debug!(%from, to = %SessionState::Stopped, "stream ended");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_allowed_from_ready_and_paused_only() {
        assert_eq!(
            next_state(SessionState::Ready, Transition::Start).unwrap(),
            SessionState::Playing
        );
        assert_eq!(
            next_state(SessionState::Paused, Transition::Start).unwrap(),
            SessionState::Playing
        );
        for state in [
            SessionState::Uninitialized,
            SessionState::Playing,
            SessionState::Stopped,
        ] {
            assert!(matches!(
                next_state(state, Transition::Start),
                Err(SessionError::InvalidState { op: "start", .. })
            ));
        }
    }

    #[test]
    fn pause_and_resume_guards() {
        assert!(next_state(SessionState::Ready, Transition::Pause).is_err());
        assert!(next_state(SessionState::Playing, Transition::Resume).is_err());
        assert_eq!(
            next_state(SessionState::Playing, Transition::Pause).unwrap(),
            SessionState::Paused
        );
        assert_eq!(
            next_state(SessionState::Paused, Transition::Resume).unwrap(),
            SessionState::Playing
        );
    }

    #[test]
    fn stop_only_from_running_states() {
        assert!(next_state(SessionState::Ready, Transition::Stop).is_err());
        assert!(next_state(SessionState::Stopped, Transition::Stop).is_err());
        assert_eq!(
            next_state(SessionState::Paused, Transition::Stop).unwrap(),
            SessionState::Stopped
        );
    }

    #[test]
    fn failed_apply_leaves_state_untouched() {
        let cell = StateCell::new(SessionState::Ready);
        let res = cell.transition(Transition::Start, |_, _| Err(SessionError::Busy));
        assert!(res.is_err());
        assert_eq!(cell.get(), SessionState::Ready);
    }

    #[test]
    fn end_of_stream_only_ends_running_sessions() {
        let cell = StateCell::new(SessionState::Ready);
        assert!(!cell.mark_ended());
        assert_eq!(cell.get(), SessionState::Ready);

        cell.transition(Transition::Start, |_, _| Ok(())).unwrap();
        assert!(cell.mark_ended());
        assert_eq!(cell.get(), SessionState::Stopped);
        assert!(!cell.mark_ended());
        assert!(cell.transition(Transition::Stop, |_, _| Ok(())).is_err());
    }
}
