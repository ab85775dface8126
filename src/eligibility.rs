//! Decides whether a now-playing or submit request may go out.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    NowPlaying,
    Submit,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::NowPlaying => f.write_str("now playing"),
            RequestKind::Submit => f.write_str("submit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingCredentials,
    ScrobblingDisabled,
    NoPostSession,
    UnknownLength,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::MissingCredentials => "user or pass empty",
            Rejection::ScrobblingDisabled => "scrobble disabled",
            Rejection::NoPostSession => "no post session id",
            Rejection::UnknownLength => "length not specified",
        };
        f.write_str(reason)
    }
}

/// Snapshot of everything besides the track itself that the decision
/// depends on.
#[derive(Debug, Clone, Copy)]
pub struct Gate<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub scrobbling_enabled: bool,
    pub session_established: bool,
    pub post_session_established: bool,
}

/// First failing check wins.
pub fn check(kind: RequestKind, length: u32, gate: &Gate<'_>) -> Result<(), Rejection> {
    if gate.username.is_empty() || gate.password.is_empty() {
        return Err(Rejection::MissingCredentials);
    }
    if !gate.scrobbling_enabled {
        return Err(Rejection::ScrobblingDisabled);
    }
    if gate.session_established && !gate.post_session_established {
        return Err(Rejection::NoPostSession);
    }
    if kind == RequestKind::Submit && length == 0 {
        return Err(Rejection::UnknownLength);
    }
    Ok(())
}

/// [`check`] plus logging; `label` names the track in the log line.
pub fn should_send(kind: RequestKind, length: u32, gate: &Gate<'_>, label: &str) -> bool {
    match check(kind, length, gate) {
        Ok(()) => {
            log::info!("sending {kind}: {label}");
            true
        }
        Err(Rejection::UnknownLength) => {
            log::error!("{kind} ignored ({}): {label}", Rejection::UnknownLength);
            false
        }
        Err(reason) => {
            log::warn!("{kind} ignored ({reason}): {label}");
            false
        }
    }
}
