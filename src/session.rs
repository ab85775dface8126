use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    #[default]
    LoggedOut,
    Handshaking,
    LoggedIn,
}

/// Credentials plus everything the two handshakes and station tuning
/// hand back. One per process, owned by whoever drives playback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    pub password_md5: String,
    pub session_id: Option<String>,
    pub stream_url: Option<String>,
    pub base_url: Option<String>,
    pub base_path: Option<String>,
    pub post_session_id: Option<String>,
    pub now_url: Option<String>,
    pub post_url: Option<String>,
    pub user_url: Option<String>,
    pub station_name: Option<String>,
    pub discovery: bool,
    pub state: SessionState,
}

impl Session {
    pub fn new(username: impl Into<String>, password_md5: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_md5: password_md5.into(),
            ..Self::default()
        }
    }

    pub fn logged(&self) -> bool {
        self.state == SessionState::LoggedIn
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password_md5.is_empty()
    }

    /// First handshake done.
    pub fn session_established(&self) -> bool {
        self.session_id.is_some()
    }

    /// Second handshake done; required for now-playing and submissions.
    pub fn post_session_established(&self) -> bool {
        self.post_session_id.is_some()
    }

    pub fn logout(&mut self) {
        if self.logged() {
            log::info!("Logged out {}", self.username);
        }
        self.state = SessionState::LoggedOut;
    }

    /// Swaps credentials and forgets every identifier tied to the old ones.
    pub fn set_credentials(&mut self, username: &str, password_md5: &str) {
        *self = Session::new(username, password_md5);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_logged_out_without_identifiers() {
        let session = Session::new("alice", "abc");
        assert_eq!(session.state, SessionState::LoggedOut);
        assert!(session.has_credentials());
        assert!(!session.session_established());
        assert!(!session.post_session_established());
    }

    #[test]
    fn logout_keeps_identifiers() {
        let mut session = Session::new("alice", "abc");
        session.session_id = Some("sid".into());
        session.state = SessionState::LoggedIn;
        session.logout();
        assert!(!session.logged());
        assert!(session.session_established());
    }

    #[test]
    fn changing_credentials_resets_everything() {
        let mut session = Session::new("alice", "abc");
        session.post_session_id = Some("psid".into());
        session.state = SessionState::LoggedIn;
        session.set_credentials("bob", "def");
        assert_eq!(session, Session::new("bob", "def"));
    }
}
