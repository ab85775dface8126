//! Plain-text reply handling shared by the handshake, tuning and
//! submission endpoints.

use std::collections::HashMap;

use crate::error::{ClientError, ClientResult};

pub fn reply_lines(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `key=value` lines, splitting on the first `=`. Lines without one
/// are skipped.
pub fn parse_key_values(lines: &[String]) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in lines {
        match line.split_once('=') {
            Some((key, value)) => {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => log::debug!("Skipping reply line without '=': {line}"),
        }
    }
    values
}

fn has_token(lines: &[String], token: &str) -> bool {
    lines
        .iter()
        .any(|line| line.split_whitespace().next() == Some(token))
}

/// Maps the error tokens of a post-handshake style reply onto errors.
/// `BADTIME` is tolerated: the caller simply ends up without a post session.
pub fn check_reply(lines: &[String]) -> ClientResult<()> {
    if has_token(lines, "BADAUTH") {
        return Err(ClientError::Authentication(
            "Invalid username or password".to_string(),
        ));
    }
    if has_token(lines, "BANNED") {
        return Err(ClientError::Authentication(
            "You have been banned from this server".to_string(),
        ));
    }
    if has_token(lines, "BADTIME") {
        log::warn!("Server reported a bad timestamp, submissions disabled");
        return Ok(());
    }
    if has_token(lines, "FAILED") {
        let reason = lines.first().map(String::as_str).unwrap_or_default();
        return Err(ClientError::Authentication(format!(
            "Authentication failed. Reason: {reason}"
        )));
    }
    if has_token(lines, "BADSESSION") {
        return Err(ClientError::Authentication("Bad session error".to_string()));
    }
    Ok(())
}

pub fn is_ok(lines: &[String]) -> bool {
    has_token(lines, "OK")
}

/// Returns `(token, timestamp)` where the token is
/// `md5(md5(password) + timestamp)`.
pub fn auth_token(password_md5: &str, timestamp: i64) -> (String, i64) {
    let token = format!("{:x}", md5::compute(format!("{password_md5}{timestamp}")));
    (token, timestamp)
}

pub fn current_token(password_md5: &str) -> (String, i64) {
    auth_token(password_md5, chrono::Utc::now().timestamp())
}

/// Where a submitted play came from. Only user-chosen playback is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    User,
}

impl Source {
    pub fn parse(code: &str) -> ClientResult<Self> {
        match code {
            "P" | "p" => Ok(Source::User),
            _ => Err(ClientError::UnsupportedSource(code.to_string())),
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Source::User => "P",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn key_values_split_on_first_equals() {
        let parsed = parse_key_values(&lines(&[
            "session=abc",
            "stream_url=http://host/stream?a=b",
            "garbage",
        ]));
        assert_eq!(parsed["session"], "abc");
        assert_eq!(parsed["stream_url"], "http://host/stream?a=b");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn reply_lines_drop_blank_lines() {
        assert_eq!(reply_lines("OK\n\n  sid \nhttp://np\n"), lines(&["OK", "sid", "http://np"]));
    }

    #[test]
    fn error_tokens_map_to_authentication_errors() {
        for reply in [&["BADAUTH"][..], &["BANNED"], &["BADSESSION"], &["FAILED Plugin bug"]] {
            let err = check_reply(&lines(reply)).unwrap_err();
            assert!(err.is_auth_class(), "{reply:?} -> {err}");
        }
    }

    #[test]
    fn failed_reply_carries_the_reason_line() {
        let err = check_reply(&lines(&["FAILED Plugin bug"])).unwrap_err();
        assert_eq!(err.to_string(), "Authentication failed. Reason: FAILED Plugin bug");
    }

    #[test]
    fn badtime_and_ok_pass() {
        assert!(check_reply(&lines(&["BADTIME"])).is_ok());
        assert!(check_reply(&lines(&["OK"])).is_ok());
        assert!(is_ok(&lines(&["OK", "sid"])));
        assert!(!is_ok(&lines(&["BADTIME"])));
    }

    #[test]
    fn token_hashes_digest_and_timestamp() {
        let password_md5 = format!("{:x}", md5::compute("secret"));
        let (token, timestamp) = auth_token(&password_md5, 1_200_000_000);
        assert_eq!(timestamp, 1_200_000_000);
        assert_eq!(
            token,
            format!("{:x}", md5::compute(format!("{password_md5}1200000000")))
        );
    }

    #[test]
    fn only_user_source_is_supported() {
        assert_eq!(Source::parse("P").unwrap(), Source::User);
        assert_eq!(Source::parse("p").unwrap().code(), "P");
        assert!(matches!(
            Source::parse("R"),
            Err(ClientError::UnsupportedSource(code)) if code == "R"
        ));
    }
}
