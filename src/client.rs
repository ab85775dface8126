use std::sync::Arc;

use crate::config::{ClientIdentity, Config, Endpoints};
use crate::error::{ClientError, ClientResult};
use crate::feeds::{
    Profile, TrackDescriptor, parse_profiles, parse_xmlrpc_response, parse_xspf, xmlrpc_request,
};
use crate::protocol::{
    Source, check_reply, current_token, is_ok, parse_key_values, reply_lines,
};
use crate::queue::{NowPlayingEvent, ScrobbleEvent};
use crate::session::{Session, SessionState};
use crate::transport::Transport;

/// Outcome of a now-playing or submit call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No post session id was available, so nothing went out.
    Skipped,
}

/// Talks to the scrobble service on behalf of a [`Session`].
///
/// The client itself holds no session state; every authenticated call takes
/// the session it should act for and updates it in place.
pub struct ScrobbleClient {
    endpoints: Endpoints,
    identity: ClientIdentity,
    transport: Arc<dyn Transport>,
}

impl ScrobbleClient {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoints: config.endpoints.clone(),
            identity: config.client.clone(),
            transport,
        }
    }

    async fn request_lines(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> ClientResult<Vec<String>> {
        let body = self.transport.get(url, query).await?;
        Ok(reply_lines(&body))
    }

    async fn post_lines(&self, url: &str, form: &[(&str, String)]) -> ClientResult<Vec<String>> {
        let body = self.transport.post_form(url, form).await?;
        Ok(reply_lines(&body))
    }

    fn require_credentials(session: &Session) -> ClientResult<()> {
        if session.username.is_empty() {
            return Err(ClientError::InvalidArgument(
                "Username cannot be empty.".to_string(),
            ));
        }
        if session.password_md5.is_empty() {
            return Err(ClientError::InvalidArgument(
                "Password cannot be empty.".to_string(),
            ));
        }
        Ok(())
    }

    /// Radio handshake: establishes the session id and stream location.
    pub async fn handshake(&self, session: &mut Session) -> ClientResult<()> {
        Self::require_credentials(session)?;
        let lines = self
            .request_lines(
                &self.endpoints.radio_handshake,
                &[
                    ("platform", self.identity.platform.clone()),
                    ("version", self.identity.version.clone()),
                    ("username", session.username.clone()),
                    ("passwordmd5", session.password_md5.clone()),
                ],
            )
            .await?;
        let mut params = parse_key_values(&lines);
        let session_id = params.remove("session").ok_or_else(|| {
            ClientError::MalformedResponse("handshake reply without session".to_string())
        })?;
        if session_id == "FAILED" {
            let message = params
                .remove("msg")
                .unwrap_or_else(|| "unknown reason".to_string());
            return Err(ClientError::Handshake(message));
        }
        session.session_id = Some(session_id);
        session.stream_url = params.remove("stream_url");
        session.base_url = params.remove("base_url");
        session.base_path = params.remove("base_path");
        log::debug!("Radio handshake done for {}", session.username);
        Ok(())
    }

    /// Submission handshake: establishes the post session id together with
    /// the now-playing and submission URLs.
    pub async fn second_handshake(&self, session: &mut Session) -> ClientResult<()> {
        Self::require_credentials(session)?;
        let (token, timestamp) = current_token(&session.password_md5);
        let lines = self
            .request_lines(
                &self.endpoints.post_handshake,
                &[
                    ("hs", "true".to_string()),
                    ("a", token),
                    ("t", timestamp.to_string()),
                    ("u", session.username.clone()),
                    ("p", self.identity.protocol_version.clone()),
                    ("c", self.identity.name.clone()),
                    ("v", self.identity.version.clone()),
                ],
            )
            .await?;
        if is_ok(&lines) {
            let [_, post_session_id, now_url, post_url, ..] = lines.as_slice() else {
                return Err(ClientError::MalformedResponse(
                    "submission handshake reply is too short".to_string(),
                ));
            };
            session.post_session_id = Some(post_session_id.clone());
            session.now_url = Some(now_url.clone());
            session.post_url = Some(post_url.clone());
            log::debug!("Submission handshake done for {}", session.username);
            return Ok(());
        }
        session.post_session_id = None;
        check_reply(&lines)
    }

    /// Runs both handshakes. Any failure leaves the session logged out.
    pub async fn login(&self, session: &mut Session) -> ClientResult<()> {
        session.state = SessionState::Handshaking;
        let result = match self.handshake(session).await {
            Ok(()) => self.second_handshake(session).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => {
                session.state = SessionState::LoggedIn;
                log::info!("Logged in as {}", session.username);
                Ok(())
            }
            Err(err) => {
                session.state = SessionState::LoggedOut;
                log::warn!("Login failed for {}: {err}", session.username);
                Err(err)
            }
        }
    }

    pub fn logout(&self, session: &mut Session) {
        session.logout();
    }

    async fn ensure_logged(&self, session: &mut Session) -> ClientResult<()> {
        if !session.logged() {
            self.login(session).await?;
        }
        Ok(())
    }

    fn downgrade_on_auth<T>(session: &mut Session, result: ClientResult<T>) -> ClientResult<T> {
        if let Err(err) = &result
            && err.is_auth_class()
        {
            log::warn!("Session for {} invalidated: {err}", session.username);
            session.logout();
        }
        result
    }

    pub async fn now_playing(
        &self,
        session: &mut Session,
        track: &NowPlayingEvent,
    ) -> ClientResult<Delivery> {
        self.ensure_logged(session).await?;
        let (Some(post_session_id), Some(now_url)) =
            (session.post_session_id.clone(), session.now_url.clone())
        else {
            log::warn!("Now playing skipped, no post session for {}", session.username);
            return Ok(Delivery::Skipped);
        };
        let form = [
            ("s", post_session_id),
            ("t", track.track_name.clone()),
            ("a", track.artist.clone()),
            ("b", track.album.clone()),
            ("l", optional_number(track.duration)),
            ("n", optional_number(track.track_number)),
            ("m", String::new()),
        ];
        let result = match self.post_lines(&now_url, &form).await {
            Ok(lines) => check_reply(&lines),
            Err(err) => Err(err),
        };
        Self::downgrade_on_auth(session, result).map(|()| Delivery::Sent)
    }

    pub async fn submit(
        &self,
        session: &mut Session,
        event: &ScrobbleEvent,
    ) -> ClientResult<Delivery> {
        let source = Source::parse(&event.source)?;
        if event.duration == 0 {
            return Err(ClientError::InvalidArgument(
                "You must specify length".to_string(),
            ));
        }
        self.ensure_logged(session).await?;
        let (Some(post_session_id), Some(post_url)) =
            (session.post_session_id.clone(), session.post_url.clone())
        else {
            log::warn!("Submit skipped, no post session for {}", session.username);
            return Ok(Delivery::Skipped);
        };
        let form = [
            ("s", post_session_id),
            ("t[0]", event.track_name.clone()),
            ("a[0]", event.artist.clone()),
            ("b[0]", event.album.clone()),
            ("l[0]", event.duration.to_string()),
            ("n[0]", optional_number(event.track_number)),
            ("i[0]", event.start_timestamp.to_string()),
            ("o[0]", source.code().to_string()),
            ("r[0]", String::new()),
            ("m[0]", String::new()),
        ];
        let result = match self.post_lines(&post_url, &form).await {
            Ok(lines) => check_reply(&lines),
            Err(err) => Err(err),
        };
        Self::downgrade_on_auth(session, result).map(|()| Delivery::Sent)
    }

    /// Tunes the radio stream to a `lastfm://` station URL.
    pub async fn tune(&self, session: &mut Session, target: &str) -> ClientResult<()> {
        self.ensure_logged(session).await?;
        let session_id = session.session_id.clone().unwrap_or_default();
        let lines = self
            .request_lines(
                &self.endpoints.radio_adjust,
                &[
                    ("url", target.to_string()),
                    ("lang", "en".to_string()),
                    ("debug", "0".to_string()),
                    ("session", session_id),
                ],
            )
            .await?;
        let mut params = parse_key_values(&lines);
        match params.remove("response").as_deref() {
            Some("OK") => {
                session.user_url = params.remove("url");
                session.station_name = params.remove("stationname");
                session.discovery = params
                    .remove("discovery")
                    .is_some_and(|flag| flag != "0" && !flag.is_empty());
                log::info!(
                    "Tuned to {}",
                    session.station_name.as_deref().unwrap_or(target)
                );
                Ok(())
            }
            Some(response) if !response.is_empty() => {
                Err(ClientError::Tuning(response.to_string()))
            }
            _ => Err(ClientError::UnknownTuning),
        }
    }

    pub async fn tune_user(
        &self,
        session: &mut Session,
        user: &str,
        feature: &str,
    ) -> ClientResult<()> {
        self.tune(session, &format!("lastfm://user/{user}/{feature}"))
            .await
    }

    /// Track list of the currently tuned station, in playlist order.
    pub async fn get_tracks(&self, session: &mut Session) -> ClientResult<Vec<TrackDescriptor>> {
        self.ensure_logged(session).await?;
        let session_id = session.session_id.clone().unwrap_or_default();
        let xml = self
            .transport
            .get(
                &self.endpoints.radio_xspf,
                &[
                    ("sk", session_id),
                    ("desktop", "0.1".to_string()),
                    ("discovery", "0".to_string()),
                ],
            )
            .await?;
        parse_xspf(&xml)
    }

    async fn user_feed(&self, username: &str, feed: &str) -> ClientResult<Vec<Profile>> {
        let url = format!("{}/{username}/{feed}.xml", self.endpoints.user_feed);
        let xml = self.transport.get(&url, &[]).await?;
        parse_profiles(&xml)
    }

    pub async fn get_friends(&self, username: &str) -> ClientResult<Vec<Profile>> {
        self.user_feed(username, "friends").await
    }

    pub async fn get_neighbours(&self, username: &str) -> ClientResult<Vec<Profile>> {
        self.user_feed(username, "neighbours").await
    }

    async fn execute_rpc(
        &self,
        session: &Session,
        method: &str,
        artist: &str,
        track: &str,
    ) -> ClientResult<bool> {
        Self::require_credentials(session)?;
        let (token, timestamp) = current_token(&session.password_md5);
        let timestamp = timestamp.to_string();
        let body = xmlrpc_request(
            method,
            &[
                session.username.as_str(),
                timestamp.as_str(),
                token.as_str(),
                artist,
                track,
            ],
        )?;
        let xml = self.transport.post_xml(&self.endpoints.xmlrpc, body).await?;
        Ok(parse_xmlrpc_response(&xml)? == "OK")
    }

    async fn best_effort_rpc(
        &self,
        session: &Session,
        method: &str,
        artist: &str,
        track: &str,
    ) -> bool {
        match self.execute_rpc(session, method, artist, track).await {
            Ok(true) => {
                log::info!("{method} succeeded: {artist} - {track}");
                true
            }
            Ok(false) => {
                log::warn!("{method} refused: {artist} - {track}");
                false
            }
            Err(err) => {
                log::error!("{method} failed for {artist} - {track}: {err}");
                false
            }
        }
    }

    pub async fn love_track(&self, session: &Session, artist: &str, track: &str) -> bool {
        self.best_effort_rpc(session, "loveTrack", artist, track)
            .await
    }

    pub async fn ban_track(&self, session: &Session, artist: &str, track: &str) -> bool {
        self.best_effort_rpc(session, "banTrack", artist, track)
            .await
    }
}

fn optional_number(value: Option<u32>) -> String {
    value.map(|number| number.to_string()).unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::fake::FakeTransport;

    pub const NOW_URL: &str = "http://post.example/np";
    pub const POST_URL: &str = "http://post.example/submit";

    pub fn password_md5() -> String {
        format!("{:x}", md5::compute("secret"))
    }

    pub fn radio_ok() -> String {
        "session=sid-1\nstream_url=http://stream.example/\nbase_url=ws.example\nbase_path=/radio\n"
            .to_string()
    }

    pub fn post_ok() -> String {
        format!("OK\npsid-1\n{NOW_URL}\n{POST_URL}\n")
    }

    /// Scripts a successful double handshake.
    pub fn script_login(fake: &FakeTransport, endpoints: &Endpoints) {
        fake.reply(&endpoints.radio_handshake, &radio_ok());
        fake.reply(&endpoints.post_handshake, &post_ok());
    }

    fn setup() -> (Arc<FakeTransport>, ScrobbleClient, Session) {
        let fake = Arc::new(FakeTransport::new());
        let client = ScrobbleClient::new(&Config::default(), fake.clone());
        (fake, client, Session::new("alice", password_md5()))
    }

    pub fn scrobble(name: &str) -> ScrobbleEvent {
        ScrobbleEvent {
            track_name: name.to_string(),
            artist: "Boards of Canada".to_string(),
            album: "Geogaddi".to_string(),
            track_number: Some(3),
            duration: 251,
            start_timestamp: 1_700_000_000,
            source: "P".to_string(),
        }
    }

    #[tokio::test]
    async fn login_runs_both_handshakes() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        script_login(&fake, &endpoints);

        client.login(&mut session).await.unwrap();

        assert!(session.logged());
        assert_eq!(session.session_id.as_deref(), Some("sid-1"));
        assert_eq!(session.stream_url.as_deref(), Some("http://stream.example/"));
        assert_eq!(session.post_session_id.as_deref(), Some("psid-1"));
        assert_eq!(session.now_url.as_deref(), Some(NOW_URL));
        assert_eq!(session.post_url.as_deref(), Some(POST_URL));

        let radio = &fake.requests_to(&endpoints.radio_handshake)[0];
        assert_eq!(radio.param("passwordmd5"), Some(password_md5().as_str()));
        let post = &fake.requests_to(&endpoints.post_handshake)[0];
        assert_eq!(post.param("hs"), Some("true"));
        assert_eq!(post.param("p"), Some("1.2"));
        let timestamp: i64 = post.param("t").unwrap().parse().unwrap();
        let (token, _) = crate::protocol::auth_token(&password_md5(), timestamp);
        assert_eq!(post.param("a"), Some(token.as_str()));
    }

    #[tokio::test]
    async fn failed_radio_handshake_is_a_handshake_error() {
        let (fake, client, mut session) = setup();
        fake.reply(
            &Endpoints::default().radio_handshake,
            "session=FAILED\nmsg=Wrong password\n",
        );
        let err = client.login(&mut session).await.unwrap_err();
        assert!(matches!(err, ClientError::Handshake(message) if message == "Wrong password"));
        assert_eq!(session.state, SessionState::LoggedOut);
        assert!(fake.requests_to(&Endpoints::default().post_handshake).is_empty());
    }

    #[tokio::test]
    async fn badauth_on_second_handshake_logs_out() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        fake.reply(&endpoints.radio_handshake, &radio_ok());
        fake.reply(&endpoints.post_handshake, "BADAUTH\n");
        let err = client.login(&mut session).await.unwrap_err();
        assert!(err.is_auth_class());
        assert!(!session.logged());
        assert!(session.session_established());
        assert!(!session.post_session_established());
    }

    #[tokio::test]
    async fn badtime_leaves_post_session_unset_but_logs_in() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        fake.reply(&endpoints.radio_handshake, &radio_ok());
        fake.reply(&endpoints.post_handshake, "BADTIME\n");
        client.login(&mut session).await.unwrap();
        assert!(session.logged());
        assert!(!session.post_session_established());
    }

    #[tokio::test]
    async fn empty_credentials_are_invalid_arguments() {
        let (fake, client, _) = setup();
        let mut session = Session::new("", password_md5());
        let err = client.login(&mut session).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument(_)));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn now_playing_logs_in_on_demand() {
        let (fake, client, mut session) = setup();
        script_login(&fake, &Endpoints::default());
        fake.reply(NOW_URL, "OK\n");
        let track = NowPlayingEvent {
            track_name: "Dawn Chorus".to_string(),
            artist: "Boards of Canada".to_string(),
            album: "Geogaddi".to_string(),
            track_number: None,
            duration: Some(240),
        };
        let delivery = client.now_playing(&mut session, &track).await.unwrap();
        assert_eq!(delivery, Delivery::Sent);
        let request = &fake.requests_to(NOW_URL)[0];
        assert_eq!(request.method, "POST");
        assert_eq!(request.param("s"), Some("psid-1"));
        assert_eq!(request.param("l"), Some("240"));
        assert_eq!(request.param("n"), Some(""));
    }

    #[tokio::test]
    async fn now_playing_without_post_session_is_skipped() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        fake.reply(&endpoints.radio_handshake, &radio_ok());
        fake.reply(&endpoints.post_handshake, "BADTIME\n");
        let track = NowPlayingEvent {
            track_name: "t".to_string(),
            artist: "a".to_string(),
            album: String::new(),
            track_number: None,
            duration: None,
        };
        let delivery = client.now_playing(&mut session, &track).await.unwrap();
        assert_eq!(delivery, Delivery::Skipped);
        assert!(fake.requests_to(NOW_URL).is_empty());
    }

    #[tokio::test]
    async fn submit_sends_indexed_fields() {
        let (fake, client, mut session) = setup();
        script_login(&fake, &Endpoints::default());
        fake.reply(POST_URL, "OK\n");
        let delivery = client.submit(&mut session, &scrobble("Julie and Candy")).await.unwrap();
        assert_eq!(delivery, Delivery::Sent);
        let request = &fake.requests_to(POST_URL)[0];
        assert_eq!(request.param("t[0]"), Some("Julie and Candy"));
        assert_eq!(request.param("l[0]"), Some("251"));
        assert_eq!(request.param("n[0]"), Some("3"));
        assert_eq!(request.param("i[0]"), Some("1700000000"));
        assert_eq!(request.param("o[0]"), Some("P"));
    }

    #[tokio::test]
    async fn submit_rejects_bad_arguments_before_any_request() {
        let (fake, client, mut session) = setup();
        let mut zero = scrobble("x");
        zero.duration = 0;
        assert!(matches!(
            client.submit(&mut session, &zero).await,
            Err(ClientError::InvalidArgument(_))
        ));
        let mut radio = scrobble("x");
        radio.source = "L".to_string();
        assert!(matches!(
            client.submit(&mut session, &radio).await,
            Err(ClientError::UnsupportedSource(_))
        ));
        assert!(fake.requests().is_empty());
    }

    #[tokio::test]
    async fn badsession_on_submit_downgrades_session() {
        let (fake, client, mut session) = setup();
        script_login(&fake, &Endpoints::default());
        fake.reply(POST_URL, "BADSESSION\n");
        let err = client.submit(&mut session, &scrobble("x")).await.unwrap_err();
        assert!(err.is_auth_class());
        assert!(!session.logged());
    }

    #[tokio::test]
    async fn transport_failure_keeps_session() {
        let (fake, client, mut session) = setup();
        script_login(&fake, &Endpoints::default());
        fake.fail(POST_URL, "connection reset");
        let err = client.submit(&mut session, &scrobble("x")).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(session.logged());
    }

    #[tokio::test]
    async fn tune_records_station() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        script_login(&fake, &endpoints);
        fake.reply(
            &endpoints.radio_adjust,
            "response=OK\nurl=http://last.fm/listen/artist/Autechre\nstationname=Autechre Radio\ndiscovery=1\n",
        );
        client
            .tune(&mut session, "lastfm://artist/Autechre/similarartists")
            .await
            .unwrap();
        assert_eq!(session.station_name.as_deref(), Some("Autechre Radio"));
        assert_eq!(
            session.user_url.as_deref(),
            Some("http://last.fm/listen/artist/Autechre")
        );
        assert!(session.discovery);
        let request = &fake.requests_to(&endpoints.radio_adjust)[0];
        assert_eq!(request.param("session"), Some("sid-1"));
    }

    #[tokio::test]
    async fn tune_errors() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        script_login(&fake, &endpoints);
        fake.reply(&endpoints.radio_adjust, "response=Station not available\n");
        fake.reply(&endpoints.radio_adjust, "error=4\n");
        assert!(matches!(
            client.tune(&mut session, "lastfm://group/x").await,
            Err(ClientError::Tuning(message)) if message == "Station not available"
        ));
        assert!(matches!(
            client.tune_user(&mut session, "bob", "personal").await,
            Err(ClientError::UnknownTuning)
        ));
        let requests = fake.requests_to(&endpoints.radio_adjust);
        assert_eq!(requests[1].param("url"), Some("lastfm://user/bob/personal"));
    }

    #[tokio::test]
    async fn empty_tune_response_is_unknown() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        script_login(&fake, &endpoints);
        fake.reply(&endpoints.radio_adjust, "response=\n");
        assert!(matches!(
            client.tune(&mut session, "lastfm://artist/Cluster").await,
            Err(ClientError::UnknownTuning)
        ));
    }

    #[tokio::test]
    async fn get_tracks_parses_playlist() {
        let (fake, client, mut session) = setup();
        let endpoints = Endpoints::default();
        script_login(&fake, &endpoints);
        fake.reply(
            &endpoints.radio_xspf,
            "<playlist><trackList><track><title>One</title><id>1</id><creator>A</creator>\
             <album>B</album><location>http://s/1</location><duration>1000</duration>\
             <image>http://i/1</image></track></trackList></playlist>",
        );
        let tracks = client.get_tracks(&mut session).await.unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].location, "http://s/1");
        assert_eq!(
            fake.requests_to(&endpoints.radio_xspf)[0].param("sk"),
            Some("sid-1")
        );
    }

    #[tokio::test]
    async fn friends_and_neighbours_use_user_feed() {
        let (fake, client, _) = setup();
        let base = Endpoints::default().user_feed;
        fake.reply(
            &format!("{base}/alice/friends.xml"),
            r#"<friends><user username="bob"><url>u</url><image>i</image></user></friends>"#,
        );
        fake.reply(
            &format!("{base}/alice/neighbours.xml"),
            r#"<neighbours><user username="eve"><url>u</url><image>i</image></user></neighbours>"#,
        );
        assert_eq!(client.get_friends("alice").await.unwrap()[0].username, "bob");
        assert_eq!(client.get_neighbours("alice").await.unwrap()[0].username, "eve");
    }

    #[tokio::test]
    async fn love_and_ban_report_success_as_bool() {
        let (fake, client, session) = setup();
        let xmlrpc = Endpoints::default().xmlrpc;
        fake.reply(
            &xmlrpc,
            "<methodResponse><params><param><value><string>OK</string></value></param></params></methodResponse>",
        );
        fake.fail(&xmlrpc, "timeout");
        assert!(client.love_track(&session, "Autechre", "Gantz Graf").await);
        assert!(!client.ban_track(&session, "Autechre", "Gantz Graf").await);
        let requests = fake.requests_to(&xmlrpc);
        let body = requests[0].body.as_deref().unwrap();
        assert!(body.contains("<methodName>loveTrack</methodName>"));
        assert!(body.contains("<string>alice</string>"));
        assert!(requests[1].body.as_deref().unwrap().contains("banTrack"));
    }
}
