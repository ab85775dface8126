//! Playback-driven control loop.
//!
//! All session, queue and cache mutation happens here, one event at a time.
//! Network calls run on spawned tasks that work on a copy of the session and
//! report back through the same event channel.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::client::{Delivery, ScrobbleClient};
use crate::eligibility::{Gate, RequestKind, should_send};
use crate::error::{ClientError, ClientResult};
use crate::network::Connectivity;
use crate::prefs::Prefs;
use crate::protocol::Source;
use crate::queue::{NowPlayingEvent, PendingQueue, ScrobbleEvent, SubmitCache};
use crate::session::Session;
use crate::timer::{PlaybackTimer, scrobble_delay};

/// Metadata of the track the player just loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub track_number: Option<u32>,
}

impl TrackInfo {
    fn label(&self) -> String {
        format!("{} - {}", self.name, self.album)
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    MediaChanged(TrackInfo),
    Playing,
    Paused,
    DurationUpdated(u32),
    Login,
    Logout,
    SetCredentials { username: String, password: String },
    SetScrobbling(bool),
    Love { artist: String, track: String },
    Ban { artist: String, track: String },
    Enqueue(ScrobbleEvent),
    Flush,
    ConnectivityChanged,
    Shutdown,
}

/// Messages for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    LoggedIn(String),
    LoginFailed(String),
    Unreachable,
    SessionLost(String),
}

/// Finished network work. `epoch` is the session epoch the task's copy
/// was taken at.
enum Completion {
    Login {
        epoch: u64,
        session: Session,
        result: ClientResult<()>,
    },
    NowPlaying {
        epoch: u64,
        session: Session,
        result: ClientResult<Delivery>,
    },
    Submit {
        epoch: u64,
        session: Session,
        result: ClientResult<Delivery>,
    },
    Rpc,
}

enum Event {
    Command(Command),
    TimerFired(u64),
    Completed(Completion),
}

/// Cloneable sender for driving a running [`Scrobbler`] from other tasks.
#[derive(Clone)]
pub struct ScrobblerHandle {
    tx: UnboundedSender<Event>,
}

impl ScrobblerHandle {
    /// False once the loop has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(Event::Command(command)).is_ok()
    }
}

/// Cursor state of the one drain pass allowed at a time.
#[derive(Debug)]
struct Drain {
    cursor: usize,
    /// Set after a failed send; everything behind it waits for the next pass.
    held: bool,
    sent: usize,
}

pub struct Scrobbler {
    client: Arc<ScrobbleClient>,
    session: Session,
    /// Bumped whenever the live session changes; copies from older epochs
    /// are never adopted.
    session_epoch: u64,
    prefs: Prefs,
    pending: PendingQueue,
    cache: SubmitCache,
    drain: Option<Drain>,
    timer: PlaybackTimer,
    track: Option<TrackInfo>,
    length: u32,
    start_time: Option<i64>,
    network: Arc<dyn Connectivity>,
    notices: Option<UnboundedSender<Notice>>,
    in_flight: usize,
    stopping: bool,
    tx: UnboundedSender<Event>,
    rx: UnboundedReceiver<Event>,
}

impl Scrobbler {
    pub fn new(
        client: Arc<ScrobbleClient>,
        prefs: Prefs,
        max_cached: usize,
        network: Arc<dyn Connectivity>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let timer_tx = tx.clone();
        let timer = PlaybackTimer::new(move |generation| {
            let _ = timer_tx.send(Event::TimerFired(generation));
        });
        let session = Session::new(prefs.username(), prefs.password_md5());
        let cache = SubmitCache::load(&prefs, max_cached);
        if !cache.is_empty() {
            log::info!("Loaded {} unsent submissions", cache.len());
        }
        Self {
            client,
            session,
            session_epoch: 0,
            prefs,
            pending: PendingQueue::default(),
            cache,
            drain: None,
            timer,
            track: None,
            length: 0,
            start_time: None,
            network,
            notices: None,
            in_flight: 0,
            stopping: false,
            tx,
            rx,
        }
    }

    pub fn with_notices(mut self, notices: UnboundedSender<Notice>) -> Self {
        self.notices = Some(notices);
        self
    }

    pub fn handle(&self) -> ScrobblerHandle {
        ScrobblerHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn cache(&self) -> &SubmitCache {
        &self.cache
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_draining(&self) -> bool {
        self.drain.is_some()
    }

    pub fn timer(&self) -> &PlaybackTimer {
        &self.timer
    }

    /// Processes events until a [`Command::Shutdown`] arrives.
    /// Outstanding network tasks are waited for, but no new sends start.
    pub async fn run(mut self) {
        while self.step().await {}
        self.stopping = true;
        self.settle().await;
        self.shutdown();
    }

    /// Waits for and processes one event. False on shutdown.
    pub async fn step(&mut self) -> bool {
        match self.rx.recv().await {
            Some(event) => self.dispatch(event),
            None => false,
        }
    }

    /// Processes events until no network task is outstanding.
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            if !self.step().await {
                break;
            }
        }
    }

    fn dispatch(&mut self, event: Event) -> bool {
        match event {
            Event::Command(command) => return self.handle_command(command),
            Event::TimerFired(generation) => {
                if self.timer.take_fired(generation) {
                    self.submit_current();
                }
            }
            Event::Completed(completion) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.complete(completion);
            }
        }
        true
    }

    /// Applies one command. False for [`Command::Shutdown`].
    pub fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::MediaChanged(track) => self.media_changed(track),
            Command::Playing => self.playing(),
            Command::Paused => self.timer.pause(),
            Command::DurationUpdated(duration) => self.duration_updated(duration),
            Command::Login => self.login(),
            Command::Logout => {
                self.session.logout();
                self.session_epoch += 1;
            }
            Command::SetCredentials { username, password } => {
                self.set_credentials(&username, &password)
            }
            Command::SetScrobbling(enabled) => {
                if let Err(err) = self.prefs.set_scrobble_enabled(enabled) {
                    log::error!("Failed saving scrobbling preference: {err:#}");
                }
            }
            Command::Love { artist, track } => self.rate(true, artist, track),
            Command::Ban { artist, track } => self.rate(false, artist, track),
            Command::Enqueue(event) => self.enqueue(event),
            Command::Flush => self.request_drain(),
            Command::ConnectivityChanged => {
                if self.network.is_online() && !(self.pending.is_empty() && self.cache.is_empty())
                {
                    self.request_drain();
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn media_changed(&mut self, track: TrackInfo) {
        self.timer.cancel();
        log::info!("Media changed to {}", track.label());
        self.track = Some(track);
        self.length = 0;
        self.start_time = None;
    }

    fn playing(&mut self) {
        if self.timer.is_paused() {
            self.timer.resume();
        }
        if self.start_time.is_none() {
            self.start_time = Some(Utc::now().timestamp());
            self.announce_now_playing();
        }
    }

    fn duration_updated(&mut self, duration: u32) {
        self.length = duration;
        match scrobble_delay(duration) {
            Some(delay) => self.timer.start(delay),
            None => {
                log::debug!("Track of {duration}s is too short to submit");
                self.timer.cancel();
            }
        }
    }

    fn gate(&self) -> Gate<'_> {
        Gate {
            username: &self.session.username,
            password: &self.session.password_md5,
            scrobbling_enabled: self.prefs.scrobble_enabled(),
            session_established: self.session.session_established(),
            post_session_established: self.session.post_session_established(),
        }
    }

    fn announce_now_playing(&mut self) {
        let Some(track) = &self.track else {
            return;
        };
        if !should_send(RequestKind::NowPlaying, self.length, &self.gate(), &track.label()) {
            return;
        }
        if !self.network.is_online() {
            log::debug!("Now playing not sent, network unavailable");
            return;
        }
        let event = NowPlayingEvent {
            track_name: track.name.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            track_number: track.track_number,
            duration: (self.length > 0).then_some(self.length),
        };
        let client = self.client.clone();
        let mut session = self.session.clone();
        let epoch = self.session_epoch;
        self.spawn_worker(async move {
            let result = client.now_playing(&mut session, &event).await;
            Completion::NowPlaying {
                epoch,
                session,
                result,
            }
        });
    }

    fn submit_current(&mut self) {
        let Some(track) = &self.track else {
            return;
        };
        let event = ScrobbleEvent {
            track_name: track.name.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            track_number: track.track_number,
            duration: self.length,
            start_timestamp: self.start_time.unwrap_or_else(|| Utc::now().timestamp()),
            source: Source::User.code().to_string(),
        };
        self.enqueue(event);
    }

    /// Queues a finished play and starts a drain when possible.
    pub fn enqueue(&mut self, event: ScrobbleEvent) {
        log::info!("Queued submission: {}", event.label());
        self.pending.push(event);
        self.request_drain();
    }

    fn request_drain(&mut self) {
        if self.stopping {
            return;
        }
        if self.drain.is_some() {
            log::debug!("Drain already running, {} pending", self.pending.len());
            return;
        }
        if !self.network.is_online() {
            log::debug!("Network unavailable, {} pending", self.pending.len());
            return;
        }
        self.start_drain();
    }

    fn persist_cache(&mut self) {
        if let Err(err) = self.cache.persist(&mut self.prefs) {
            log::error!("Failed saving submit cache: {err:#}");
        }
    }

    fn start_drain(&mut self) {
        self.cache.merge(&mut self.pending);
        self.persist_cache();
        if self.cache.is_empty() {
            return;
        }
        log::info!("Sending {} cached submissions", self.cache.len());
        self.drain = Some(Drain {
            cursor: 0,
            held: false,
            sent: 0,
        });
        self.advance_drain();
    }

    /// Walks the cache from the cursor until it has to wait on a send or
    /// reaches the end.
    fn advance_drain(&mut self) {
        loop {
            let Some(drain) = self.drain.as_ref() else {
                return;
            };
            let (cursor, held) = (drain.cursor, drain.held);
            if self.stopping {
                self.finish_drain();
                return;
            }
            let Some(entry) = self.cache.get(cursor).cloned() else {
                self.finish_drain();
                return;
            };
            if held {
                if let Some(drain) = self.drain.as_mut() {
                    drain.cursor += 1;
                }
                continue;
            }
            if !should_send(RequestKind::Submit, entry.duration, &self.gate(), &entry.label()) {
                self.cache.remove(cursor);
                self.persist_cache();
                continue;
            }
            let client = self.client.clone();
            let mut session = self.session.clone();
            let epoch = self.session_epoch;
            self.spawn_worker(async move {
                let result = client.submit(&mut session, &entry).await;
                Completion::Submit {
                    epoch,
                    session,
                    result,
                }
            });
            return;
        }
    }

    fn finish_drain(&mut self) {
        self.persist_cache();
        if let Some(drain) = self.drain.take() {
            log::info!(
                "Drain finished: {} sent, {} left in cache",
                drain.sent,
                self.cache.len()
            );
        }
    }

    fn drain_result(&mut self, result: ClientResult<Delivery>) {
        let Some(drain) = self.drain.as_mut() else {
            return;
        };
        let cursor = drain.cursor;
        match result {
            Ok(Delivery::Sent) => {
                drain.sent += 1;
                if let Some(event) = self.cache.remove(cursor) {
                    log::info!("Submitted {}", event.label());
                }
                self.persist_cache();
            }
            Ok(Delivery::Skipped) => {
                drain.held = true;
                drain.cursor += 1;
            }
            Err(err @ (ClientError::InvalidArgument(_) | ClientError::UnsupportedSource(_))) => {
                log::error!("Dropping unsendable submission: {err}");
                self.cache.remove(cursor);
                self.persist_cache();
            }
            Err(err) => {
                log::error!("error on submit: {err}");
                drain.held = true;
                drain.cursor += 1;
                self.report_background_error(&err);
            }
        }
        self.advance_drain();
    }

    fn login(&mut self) {
        let client = self.client.clone();
        let mut session = self.session.clone();
        let epoch = self.session_epoch;
        self.spawn_worker(async move {
            let result = client.login(&mut session).await;
            Completion::Login {
                epoch,
                session,
                result,
            }
        });
    }

    fn set_credentials(&mut self, username: &str, password: &str) {
        let saved = self
            .prefs
            .set_username(username)
            .and_then(|()| self.prefs.set_password(password));
        if let Err(err) = saved {
            log::error!("Failed saving credentials: {err:#}");
        }
        self.session
            .set_credentials(username, &self.prefs.password_md5());
        self.session_epoch += 1;
    }

    fn rate(&mut self, love: bool, artist: String, track: String) {
        let client = self.client.clone();
        let session = self.session.clone();
        self.spawn_worker(async move {
            if love {
                client.love_track(&session, &artist, &track).await;
            } else {
                client.ban_track(&session, &artist, &track).await;
            }
            Completion::Rpc
        });
    }

    fn spawn_worker<F>(&mut self, job: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.tx.clone();
        self.in_flight += 1;
        tokio::spawn(async move {
            let completion = job.await;
            let _ = tx.send(Event::Completed(completion));
        });
    }

    /// Adopts the session a task worked on, unless the live session moved
    /// on while it was out. Adopting a changed copy starts a new epoch.
    fn adopt_session(&mut self, epoch: u64, session: Session) {
        if epoch != self.session_epoch {
            log::debug!(
                "Discarding session update from epoch {epoch}, now at {}",
                self.session_epoch
            );
            return;
        }
        if session != self.session {
            self.session = session;
            self.session_epoch += 1;
        }
    }

    fn notify(&self, notice: Notice) {
        if let Some(notices) = &self.notices {
            let _ = notices.send(notice);
        }
    }

    fn report_background_error(&self, err: &ClientError) {
        if err.is_login_failure() {
            self.notify(Notice::SessionLost(err.to_string()));
        }
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Login {
                epoch,
                session,
                result,
            } => {
                self.adopt_session(epoch, session);
                match result {
                    Ok(()) => self.notify(Notice::LoggedIn(self.session.username.clone())),
                    Err(err) if err.is_login_failure() => {
                        self.notify(Notice::LoginFailed(err.to_string()))
                    }
                    Err(err) => {
                        log::error!("Login failed: {err}");
                        self.notify(Notice::Unreachable);
                    }
                }
            }
            Completion::NowPlaying {
                epoch,
                session,
                result,
            } => {
                self.adopt_session(epoch, session);
                if let Err(err) = result {
                    log::error!("error on now playing: {err}");
                    self.report_background_error(&err);
                }
            }
            Completion::Submit {
                epoch,
                session,
                result,
            } => {
                self.adopt_session(epoch, session);
                self.drain_result(result);
            }
            Completion::Rpc => {}
        }
    }

    /// Folds anything still pending into the durable cache so it survives
    /// the restart.
    pub fn shutdown(&mut self) {
        self.timer.cancel();
        if !self.pending.is_empty() {
            self.cache.merge(&mut self.pending);
        }
        self.persist_cache();
        log::info!("Scrobbler stopped with {} unsent submissions", self.cache.len());
    }
}
