use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Tracks shorter than this never count as a play.
pub const MIN_TRACK_SECONDS: u32 = 30;
/// A play counts after half the track or this many seconds, whichever
/// comes first.
pub const MAX_WAIT_SECONDS: u32 = 240;

/// How long a track of `duration` seconds must keep playing before it is
/// submitted, or `None` if it is too short to ever count.
pub fn scrobble_delay(duration: u32) -> Option<Duration> {
    if duration < MIN_TRACK_SECONDS {
        return None;
    }
    if duration > MAX_WAIT_SECONDS {
        return Some(Duration::from_secs(u64::from(MAX_WAIT_SECONDS)));
    }
    Some(Duration::from_millis(u64::from(duration) * 500))
}

/// Pausable countdown arithmetic. Each resume restarts the clock with
/// whatever was left when it paused.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    started: Instant,
    total: Duration,
    paused_at: Option<Instant>,
}

impl Countdown {
    pub fn start(now: Instant, total: Duration) -> Self {
        Self {
            started: now,
            total,
            paused_at: None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        let until = self.paused_at.unwrap_or(now);
        self.total
            .saturating_sub(until.saturating_duration_since(self.started))
    }

    /// Returns false if it was already paused.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(now);
        true
    }

    /// Restarts from the time left at the pause; `None` if not paused.
    pub fn resume(&mut self, now: Instant) -> Option<Duration> {
        self.paused_at?;
        let remaining = self.remaining(now);
        *self = Countdown::start(now, remaining);
        Some(remaining)
    }
}

type FireFn = Arc<dyn Fn(u64) + Send + Sync>;

/// One-shot timer for the loaded track. Firing calls `fire` with the
/// generation it was armed under; anything armed earlier is stale.
pub struct PlaybackTimer {
    fire: FireFn,
    countdown: Option<Countdown>,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl PlaybackTimer {
    pub fn new(fire: impl Fn(u64) + Send + Sync + 'static) -> Self {
        Self {
            fire: Arc::new(fire),
            countdown: None,
            task: None,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_armed(&self) -> bool {
        self.countdown.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.countdown.is_some_and(|countdown| countdown.is_paused())
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.countdown
            .map(|countdown| countdown.remaining(Instant::now()))
    }

    fn spawn(&mut self, delay: Duration) {
        self.abort_task();
        let fire = self.fire.clone();
        let generation = self.generation;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation);
        }));
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Replaces whatever was pending with a fresh countdown.
    pub fn start(&mut self, total: Duration) {
        self.generation += 1;
        self.countdown = Some(Countdown::start(Instant::now(), total));
        log::debug!("Submission timer armed for {}s", total.as_secs_f32());
        self.spawn(total);
    }

    pub fn pause(&mut self) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        if countdown.pause(Instant::now()) {
            self.generation += 1;
            self.abort_task();
            log::debug!("Submission timer paused");
        }
    }

    pub fn resume(&mut self) {
        let Some(remaining) = self
            .countdown
            .as_mut()
            .and_then(|countdown| countdown.resume(Instant::now()))
        else {
            return;
        };
        self.generation += 1;
        log::debug!("Submission timer resumed, {}s left", remaining.as_secs_f32());
        self.spawn(remaining);
    }

    pub fn cancel(&mut self) {
        self.generation += 1;
        self.countdown = None;
        self.abort_task();
    }

    /// Consumes a fire notification. True only for the live generation.
    pub fn take_fired(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.is_paused() || self.countdown.is_none() {
            return false;
        }
        self.countdown = None;
        self.task = None;
        true
    }
}

impl Drop for PlaybackTimer {
    fn drop(&mut self) {
        self.abort_task();
    }
}
