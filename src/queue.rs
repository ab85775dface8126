use std::collections::VecDeque;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::prefs::{KEY_SUBMIT_CACHE, Prefs};

/// One play worth submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrobbleEvent {
    pub track_name: String,
    pub artist: String,
    pub album: String,
    pub track_number: Option<u32>,
    pub duration: u32,
    pub start_timestamp: i64,
    pub source: String,
}

impl ScrobbleEvent {
    pub fn label(&self) -> String {
        format!("{} - {}", self.track_name, self.album)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlayingEvent {
    pub track_name: String,
    pub artist: String,
    pub album: String,
    pub track_number: Option<u32>,
    pub duration: Option<u32>,
}

/// Events produced during playback that have not reached the durable
/// cache yet. Never bounded.
#[derive(Debug, Default)]
pub struct PendingQueue {
    events: VecDeque<ScrobbleEvent>,
}

impl PendingQueue {
    pub fn push(&mut self, event: ScrobbleEvent) {
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = ScrobbleEvent> + '_ {
        self.events.drain(..)
    }
}

/// Unsent submissions that outlive the process, kept in [`Prefs`] under
/// `submit_cache` and capped at `max_cached` entries.
#[derive(Debug)]
pub struct SubmitCache {
    entries: Vec<ScrobbleEvent>,
    max_cached: usize,
}

impl SubmitCache {
    /// A cap of zero is raised to one so the newest play is always kept.
    pub fn load(prefs: &Prefs, max_cached: usize) -> Self {
        let max_cached = max_cached.max(1);
        let mut entries: Vec<ScrobbleEvent> = prefs.get_or(KEY_SUBMIT_CACHE, Vec::new());
        if entries.len() > max_cached {
            entries.drain(..entries.len() - max_cached);
        }
        Self {
            entries,
            max_cached,
        }
    }

    pub fn entries(&self) -> &[ScrobbleEvent] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ScrobbleEvent> {
        self.entries.get(index)
    }

    /// Appends one event, first dropping the oldest entries so that the
    /// cache never exceeds its cap.
    pub fn push(&mut self, event: ScrobbleEvent) {
        if self.entries.len() >= self.max_cached {
            let excess = self.entries.len() + 1 - self.max_cached;
            log::warn!("Submit cache full, dropping {excess} oldest entries");
            self.entries.drain(..excess);
        }
        self.entries.push(event);
    }

    /// Moves every pending event into the cache in order. Returns how many
    /// were merged.
    pub fn merge(&mut self, pending: &mut PendingQueue) -> usize {
        let mut merged = 0;
        for event in pending.drain() {
            self.push(event);
            merged += 1;
        }
        merged
    }

    pub fn remove(&mut self, index: usize) -> Option<ScrobbleEvent> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    pub fn persist(&self, prefs: &mut Prefs) -> Result<()> {
        prefs.set(KEY_SUBMIT_CACHE, &self.entries)?;
        prefs.save()
    }
}
