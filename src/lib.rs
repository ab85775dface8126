pub mod client;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod feeds;
pub mod network;
pub mod prefs;
pub mod protocol;
pub mod queue;
pub mod scrobbler;
pub mod session;
pub mod timer;
pub mod transport;

pub use client::{Delivery, ScrobbleClient};
pub use error::{ClientError, ClientResult};
pub use scrobbler::{Command, Notice, Scrobbler, ScrobblerHandle, TrackInfo};
pub use session::{Session, SessionState};
