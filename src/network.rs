use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Host-provided view of network availability.
pub trait Connectivity: Send + Sync {
    /// Link quality; anything above `0.0` is usable.
    fn status(&self) -> f32;

    fn is_online(&self) -> bool {
        self.status() > 0.0
    }
}

/// Shared status value the host updates as the link comes and goes.
#[derive(Debug, Clone)]
pub struct NetworkStatus {
    bits: Arc<AtomicU32>,
}

impl NetworkStatus {
    pub fn new(status: f32) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(status.to_bits())),
        }
    }

    pub fn online() -> Self {
        Self::new(1.0)
    }

    pub fn offline() -> Self {
        Self::new(0.0)
    }

    pub fn set(&self, status: f32) {
        self.bits.store(status.to_bits(), Ordering::Relaxed);
    }
}

impl Connectivity for NetworkStatus {
    fn status(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_updates() {
        let status = NetworkStatus::offline();
        let observer = status.clone();
        assert!(!observer.is_online());
        status.set(0.5);
        assert!(observer.is_online());
        assert_eq!(observer.status(), 0.5);
    }
}
