use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle state reported on `/readyz`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    AwaitingAuthorization,
    Refreshing,
    Ready,
}

impl Readiness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Readiness::AwaitingAuthorization => "awaiting-authorization",
            Readiness::Refreshing => "refreshing",
            Readiness::Ready => "ready",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Readiness::AwaitingAuthorization => 0,
            Readiness::Refreshing => 1,
            Readiness::Ready => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Readiness::Refreshing,
            2 => Readiness::Ready,
            _ => Readiness::AwaitingAuthorization,
        }
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared readiness cell; the engine writes it and the server reads it
#[derive(Debug, Clone)]
pub struct ReadinessHandle {
    state: Arc<AtomicU8>,
}

impl ReadinessHandle {
    pub fn new(initial: Readiness) -> Self {
        Self {
            state: Arc::new(AtomicU8::new(initial.to_u8())),
        }
    }

    pub fn get(&self) -> Readiness {
        Readiness::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, readiness: Readiness) {
        let previous = self.state.swap(readiness.to_u8(), Ordering::AcqRel);
        if previous != readiness.to_u8() {
            tracing::debug!("Readiness: {}", readiness);
        }
    }
}

impl Default for ReadinessHandle {
    fn default() -> Self {
        Self::new(Readiness::AwaitingAuthorization)
    }
}
