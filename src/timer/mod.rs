//! Cancellable delays.
//!
//! Every sleep in the runner goes through a `Timer` together with the run's
//! cancellation token, so a shutdown request never waits out a delay.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The delay was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("delay cancelled")]
pub struct Cancelled;

#[async_trait]
pub trait Timer: Send + Sync {
    /// Sleep for `duration`, or fail with `Cancelled` as soon as `cancel` fires.
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled>;
}

/// Timer backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        // Dropping the losing sleep future deregisters its timer entry.
        tokio::select! {
            _ = cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Timer that returns immediately and records every requested delay.
#[derive(Debug, Default)]
pub struct RecordingTimer {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Timer for RecordingTimer {
    async fn delay(&self, duration: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
        if cancel.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}
