use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rein_core::{ReinError, Result};

/// External pause/stop handle for a run. Clones share state.
#[derive(Clone)]
pub struct RunControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    pub fn pause(&self) {
        info!("run paused");
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        info!("run resumed");
        self.paused.send_replace(false);
    }

    /// Request a clean stop. Takes effect at the next checkpoint.
    pub fn stop(&self) {
        info!("run stop requested");
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Block while paused; fail with [`ReinError::Interrupted`] once stopped.
    pub async fn checkpoint(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(ReinError::Interrupted);
        }
        let mut rx = self.paused.subscribe();
        tokio::select! {
            waited = rx.wait_for(|paused| !paused) => {
                if waited.is_err() {
                    return Err(ReinError::Interrupted);
                }
            }
            _ = self.cancel.cancelled() => return Err(ReinError::Interrupted),
        }
        if self.is_stopped() {
            return Err(ReinError::Interrupted);
        }
        Ok(())
    }

    /// Sleep unless stopped first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(ReinError::Interrupted),
        }
    }
}
