//! Interrupt flag shared between the signal handler and the crawl loop

use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative stop request, checked at page boundaries
///
/// Waits inside the crawl loop (rate limiting, retry pauses) can also race
/// against [`ShutdownSignal::wait`] so an interrupt does not sit out a long
/// cooldown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(Arc<watch::Sender<bool>>);

impl Default for ShutdownSignal {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the signal has been triggered
    pub async fn wait(&self) {
        let mut rx = self.0.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}
