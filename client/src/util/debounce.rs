//! Re-armable quiet-period timer.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Runs an action once a full quiet window has elapsed since the last
/// poke. Each poke replaces any pending action with the new one.
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    /// (Re)starts the window; `fire` runs when it expires undisturbed.
    pub fn poke<F>(&self, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let window = self.window;
        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            fire.await;
        }));
    }

    /// Drops any pending action without running it.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for Debounce {
    fn drop(&mut self) {
        self.cancel();
    }
}
