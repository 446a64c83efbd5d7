//! Host lifecycle hooks
//!
//! The host keeps a background service alive while it holds a [`Deferral`]
//! and reclaims it once the deferral is completed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use smol::channel::{self, Receiver, Sender};

/// Why the host cancelled a running service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    Abort,
    Terminating,
    ConnectionClosed,
}

/// Completion token for a started lifecycle
///
/// Clones share state; only the first [`complete`](Deferral::complete) signals
/// the host.
#[derive(Debug, Clone)]
pub struct Deferral {
    inner: Arc<DeferralInner>,
}

#[derive(Debug)]
struct DeferralInner {
    completed: AtomicBool,
    signal: Sender<()>,
}

impl Deferral {
    pub fn new(signal: Sender<()>) -> Self {
        Self {
            inner: Arc::new(DeferralInner {
                completed: AtomicBool::new(false),
                signal,
            }),
        }
    }

    /// Tell the host the work is done. Returns `true` on the first call only.
    pub fn complete(&self) -> bool {
        if self.inner.completed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.inner.signal.try_send(());
        tracing::debug!("deferral completed");
        true
    }
}

/// The host side of a background service's lifetime
pub trait HostLifecycle: Send + Sync {
    fn get_deferral(&self) -> Deferral;
}

/// Lifecycle for a service running as its own process
///
/// The process awaits [`wait`](ProcessLifecycle::wait) and exits once the
/// service completes its deferral.
#[derive(Debug)]
pub struct ProcessLifecycle {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl ProcessLifecycle {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// Wait for a deferral handed out by this lifecycle to complete
    pub async fn wait(&self) {
        let _ = self.rx.recv().await;
    }

    /// Number of completions signalled and not yet awaited
    pub fn completions(&self) -> usize {
        self.rx.len()
    }
}

impl Default for ProcessLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifecycle for ProcessLifecycle {
    fn get_deferral(&self) -> Deferral {
        Deferral::new(self.tx.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferral_completes_once() {
        let lifecycle = ProcessLifecycle::new();
        let deferral = lifecycle.get_deferral();
        let clone = deferral.clone();

        assert_eq!(lifecycle.completions(), 0);
        assert!(deferral.complete());
        assert!(!clone.complete());
        assert!(!deferral.complete());
        assert_eq!(lifecycle.completions(), 1);
    }
}
