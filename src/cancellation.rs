//! Per-request cancellation signal.
//!
//! A [`CancellationSource`] owns a `watch` channel whose value flips from
//! `false` to `true` exactly once. Tokens handed to providers observe the flip
//! either by polling [`CancellationToken::is_cancelled`] or by awaiting
//! [`CancellationToken::cancelled`].

use tokio::sync::watch;

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

/// Observer side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Returns true only for the call that flipped it.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A token that never fires.
    pub fn none() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested.
    ///
    /// Pends forever when the source is dropped without firing.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
