use std::sync::Arc;
use tokio::sync::watch;

/// Handle used to cancel a streaming service (shell execute, logcat,
/// framebuffer refresh). Cancellation is level-triggered: once set it
/// stays set, and every pump observes it at its next iteration
/// boundary by closing the socket it owns.
#[derive(Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
}

/// Receiving side of a [`CancelToken`], held by the streaming loop.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    // Present only for `never()`, which owns both channel halves.
    _keep: Option<Arc<watch::Sender<bool>>>,
}

/// Creates a connected token/signal pair.
pub fn cancel_pair() -> (CancelToken, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelToken { tx }, CancelSignal { rx, _keep: None })
}

impl CancelToken {
    /// Requests cancellation. Pumps already blocked on a socket read
    /// are woken through their `select!` arm and drop the socket.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl CancelSignal {
    /// A signal that never fires, for callers without a timeout.
    pub fn never() -> CancelSignal {
        let (tx, rx) = watch::channel(false);
        CancelSignal {
            rx,
            _keep: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when cancellation is requested. Never resolves for
    /// [`CancelSignal::never`].
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
        // Sender dropped without cancelling: park forever, the pump
        // finishes on stream end instead.
        std::future::pending::<()>().await;
    }
}
