//! Shutdown signalling shared by the orchestrator, pipelines and scheduler.
//!
//! A `watch::Sender<bool>` flips to `true` once; receivers observe it at
//! stage boundaries or wait on it in `select!`.

use tokio::sync::watch;

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Receiver that never fires.
pub fn never() -> ShutdownReceiver {
    let (_tx, rx) = watch::channel(false);
    rx
}

pub fn is_triggered(rx: &ShutdownReceiver) -> bool {
    *rx.borrow()
}

/// Resolve once shutdown is signalled. Pends forever if every sender is gone
/// without signalling.
pub async fn wait_for(rx: &mut ShutdownReceiver) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
