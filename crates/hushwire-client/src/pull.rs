//! Background pull loop
//!
//! Periodically pulls and decrypts envelopes, with exponential backoff on
//! failure (reset on success, capped) and an external nudge for
//! socket-style push notifications. The nudge is best-effort; the periodic
//! pull is the reliability backstop. The loop is cancellable: after
//! [`PullHandle::stop`] returns, no further store access happens.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

use crate::client::{IncomingMessage, Messenger};
use crate::directory::{Directory, Relay};

/// Handle to a running pull loop
pub struct PullHandle {
    notify: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PullHandle {
    /// Trigger an immediate pull (e.g. on a relay push notification)
    ///
    /// Carries no payload guarantees; a nudge that arrives while a pull is
    /// already running schedules at most one more.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Stop the loop and wait for it to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        self.notify.notify_one();
        let _ = self.task.await;
    }
}

/// Spawn the background pull loop for a client
///
/// Decrypted messages are forwarded on `messages`; the loop stops on its
/// own if the receiver is dropped.
pub fn spawn_pull_loop<D, R>(
    messenger: Arc<Messenger<D, R>>,
    messages: mpsc::UnboundedSender<IncomingMessage>,
) -> PullHandle
where
    D: Directory + 'static,
    R: Relay + 'static,
{
    let notify = Arc::new(Notify::new());
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let loop_notify = notify.clone();

    let task = tokio::spawn(async move {
        let interval = messenger.config().pull_interval;
        let max_backoff = messenger.config().max_backoff;
        let mut backoff = interval;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = loop_notify.notified() => {}
                _ = tokio::time::sleep(backoff) => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }

            match messenger.pull_once().await {
                Ok(incoming) => {
                    backoff = interval;
                    for message in incoming {
                        if messages.send(message).is_err() {
                            tracing::debug!("message receiver dropped, stopping pull loop");
                            return;
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    backoff = (backoff * 2).min(max_backoff);
                    tracing::warn!(error = %e, next_attempt = ?backoff, "pull failed, backing off");
                }
                Err(e) => {
                    backoff = (backoff * 2).min(max_backoff);
                    tracing::error!(error = %e, "pull failed with non-retryable error");
                }
            }
        }

        tracing::debug!("pull loop stopped");
    });

    PullHandle {
        notify,
        shutdown,
        task,
    }
}
