//! Inactivity watchdog for a session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Handle used to report activity to a [`Watchdog`].
#[derive(Clone, Debug, Default)]
pub struct Activity(Arc<Notify>);

impl Activity {
    /// Pushes the watchdog deadline back by a full timeout.
    pub fn touch(&self) {
        self.0.notify_one();
    }
}

/// Cancels a token after `timeout` without any [`Activity::touch`].
pub struct Watchdog {
    activity: Activity,
    timed_out: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Watchdog {
    /// Starts the watchdog on the current runtime.
    pub fn spawn(timeout: Duration, cancel: CancellationToken) -> Self {
        let activity = Activity::default();
        let timed_out = Arc::new(AtomicBool::new(false));

        let handle = {
            let notify = Arc::clone(&activity.0);
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                let deadline = tokio::time::sleep(timeout);
                tokio::pin!(deadline);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = notify.notified() => {
                            trace!("session activity");
                            deadline.as_mut().reset(tokio::time::Instant::now() + timeout);
                        }
                        () = &mut deadline => {
                            warn!(timeout_secs = timeout.as_secs(), "session idle, cancelling");
                            timed_out.store(true, Ordering::SeqCst);
                            cancel.cancel();
                            break;
                        }
                    }
                }
            })
        };

        Self {
            activity,
            timed_out,
            handle,
        }
    }

    pub fn activity(&self) -> Activity {
        self.activity.clone()
    }

    /// Whether the deadline fired (as opposed to an explicit cancel).
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
