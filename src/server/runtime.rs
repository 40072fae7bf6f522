//! Accept loop and session task spawning.

use std::sync::Arc;

use futures::FutureExt;
use log::{error, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    time::{sleep, Duration},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{backend::Backend, session::run_session};

/// Configuration for exponential back-off timing in the accept loop.
///
/// Controls retry behaviour when `accept()` calls fail on the listener.
/// The back-off starts at `initial_delay` and doubles on each failure,
/// capped at `max_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay used for the first retry after an `accept()` failure.
    pub initial_delay: Duration,
    /// Maximum back-off delay once retries have increased exponentially.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp delays to sane bounds and ensure `initial_delay <= max_delay`.
    #[must_use]
    pub fn normalised(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }
}

/// Accept incoming connections and spawn a session task for each.
///
/// Accept failures trigger exponential back-off; the loop terminates
/// when `shutdown` is cancelled. Spawned sessions are tracked by
/// `tracker` for graceful shutdown.
pub(super) async fn accept_loop<F, B>(
    listener: Arc<TcpListener>,
    factory: F,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    backoff: BackoffConfig,
) where
    F: Fn() -> B + Send + Sync + Clone + 'static,
    B: Backend,
{
    let backoff = backoff.normalised();
    let mut delay = backoff.initial_delay;
    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break,

            res = listener.accept() => match res {
                Ok((stream, _)) => {
                    spawn_session_task(stream, (factory)(), &tracker);
                    delay = backoff.initial_delay;
                }
                Err(e) => {
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    sleep(delay).await;
                    delay = (delay * 2).min(backoff.max_delay);
                }
            },
        }
    }
}

/// Spawn a task driving one session, logging and discarding any panics
/// so a misbehaving session cannot tear down the accept loop.
fn spawn_session_task<B: Backend>(stream: TcpStream, backend: B, tracker: &TaskTracker) {
    let peer_addr = stream.peer_addr().ok();
    tracker.spawn(async move {
        info!("session connected: peer_addr={peer_addr:?}");
        let fut = std::panic::AssertUnwindSafe(run_session(stream, backend)).catch_unwind();
        match fut.await {
            Ok(Ok(())) => info!("session closed: peer_addr={peer_addr:?}"),
            Ok(Err(e)) => error!("session failed: error={e}, peer_addr={peer_addr:?}"),
            Err(panic) => {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<non-string panic>");
                error!("session task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::time::timeout;

    use super::*;
    use crate::backend::ReferenceBackend;

    #[rstest]
    #[tokio::test]
    async fn accept_loop_stops_on_shutdown_signal() {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        let listener = Arc::new(
            TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind test listener"),
        );

        tracker.spawn(accept_loop(
            listener,
            ReferenceBackend::new,
            token.clone(),
            tracker.clone(),
            BackoffConfig::default(),
        ));

        token.cancel();
        tracker.close();

        let result = timeout(Duration::from_millis(100), tracker.wait()).await;
        assert!(result.is_ok());
    }

    #[rstest]
    #[case(Duration::from_millis(5), Duration::from_millis(1), Duration::from_millis(1), Duration::from_millis(5))]
    #[case(Duration::ZERO, Duration::ZERO, Duration::from_millis(1), Duration::from_millis(1))]
    fn normalised_orders_and_clamps_delays(
        #[case] initial: Duration,
        #[case] max: Duration,
        #[case] expected_initial: Duration,
        #[case] expected_max: Duration,
    ) {
        let cfg = BackoffConfig {
            initial_delay: initial,
            max_delay: max,
        }
        .normalised();
        assert_eq!(cfg.initial_delay, expected_initial);
        assert_eq!(cfg.max_delay, expected_max);
    }
}
