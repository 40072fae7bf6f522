//! TCP server accepting bridge sessions.
//!
//! [`BridgeServer`] owns the listening endpoint and spawns one session
//! task per accepted connection, each with a fresh backend from the
//! provided factory. The server carries a typestate `S` indicating
//! whether it is [`Unbound`] (no listener yet) or [`Bound`]; only bound
//! servers expose `run`.

use std::{
    marker::PhantomData,
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
};

use futures::Future;
use log::warn;
use tokio::{net::TcpListener, select, signal, sync::oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::backend::Backend;

pub mod error;
mod runtime;

pub use error::ServerError;
pub use runtime::BackoffConfig;

/// Marker indicating the server has not yet bound a listener.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

/// Marker indicating the server is bound to a TCP listener.
#[derive(Debug, Clone)]
pub struct Bound {
    listener: Arc<TcpListener>,
}

/// Trait implemented by [`Unbound`] and [`Bound`] to model binding typestate.
pub trait ServerState: sealed::Sealed {}

mod sealed {
    //! Prevent external implementations of [`ServerState`].

    pub trait Sealed {}
    impl Sealed for super::Unbound {}
    impl Sealed for super::Bound {}
}

impl ServerState for Unbound {}
impl ServerState for Bound {}

/// TCP server for bridge sessions.
///
/// # Examples
///
/// ```no_run
/// use framelink::{backend::ReferenceBackend, server::BridgeServer};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), framelink::server::ServerError> {
/// let server = BridgeServer::new(ReferenceBackend::new)
///     .bind(([127, 0, 0, 1], 31050).into())?;
/// server.run().await
/// # }
/// ```
pub struct BridgeServer<F, B, S = Unbound>
where
    F: Fn() -> B + Send + Sync + Clone + 'static,
    B: Backend,
    S: ServerState,
{
    factory: F,
    /// Notified once the accept loop is running. Single use: a new sender
    /// must be provided each time the server is started.
    ready_tx: Option<oneshot::Sender<()>>,
    backoff: BackoffConfig,
    state: S,
    _backend: PhantomData<fn() -> B>,
}

impl<F, B> BridgeServer<F, B, Unbound>
where
    F: Fn() -> B + Send + Sync + Clone + 'static,
    B: Backend,
{
    /// Create an unbound server; `factory` produces one backend per
    /// accepted connection.
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            ready_tx: None,
            backoff: BackoffConfig::default(),
            state: Unbound,
            _backend: PhantomData,
        }
    }
}

impl<F, B, S> BridgeServer<F, B, S>
where
    F: Fn() -> B + Send + Sync + Clone + 'static,
    B: Backend,
    S: ServerState,
{
    /// Install a readiness signal sent once the accept loop is running.
    #[must_use]
    pub fn ready_signal(mut self, tx: oneshot::Sender<()>) -> Self {
        self.ready_tx = Some(tx);
        self
    }

    /// Override the accept-retry back-off configuration.
    #[must_use]
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff.normalised();
        self
    }

    /// Bind to a socket address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the listener cannot be created.
    pub fn bind(self, addr: SocketAddr) -> Result<BridgeServer<F, B, Bound>, ServerError> {
        let listener = StdTcpListener::bind(addr).map_err(ServerError::Bind)?;
        self.bind_existing_listener(listener)
    }

    /// Adopt an already-bound standard listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] when the listener cannot be
    /// registered with the runtime.
    pub fn bind_existing_listener(
        self,
        listener: StdTcpListener,
    ) -> Result<BridgeServer<F, B, Bound>, ServerError> {
        listener.set_nonblocking(true).map_err(ServerError::Bind)?;
        let listener = TcpListener::from_std(listener).map_err(ServerError::Bind)?;
        let BridgeServer {
            factory,
            ready_tx,
            backoff,
            ..
        } = self;
        Ok(BridgeServer {
            factory,
            ready_tx,
            backoff,
            state: Bound {
                listener: Arc::new(listener),
            },
            _backend: PhantomData,
        })
    }
}

impl<F, B> BridgeServer<F, B, Bound>
where
    F: Fn() -> B + Send + Sync + Clone + 'static,
    B: Backend,
{
    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the listener's address is unavailable.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> { self.state.listener.local_addr() }

    /// Run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run until the `shutdown` future resolves.
    ///
    /// In-flight session tasks are awaited before returning, so shutdown
    /// is graceful for connected peers.
    ///
    /// # Errors
    ///
    /// Accept failures are retried with exponential back-off and do not
    /// surface as errors.
    pub async fn run_with_shutdown<Sh>(self, shutdown: Sh) -> Result<(), ServerError>
    where
        Sh: Future<Output = ()> + Send,
    {
        let BridgeServer {
            factory,
            ready_tx,
            backoff,
            state: Bound { listener },
            ..
        } = self;
        let shutdown_token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(runtime::accept_loop(
            listener,
            factory,
            shutdown_token.clone(),
            tracker.clone(),
            backoff,
        ));

        if ready_tx.is_some_and(|tx| tx.send(()).is_err()) {
            warn!("failed to send readiness signal: receiver dropped");
        }

        select! {
            () = shutdown => shutdown_token.cancel(),
            () = tracker.wait() => {},
        }

        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}
