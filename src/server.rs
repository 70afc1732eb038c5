//! The accept loop.
//!
//! A [`Server`] owns the resolver and the forwarder factory, and serves a
//! bound [`Listener`] until [`Server::close`] is called. Each connection is
//! served by its own task; closing the server aborts all of them.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixListener,
    sync::broadcast,
    task::JoinSet,
};

use crate::{
    config::Config,
    error::ServerError,
    internal,
    listener::Listener,
    lmtp::{connection::Connection, Lmtp, LmtpConfig},
    session::Session,
    status::{EnhancedCode, Reply, Status},
    traits::{ForwarderFactory, Resolver},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

pub struct Server {
    resolver: Arc<dyn Resolver>,
    factory: Arc<dyn ForwarderFactory>,
    config: Arc<LmtpConfig>,
    status_wait: Duration,
    shutdown: broadcast::Sender<Signal>,
    closed: AtomicBool,
    next_session: AtomicU64,
}

impl Server {
    #[must_use]
    pub fn new(
        config: &Config,
        resolver: Arc<dyn Resolver>,
        factory: Arc<dyn ForwarderFactory>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(16);

        Self {
            resolver,
            factory,
            config: Arc::new(LmtpConfig::from(config)),
            status_wait: config.timeouts.status_wait(),
            shutdown,
            closed: AtomicBool::new(false),
            next_session: AtomicU64::new(1),
        }
    }

    /// Accept connections on `listener` until [`Server::close`] is called.
    ///
    /// # Errors
    ///
    /// [`ServerError::UnsupportedTransport`] for anything but a Unix socket,
    /// [`ServerError::Closed`] if the server was already closed, and
    /// [`ServerError::Accept`] if accepting a connection fails.
    pub async fn serve(&self, listener: Listener) -> Result<(), ServerError> {
        let listener = match listener {
            Listener::Unix(listener) => listener,
            other => return Err(ServerError::UnsupportedTransport(other.transport().to_string())),
        };

        // Subscribe before checking the flag so a concurrent close is never missed.
        let mut shutdown = self.shutdown.subscribe();
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServerError::Closed);
        }

        internal!(level = INFO, "Serving LMTP on {:?}", listener.local_addr().ok());

        let mut sessions = JoinSet::new();
        let result = self.accept_loop(&listener, &mut shutdown, &mut sessions).await;

        sessions.abort_all();
        while sessions.join_next().await.is_some() {}

        internal!(level = INFO, "Server stopped");
        result
    }

    async fn accept_loop(
        &self,
        listener: &UnixListener,
        shutdown: &mut broadcast::Receiver<Signal>,
        sessions: &mut JoinSet<()>,
    ) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    // A lagged receiver means signals were sent, and the only
                    // signal there is asks us to stop.
                    if sig.is_ok() || matches!(sig, Err(broadcast::error::RecvError::Lagged(_))) {
                        internal!(level = INFO, "Received shutdown signal, terminating sessions");
                        return Ok(());
                    }
                }

                connection = listener.accept() => {
                    let (stream, _) = connection.map_err(ServerError::Accept)?;
                    let id = self.next_session.fetch_add(1, Ordering::Relaxed);
                    internal!(level = DEBUG, session = id, "Accepted connection");

                    sessions.spawn(self.session_task(id, stream));
                }

                Some(finished) = sessions.join_next() => {
                    if let Err(err) = finished {
                        if err.is_panic() {
                            internal!(level = ERROR, "Session task panicked: {err}");
                        }
                    }
                }
            }
        }
    }

    fn session_task<Stream>(
        &self,
        id: u64,
        stream: Stream,
    ) -> impl std::future::Future<Output = ()> + Send + 'static
    where
        Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let resolver = Arc::clone(&self.resolver);
        let factory = Arc::clone(&self.factory);
        let config = Arc::clone(&self.config);
        let status_wait = self.status_wait;
        let signal = self.shutdown.subscribe();

        async move {
            let forwarder = match factory.connect().await {
                Ok(forwarder) => forwarder,
                Err(err) => {
                    internal!(level = WARN, session = id, "Unable to reach downstream: {err}");
                    reject(stream).await;
                    return;
                }
            };

            let session = Session::new(id, resolver, forwarder, status_wait);
            if let Err(err) = Lmtp::new(stream, session, config).run(signal).await {
                internal!(level = DEBUG, session = id, "Session ended with error: {err}");
            }
        }
    }

    /// Stop serving. All active sessions are aborted. Calling this more than
    /// once has no further effect.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            internal!(level = INFO, "Closing server");
        }

        // No receivers just means nothing is being served.
        let _ = self.shutdown.send(Signal::Shutdown);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Turn a connection away when no forwarder could be created for it.
async fn reject<Stream>(stream: Stream)
where
    Stream: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut connection = Connection::new(stream);
    let reply = Reply::new(
        Status::Unavailable,
        EnhancedCode::TEMPORARY_SYSTEM,
        "Downstream unavailable, try again later",
    );

    if let Err(err) = connection.send(&reply).await {
        internal!(level = DEBUG, "Failed to send rejection: {err}");
    }
}
