// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wires cores, pool and transports together and serves them.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use crate::dispatcher::DispatcherCore;
use crate::grpc::{ReactionHandlerService, SourceDispatcherService};
use crate::pool::WorkerPool;
use crate::prefs::HostPrefs;
use crate::reaction::ReactionHandlerCore;
use crate::sink::{EventSink, ReactionSink};

/// Both service cores plus the worker pool they share.
///
/// Clones share state; any clone may call [`ServiceHost::shutdown`].
#[derive(Clone)]
pub struct ServiceHost {
    dispatcher: Arc<DispatcherCore>,
    reactions: Arc<ReactionHandlerCore>,
    pool: WorkerPool,
    shutdown: Arc<watch::Sender<bool>>,
}

async fn raised(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|raised| *raised).await.is_err() {
        // Sender gone without raising: never fires.
        std::future::pending::<()>().await;
    }
}

impl ServiceHost {
    /// Build cores from `prefs`, forwarding to the given sinks.
    pub fn new(
        prefs: &HostPrefs,
        events: Arc<dyn EventSink>,
        reactions: Arc<dyn ReactionSink>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            dispatcher: Arc::new(DispatcherCore::new(events, prefs.dispatcher_config())),
            reactions: Arc::new(ReactionHandlerCore::new(reactions, prefs.reaction_config())),
            pool: WorkerPool::new(prefs.max_workers, prefs.request_timeout()),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Source dispatcher core.
    pub fn dispatcher(&self) -> &Arc<DispatcherCore> {
        &self.dispatcher
    }

    /// Reaction handler core.
    pub fn reactions(&self) -> &Arc<ReactionHandlerCore> {
        &self.reactions
    }

    /// Shared worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Stop every server started by this host and refuse new work.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        self.pool.close();
    }

    /// Resolves on [`ServiceHost::shutdown`] or when the reaction handler's
    /// invocation limit is reached.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let manual = self.shutdown.subscribe();
        let limit = self.reactions.stop_signal();
        async move {
            tokio::select! {
                () = raised(manual) => {}
                () = raised(limit) => info!("invocation limit reached; stopping"),
            }
        }
    }

    /// HTTP+JSON router.
    pub fn router(&self) -> axum::Router {
        crate::http::router(
            self.dispatcher.clone(),
            self.reactions.clone(),
            self.pool.clone(),
        )
    }

    /// Serve `SourceDispatcher` on `listener` until [`ServiceHost::stopped`].
    pub async fn serve_dispatcher(&self, listener: TcpListener) -> Result<(), tonic::transport::Error> {
        let service = SourceDispatcherService::new(self.dispatcher.clone(), self.pool.clone());
        Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), self.stopped())
            .await
    }

    /// Serve `ReactionHandler` on `listener` until [`ServiceHost::stopped`].
    pub async fn serve_reactions(&self, listener: TcpListener) -> Result<(), tonic::transport::Error> {
        let service = ReactionHandlerService::new(self.reactions.clone(), self.pool.clone());
        Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), self.stopped())
            .await
    }

    /// Serve the HTTP router on `listener` until [`ServiceHost::stopped`].
    pub async fn serve_http(&self, listener: TcpListener) -> std::io::Result<()> {
        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.stopped())
            .await
    }
}
