// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tonic adapters for both services.

use std::sync::Arc;

use riffle_proto::rpc::reaction_handler_server::{ReactionHandler, ReactionHandlerServer};
use riffle_proto::rpc::source_dispatcher_server::{SourceDispatcher, SourceDispatcherServer};
use riffle_proto::wire;
use tonic::{Request, Response, Status};
use tracing::trace;

use crate::dispatcher::DispatcherCore;
use crate::pool::WorkerPool;
use crate::reaction::ReactionHandlerCore;

/// `riffle.v1.SourceDispatcher` backed by a [`DispatcherCore`].
#[derive(Clone)]
pub struct SourceDispatcherService {
    core: Arc<DispatcherCore>,
    pool: WorkerPool,
}

impl SourceDispatcherService {
    /// Adapter sharing `pool` with the other transports.
    pub fn new(core: Arc<DispatcherCore>, pool: WorkerPool) -> Self {
        Self { core, pool }
    }

    /// Wrap in the generated tonic server.
    pub fn into_server(self) -> SourceDispatcherServer<Self> {
        SourceDispatcherServer::new(self)
    }
}

#[tonic::async_trait]
impl SourceDispatcher for SourceDispatcherService {
    async fn dispatch_single(
        &self,
        request: Request<wire::SourceChangeEvent>,
    ) -> Result<Response<wire::DispatchResponse>, Status> {
        let _permit = self.pool.acquire().await?;
        trace!(remote = ?request.remote_addr(), "DispatchSingle");
        let response = self.core.dispatch_single(request.into_inner()).await;
        Ok(Response::new(response.into()))
    }

    async fn dispatch_batch(
        &self,
        request: Request<wire::EventBatch>,
    ) -> Result<Response<wire::DispatchResponse>, Status> {
        let _permit = self.pool.acquire().await?;
        trace!(remote = ?request.remote_addr(), "DispatchBatch");
        let response = self.core.dispatch_batch(request.into_inner()).await;
        Ok(Response::new(response.into()))
    }
}

/// `riffle.v1.ReactionHandler` backed by a [`ReactionHandlerCore`].
#[derive(Clone)]
pub struct ReactionHandlerService {
    core: Arc<ReactionHandlerCore>,
    pool: WorkerPool,
}

impl ReactionHandlerService {
    /// Adapter sharing `pool` with the other transports.
    pub fn new(core: Arc<ReactionHandlerCore>, pool: WorkerPool) -> Self {
        Self { core, pool }
    }

    /// Wrap in the generated tonic server.
    pub fn into_server(self) -> ReactionHandlerServer<Self> {
        ReactionHandlerServer::new(self)
    }
}

#[tonic::async_trait]
impl ReactionHandler for ReactionHandlerService {
    async fn handle_invocation(
        &self,
        request: Request<wire::ReactionInvocation>,
    ) -> Result<Response<wire::InvocationResponse>, Status> {
        let _permit = self.pool.acquire().await?;
        let header = self
            .core
            .config()
            .correlation_metadata_key
            .as_deref()
            .and_then(|key| {
                let value = request.metadata().get(key)?.to_str().ok()?;
                Some((key.to_string(), value.to_string()))
            });
        let mut invocation = request.into_inner();
        // Transport headers fill in the correlation key when the message lacks it.
        if let Some((key, value)) = header {
            invocation.metadata.entry(key).or_insert(value);
        }
        let response = self.core.handle_invocation(invocation).await;
        Ok(Response::new(response.into()))
    }
}
