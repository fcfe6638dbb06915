// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Source-side client for `riffle.v1.SourceDispatcher`.

use std::collections::BTreeMap;

use riffle_proto::rpc::source_dispatcher_client::SourceDispatcherClient as GrpcClient;
use riffle_proto::{wire, DispatchResponse, EventBatch, SourceChangeEvent, DEFAULT_DISPATCHER_PORT};
use tonic::transport::Channel;
use tracing::debug;

use crate::{ClientError, ConnectionSettings};

/// Dispatcher client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Endpoint, timeouts and retries.
    pub connection: ConnectionSettings,
    /// Send [`SourceDispatcherClient::dispatch`] input as one batch
    /// instead of one `DispatchSingle` per event.
    pub batch_events: bool,
    /// Source stream id stamped on every batch.
    pub source_id: String,
    /// Metadata stamped on every batch.
    pub metadata: BTreeMap<String, String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::new("localhost", DEFAULT_DISPATCHER_PORT),
            batch_events: true,
            source_id: "riffle".into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Sends source change events to a dispatcher.
///
/// Cheap to clone; clones share one HTTP/2 channel.
#[derive(Debug, Clone)]
pub struct SourceDispatcherClient {
    settings: DispatcherSettings,
    inner: GrpcClient<Channel>,
}

impl SourceDispatcherClient {
    /// Client that connects on its first call.
    pub fn new(settings: DispatcherSettings) -> Result<Self, ClientError> {
        let channel = settings.connection.lazy_channel()?;
        Ok(Self {
            inner: GrpcClient::new(channel),
            settings,
        })
    }

    /// Client connected before returning.
    pub async fn connect(settings: DispatcherSettings) -> Result<Self, ClientError> {
        let channel = settings.connection.connected_channel().await?;
        Ok(Self {
            inner: GrpcClient::new(channel),
            settings,
        })
    }

    /// Active settings.
    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// `DispatchSingle`.
    pub async fn dispatch_single(
        &self,
        event: SourceChangeEvent,
    ) -> Result<DispatchResponse, ClientError> {
        let event = wire::SourceChangeEvent::from(event);
        let response = self
            .settings
            .connection
            .retry
            .run("DispatchSingle", || {
                let mut client = self.inner.clone();
                let event = event.clone();
                async move {
                    let response = client.dispatch_single(event).await?;
                    Ok::<_, ClientError>(response.into_inner())
                }
            })
            .await?;
        Ok(response.into())
    }

    /// `DispatchBatch`.
    pub async fn dispatch_batch(&self, batch: EventBatch) -> Result<DispatchResponse, ClientError> {
        let batch = wire::EventBatch::from(batch);
        let response = self
            .settings
            .connection
            .retry
            .run("DispatchBatch", || {
                let mut client = self.inner.clone();
                let batch = batch.clone();
                async move {
                    let response = client.dispatch_batch(batch).await?;
                    Ok::<_, ClientError>(response.into_inner())
                }
            })
            .await?;
        Ok(response.into())
    }

    /// Send `events` the configured way: one batch on `source_id`, or one
    /// `DispatchSingle` per event with the responses folded together.
    pub async fn dispatch(
        &self,
        events: Vec<SourceChangeEvent>,
    ) -> Result<DispatchResponse, ClientError> {
        if events.is_empty() {
            return Ok(DispatchResponse::ok(0, "no events"));
        }
        if self.settings.batch_events {
            let batch = EventBatch {
                source_id: self.settings.source_id.clone(),
                metadata: self.settings.metadata.clone(),
                events,
            };
            debug!(source_id = %batch.source_id, events = batch.events.len(), "dispatching batch");
            return self.dispatch_batch(batch).await;
        }

        let total = events.len();
        let mut processed = 0;
        let mut first_failure: Option<String> = None;
        for event in events {
            let response = self.dispatch_single(event).await?;
            processed += response.events_processed;
            if !response.success && first_failure.is_none() {
                first_failure = Some(response.message);
            }
        }
        Ok(match first_failure {
            None => DispatchResponse::ok(processed, format!("dispatched {total} events singly")),
            Some(message) => DispatchResponse::failed(
                processed,
                format!("{processed} of {total} events accepted (first failure: {message})"),
            ),
        })
    }
}
