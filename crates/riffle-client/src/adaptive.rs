// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fire-and-forget event publishing with throughput-adaptive batching.
//!
//! Events pushed into an [`AdaptiveSourceDispatcher`] are grouped by an
//! [`AdaptiveBatcher`] on a background task and sent as `DispatchBatch`
//! calls on the client's `source_id`. Batches go out one at a time, so the
//! server sees events in push order.

use riffle_proto::{EventBatch, SourceChangeEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::batcher::{AdaptiveBatchConfig, AdaptiveBatcher};
use crate::{ClientError, SourceDispatcherClient};

/// Totals reported when the dispatcher is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptiveReport {
    /// Batches the server answered.
    pub batches_sent: u64,
    /// Batches that failed at the transport after retries.
    pub batches_failed: u64,
    /// Events the server reported as processed.
    pub events_processed: u64,
    /// Events in answered batches the server did not process.
    pub events_rejected: u64,
}

/// Background batching publisher over a [`SourceDispatcherClient`].
#[derive(Debug)]
pub struct AdaptiveSourceDispatcher {
    events: mpsc::Sender<SourceChangeEvent>,
    task: JoinHandle<AdaptiveReport>,
}

impl AdaptiveSourceDispatcher {
    /// Spawn the batching task. `capacity` bounds events buffered ahead of
    /// the batcher; [`AdaptiveSourceDispatcher::send`] waits when it is full.
    pub fn spawn(
        client: SourceDispatcherClient,
        config: AdaptiveBatchConfig,
        capacity: usize,
    ) -> Self {
        let (events, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(client, AdaptiveBatcher::new(rx, config)));
        Self { events, task }
    }

    /// Queue one event.
    pub async fn send(&self, event: SourceChangeEvent) -> Result<(), ClientError> {
        self.events.send(event).await.map_err(|_| ClientError::Closed)
    }

    /// Stop accepting events, flush what is buffered and report totals.
    pub async fn close(self) -> Result<AdaptiveReport, ClientError> {
        drop(self.events);
        self.task.await.map_err(|err| {
            error!(%err, "adaptive dispatch task ended abnormally");
            ClientError::Closed
        })
    }
}

async fn run(
    client: SourceDispatcherClient,
    mut batcher: AdaptiveBatcher<SourceChangeEvent>,
) -> AdaptiveReport {
    let mut report = AdaptiveReport::default();
    let settings = client.settings().clone();
    info!(source_id = %settings.source_id, "adaptive dispatcher started");

    while let Some(events) = batcher.next_batch().await {
        let size = events.len() as u64;
        let batch = EventBatch {
            source_id: settings.source_id.clone(),
            metadata: settings.metadata.clone(),
            events,
        };
        match client.dispatch_batch(batch).await {
            Ok(response) => {
                report.batches_sent += 1;
                report.events_processed += response.events_processed;
                if response.success {
                    debug!(size, target = batcher.batch_size(), "batch dispatched");
                } else {
                    report.events_rejected += size.saturating_sub(response.events_processed);
                    warn!(size, message = %response.message, "batch partially rejected");
                }
            }
            Err(err) => {
                report.batches_failed += 1;
                error!(size, %err, "batch dropped after retries");
            }
        }
    }

    info!(?report, "adaptive dispatcher stopped");
    report
}
