// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Source dispatcher core: validation, per-source ordering, batch accounting.
//!
//! Each source stream has its own lock, held for the whole of a call, so two
//! concurrent calls on one `source_id` never interleave their events. Streams
//! are independent of each other. The last accepted sequence number is
//! updated after every forwarded event, so a call dropped halfway leaves the
//! stream consistent with what actually reached the pipeline.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use riffle_proto::{wire, DispatchResponse, SourceChangeEvent, ValidationError};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::metrics::DispatchMetrics;
use crate::prefs::BatchFailurePolicy;
use crate::sink::{EventSink, SinkError};

/// Dispatcher settings derived from host prefs.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Stream used for unbatched events.
    pub default_source_id: String,
    /// Batch behaviour after a rejection.
    pub failure_policy: BatchFailurePolicy,
    /// Bound on each pipeline call.
    pub request_timeout: Duration,
    /// Distinct source streams tracked at once. Stream state lives as long
    /// as the dispatcher; a batch for a new source past this limit is
    /// rejected whole.
    pub max_source_streams: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_source_id: String::new(),
            failure_policy: BatchFailurePolicy::Continue,
            request_timeout: Duration::from_secs(30),
            max_source_streams: 10_000,
        }
    }
}

#[derive(Debug, Error)]
enum Rejection {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Pipeline(#[from] SinkError),
}

#[derive(Debug, Default)]
struct SourceStream {
    last_seq: Option<u64>,
}

/// Validates events and forwards them, in order, to an [`EventSink`].
pub struct DispatcherCore {
    sink: Arc<dyn EventSink>,
    config: DispatcherConfig,
    streams: Mutex<HashMap<String, Arc<Mutex<SourceStream>>>>,
    metrics: DispatchMetrics,
}

impl DispatcherCore {
    /// Core forwarding to `sink`.
    pub fn new(sink: Arc<dyn EventSink>, config: DispatcherConfig) -> Self {
        Self {
            sink,
            config,
            streams: Mutex::new(HashMap::new()),
            metrics: DispatchMetrics::default(),
        }
    }

    /// Counters for this dispatcher.
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Active settings.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// `DispatchSingle`: one event on the default source stream.
    pub async fn dispatch_single(&self, event: wire::SourceChangeEvent) -> DispatchResponse {
        self.metrics.events(1);
        let source_id = self.config.default_source_id.clone();
        self.run(&source_id, vec![event]).await
    }

    /// `DispatchBatch`: every event of `batch`, in order, on `batch.source_id`.
    pub async fn dispatch_batch(&self, batch: wire::EventBatch) -> DispatchResponse {
        self.metrics.batch(batch.events.len());
        if batch.events.is_empty() {
            debug!(source_id = %batch.source_id, "empty batch");
            return DispatchResponse::ok(0, "empty batch; nothing to dispatch");
        }
        if batch.source_id.is_empty() {
            let total = batch.events.len();
            self.metrics.rejected(total);
            warn!(events = total, "batch rejected: empty source_id");
            return DispatchResponse::failed(0, ValidationError::EmptySourceId.to_string());
        }
        debug!(
            source_id = %batch.source_id,
            events = batch.events.len(),
            metadata = ?batch.metadata,
            "dispatching batch"
        );
        self.run(&batch.source_id, batch.events).await
    }

    /// Events on the default stream delivered as a group (HTTP array body).
    pub async fn dispatch_default(&self, events: Vec<wire::SourceChangeEvent>) -> DispatchResponse {
        self.metrics.batch(events.len());
        if events.is_empty() {
            return DispatchResponse::ok(0, "empty batch; nothing to dispatch");
        }
        let source_id = self.config.default_source_id.clone();
        self.run(&source_id, events).await
    }

    /// Source streams currently tracked.
    pub async fn source_count(&self) -> usize {
        self.streams.lock().await.len()
    }

    async fn stream(&self, source_id: &str) -> Option<Arc<Mutex<SourceStream>>> {
        let mut streams = self.streams.lock().await;
        if let Some(stream) = streams.get(source_id) {
            return Some(stream.clone());
        }
        if streams.len() >= self.config.max_source_streams {
            return None;
        }
        Some(streams.entry(source_id.to_string()).or_default().clone())
    }

    async fn run(&self, source_id: &str, events: Vec<wire::SourceChangeEvent>) -> DispatchResponse {
        let total = events.len();
        let Some(stream) = self.stream(source_id).await else {
            let err = ValidationError::SourceLimit {
                source_id: source_id.to_string(),
                limit: self.config.max_source_streams,
            };
            self.metrics.rejected(total);
            warn!(source_id, events = total, %err, "batch rejected");
            return DispatchResponse::failed(0, err.to_string());
        };
        let mut stream = stream.lock().await;

        let mut processed = 0usize;
        let mut rejected = 0usize;
        let mut first_rejection: Option<String> = None;
        let mut aborted = false;

        for (index, event) in events.into_iter().enumerate() {
            let seq = event.sequence_number;
            match self.forward_one(source_id, &mut stream, event).await {
                Ok(()) => {
                    processed += 1;
                    self.metrics.processed();
                }
                Err(reason) => {
                    rejected += 1;
                    self.metrics.rejected(1);
                    warn!(source_id, seq, index, %reason, "event rejected");
                    first_rejection.get_or_insert_with(|| reason.to_string());
                    if self.config.failure_policy == BatchFailurePolicy::Abort {
                        aborted = index + 1 < total;
                        break;
                    }
                }
            }
        }

        let count = processed as u64;
        let Some(reason) = first_rejection else {
            return DispatchResponse::ok(count, format!("processed {processed} of {total} events"));
        };
        let mut message = format!("processed {processed} of {total} events; {rejected} rejected");
        if aborted {
            let _ = write!(message, ", {} not attempted", total - processed - rejected);
        }
        let _ = write!(message, " (first: {reason})");
        DispatchResponse::failed(count, message)
    }

    async fn forward_one(
        &self,
        source_id: &str,
        stream: &mut SourceStream,
        event: wire::SourceChangeEvent,
    ) -> Result<(), Rejection> {
        let event = SourceChangeEvent::try_from(event)?;
        let seq = event.sequence_number;
        if let Some(last) = stream.last_seq {
            if seq < last {
                return Err(ValidationError::SequenceRegression {
                    source_id: source_id.to_string(),
                    last,
                    got: seq,
                }
                .into());
            }
        }
        let timeout = self.config.request_timeout;
        tokio::time::timeout(timeout, self.sink.forward(source_id, event))
            .await
            .map_err(|_| SinkError::Timeout(timeout))??;
        stream.last_seq = Some(seq);
        Ok(())
    }
}
