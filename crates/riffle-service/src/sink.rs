// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Downstream pipeline ports.
//!
//! The dispatcher hands each accepted event to an [`EventSink`]; the reaction
//! handler hands each accepted invocation to a [`ReactionSink`]. The host
//! binary wires in the logging sinks; tests use the channel sinks.

use std::time::Duration;

use async_trait::async_trait;
use riffle_proto::{ReactionInvocation, SourceChangeEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Failure reported by a pipeline sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Downstream receiver is gone.
    #[error("pipeline closed")]
    Closed,
    /// Sink did not finish within the request timeout.
    #[error("pipeline timed out after {0:?}")]
    Timeout(Duration),
    /// Downstream refused the item.
    #[error("pipeline rejected: {0}")]
    Rejected(String),
    /// Anything else.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Receives validated source change events in per-source order.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Forward one event. Called at most once per accepted event.
    async fn forward(&self, source_id: &str, event: SourceChangeEvent) -> Result<(), SinkError>;
}

/// Receives validated, de-duplicated reaction invocations.
#[async_trait]
pub trait ReactionSink: Send + Sync {
    /// Apply one invocation's payload downstream.
    async fn apply(&self, invocation: &ReactionInvocation) -> Result<(), SinkError>;
}

/// Writes one structured log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn forward(&self, source_id: &str, event: SourceChangeEvent) -> Result<(), SinkError> {
        match &event.relationship {
            Some(rel) => info!(
                source_id,
                seq = event.sequence_number,
                op = %event.op,
                id = %event.id,
                labels = ?event.labels,
                start_id = %rel.start_id,
                end_id = %rel.end_id,
                "relationship change"
            ),
            None => info!(
                source_id,
                seq = event.sequence_number,
                op = %event.op,
                id = %event.id,
                labels = ?event.labels,
                "node change"
            ),
        }
        debug!(source_id, id = %event.id, properties = ?event.properties, "event properties");
        Ok(())
    }
}

/// Writes one structured log line per invocation plus a debug line per record.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReactionSink;

#[async_trait]
impl ReactionSink for LoggingReactionSink {
    async fn apply(&self, invocation: &ReactionInvocation) -> Result<(), SinkError> {
        let payload = &invocation.payload;
        info!(
            invocation_id = %invocation.id,
            query_id = %invocation.query_id,
            sequence = payload.sequence,
            added = payload.added.len(),
            updated = payload.updated.len(),
            deleted = payload.deleted.len(),
            "reaction invocation"
        );
        let sets = [
            ("added", &payload.added),
            ("updated", &payload.updated),
            ("deleted", &payload.deleted),
        ];
        for (set, records) in sets {
            for record in records {
                debug!(invocation_id = %invocation.id, set, ?record, "result record");
            }
        }
        Ok(())
    }
}

/// An event as seen by a [`ChannelSink`] receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedEvent {
    /// Stream the event was dispatched on.
    pub source_id: String,
    /// The event itself.
    pub event: SourceChangeEvent,
}

/// Sends every forwarded event into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ForwardedEvent>,
}

impl ChannelSink {
    /// Sink plus the receiving end, with room for `capacity` queued events.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ForwardedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn forward(&self, source_id: &str, event: SourceChangeEvent) -> Result<(), SinkError> {
        self.tx
            .send(ForwardedEvent {
                source_id: source_id.to_string(),
                event,
            })
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Sends every applied invocation into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelReactionSink {
    tx: mpsc::Sender<ReactionInvocation>,
}

impl ChannelReactionSink {
    /// Sink plus the receiving end.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReactionInvocation>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReactionSink for ChannelReactionSink {
    async fn apply(&self, invocation: &ReactionInvocation) -> Result<(), SinkError> {
        self.tx
            .send(invocation.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}
