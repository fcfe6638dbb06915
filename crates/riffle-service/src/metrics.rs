// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Informational counters. Never consulted by protocol logic.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

fn bump(counter: &AtomicU64, by: u64) -> u64 {
    counter.fetch_add(by, Ordering::Relaxed) + by
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Source dispatcher counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    batches_received: AtomicU64,
    events_received: AtomicU64,
    events_processed: AtomicU64,
    events_rejected: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchMetricsSnapshot {
    /// `DispatchBatch` calls (and HTTP array bodies).
    pub batches_received: u64,
    /// Events seen, valid or not.
    pub events_received: u64,
    /// Events forwarded to the pipeline.
    pub events_processed: u64,
    /// Events rejected by validation or the pipeline.
    pub events_rejected: u64,
}

impl DispatchMetrics {
    pub(crate) fn batch(&self, events: usize) {
        bump(&self.batches_received, 1);
        self.events(events);
    }

    pub(crate) fn events(&self, events: usize) {
        bump(&self.events_received, events as u64);
    }

    pub(crate) fn processed(&self) {
        bump(&self.events_processed, 1);
    }

    pub(crate) fn rejected(&self, events: usize) {
        bump(&self.events_rejected, events as u64);
    }

    /// Current values.
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            batches_received: read(&self.batches_received),
            events_received: read(&self.events_received),
            events_processed: read(&self.events_processed),
            events_rejected: read(&self.events_rejected),
        }
    }
}

/// Reaction handler counters.
#[derive(Debug, Default)]
pub struct ReactionMetrics {
    invocations_received: AtomicU64,
    invocations_applied: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    records_added: AtomicU64,
    records_updated: AtomicU64,
    records_deleted: AtomicU64,
}

/// Point-in-time copy of [`ReactionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReactionMetricsSnapshot {
    /// Invocations seen.
    pub invocations_received: u64,
    /// Invocations applied downstream.
    pub invocations_applied: u64,
    /// Redeliveries answered from the de-duplication window.
    pub duplicates: u64,
    /// Invocations that failed validation or the pipeline.
    pub rejected: u64,
    /// Records applied from `added`.
    pub records_added: u64,
    /// Records applied from `updated`.
    pub records_updated: u64,
    /// Records applied from `deleted`.
    pub records_deleted: u64,
}

impl ReactionMetrics {
    pub(crate) fn received(&self) {
        bump(&self.invocations_received, 1);
    }

    pub(crate) fn duplicate(&self) {
        bump(&self.duplicates, 1);
    }

    pub(crate) fn rejected(&self) {
        bump(&self.rejected, 1);
    }

    /// Count an applied invocation; returns the running total.
    pub(crate) fn applied(&self, added: usize, updated: usize, deleted: usize) -> u64 {
        bump(&self.records_added, added as u64);
        bump(&self.records_updated, updated as u64);
        bump(&self.records_deleted, deleted as u64);
        bump(&self.invocations_applied, 1)
    }

    /// Current values.
    pub fn snapshot(&self) -> ReactionMetricsSnapshot {
        ReactionMetricsSnapshot {
            invocations_received: read(&self.invocations_received),
            invocations_applied: read(&self.invocations_applied),
            duplicates: read(&self.duplicates),
            rejected: read(&self.rejected),
            records_added: read(&self.records_added),
            records_updated: read(&self.records_updated),
            records_deleted: read(&self.records_deleted),
        }
    }
}
