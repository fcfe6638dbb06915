// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reaction handler core.
//!
//! Redelivery of an invocation id is answered from a bounded window of the
//! most recently completed ids (FIFO eviction at `dedup_capacity`). An id is
//! marked in flight before its payload is applied. A concurrent redelivery
//! never applies it twice: it waits (up to `request_timeout`) for the first
//! delivery and reports that outcome, so success is never claimed for a
//! payload that was not applied. A failed or cancelled apply clears the mark
//! so the sender may retry.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use riffle_proto::{wire, InvocationResponse, ReactionInvocation, ValidationError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics::ReactionMetrics;
use crate::sink::{ReactionSink, SinkError};

/// Reaction handler settings derived from host prefs.
#[derive(Debug, Clone)]
pub struct ReactionConfig {
    /// Served queries; empty accepts any non-empty id.
    pub query_ids: BTreeSet<String>,
    /// Field holding a record's identity for the overlap check.
    pub record_id_field: String,
    /// Completed ids remembered for de-duplication.
    pub dedup_capacity: usize,
    /// Metadata key logged on every invocation.
    pub correlation_metadata_key: Option<String>,
    /// Raise the stop signal after this many applied invocations.
    pub stop_after_invocations: Option<u64>,
    /// Bound on each pipeline call.
    pub request_timeout: Duration,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            query_ids: BTreeSet::new(),
            record_id_field: "id".into(),
            dedup_capacity: 10_000,
            correlation_metadata_key: Some("x-query-sequence".into()),
            stop_after_invocations: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome slot of an in-flight apply; `None` until it finishes.
type Outcome = watch::Receiver<Option<InvocationResponse>>;

#[derive(Debug, Clone)]
enum Seen {
    InFlight(Outcome),
    Done(InvocationResponse),
}

enum Begin {
    Seen(Seen),
    Fresh(watch::Sender<Option<InvocationResponse>>),
}

#[derive(Debug)]
struct DedupWindow {
    entries: HashMap<String, Seen>,
    completed: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            completed: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Prior state of `id`, or a fresh in-flight mark.
    fn begin(&mut self, id: &str) -> Begin {
        if let Some(seen) = self.entries.get(id) {
            return Begin::Seen(seen.clone());
        }
        let (outcome, rx) = watch::channel(None);
        self.entries.insert(id.to_string(), Seen::InFlight(rx));
        Begin::Fresh(outcome)
    }

    fn complete(&mut self, id: &str, response: InvocationResponse) {
        self.entries.insert(id.to_string(), Seen::Done(response));
        self.completed.push_back(id.to_string());
        while self.completed.len() > self.capacity {
            if let Some(oldest) = self.completed.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    fn abandon(&mut self, id: &str) {
        if matches!(self.entries.get(id), Some(Seen::InFlight(_))) {
            self.entries.remove(id);
        }
    }

    fn len(&self) -> usize {
        self.completed.len()
    }
}

/// Owns an in-flight mark. Completion remembers the response; failure or
/// drop clears the mark so the id may be retried. Either way, duplicates
/// waiting on the outcome are released.
struct InFlight<'a> {
    window: &'a Mutex<DedupWindow>,
    id: &'a str,
    outcome: watch::Sender<Option<InvocationResponse>>,
    done: bool,
}

impl InFlight<'_> {
    fn complete(mut self, response: &InvocationResponse) {
        lock(self.window).complete(self.id, response.clone());
        self.outcome.send_replace(Some(response.clone()));
        self.done = true;
    }

    fn fail(mut self, response: InvocationResponse) -> InvocationResponse {
        lock(self.window).abandon(self.id);
        self.outcome.send_replace(Some(response.clone()));
        self.done = true;
        response
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            lock(self.window).abandon(self.id);
        }
    }
}

fn lock(window: &Mutex<DedupWindow>) -> std::sync::MutexGuard<'_, DedupWindow> {
    window.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Validates, de-duplicates and applies reaction invocations.
pub struct ReactionHandlerCore {
    sink: Arc<dyn ReactionSink>,
    config: ReactionConfig,
    window: Mutex<DedupWindow>,
    metrics: ReactionMetrics,
    stop: watch::Sender<bool>,
}

impl ReactionHandlerCore {
    /// Core applying to `sink`.
    pub fn new(sink: Arc<dyn ReactionSink>, config: ReactionConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            sink,
            window: Mutex::new(DedupWindow::new(config.dedup_capacity)),
            config,
            metrics: ReactionMetrics::default(),
            stop,
        }
    }

    /// Counters for this handler.
    pub fn metrics(&self) -> &ReactionMetrics {
        &self.metrics
    }

    /// Active settings.
    pub fn config(&self) -> &ReactionConfig {
        &self.config
    }

    /// Flips to `true` once `stop_after_invocations` invocations were applied.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Completed ids currently remembered.
    pub fn remembered(&self) -> usize {
        lock(&self.window).len()
    }

    /// `HandleInvocation`.
    pub async fn handle_invocation(&self, invocation: wire::ReactionInvocation) -> InvocationResponse {
        self.metrics.received();
        let id = invocation.id.clone();
        if id.is_empty() {
            self.metrics.rejected();
            warn!(query_id = %invocation.query_id, "invocation rejected: empty id");
            return InvocationResponse::failed(id, ValidationError::EmptyInvocationId.to_string());
        }

        let prior = lock(&self.window).begin(&id);
        let outcome = match prior {
            Begin::Seen(Seen::Done(response)) => {
                self.metrics.duplicate();
                debug!(invocation_id = %id, "duplicate invocation answered from window");
                return response;
            }
            Begin::Seen(Seen::InFlight(pending)) => {
                self.metrics.duplicate();
                debug!(invocation_id = %id, "duplicate of an in-flight invocation; awaiting it");
                return self.await_in_flight(id, pending).await;
            }
            Begin::Fresh(outcome) => outcome,
        };
        let guard = InFlight {
            window: &self.window,
            id: &id,
            outcome,
            done: false,
        };

        let invocation = match self.validate(invocation) {
            Ok(invocation) => invocation,
            Err(err) => {
                self.metrics.rejected();
                warn!(invocation_id = %id, %err, "invocation rejected");
                return guard.fail(InvocationResponse::failed(id.clone(), err.to_string()));
            }
        };
        self.log_correlation(&invocation);

        let timeout = self.config.request_timeout;
        let applied = tokio::time::timeout(timeout, self.sink.apply(&invocation))
            .await
            .unwrap_or(Err(SinkError::Timeout(timeout)));
        if let Err(err) = applied {
            self.metrics.rejected();
            warn!(invocation_id = %id, %err, "pipeline failed to apply invocation");
            return guard.fail(InvocationResponse::failed(id.clone(), err.to_string()));
        }

        let payload = &invocation.payload;
        let total = self.metrics.applied(
            payload.added.len(),
            payload.updated.len(),
            payload.deleted.len(),
        );
        let response = InvocationResponse::ok(
            id.clone(),
            format!(
                "applied {} records for query {} (sequence {})",
                payload.record_count(),
                invocation.query_id,
                payload.sequence
            ),
        );
        guard.complete(&response);

        if let Some(limit) = self.config.stop_after_invocations {
            if total == limit {
                info!(limit, "invocation limit reached; signalling stop");
                self.stop.send_replace(true);
            }
        }
        response
    }

    /// Answer a duplicate with the outcome of the delivery already in flight.
    /// Success is only reported once that delivery actually applied.
    async fn await_in_flight(&self, id: String, mut pending: Outcome) -> InvocationResponse {
        let timeout = self.config.request_timeout;
        let outcome = tokio::time::timeout(timeout, async {
            pending
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|outcome| outcome.clone())
        })
        .await;
        match outcome {
            Ok(Some(response)) => response,
            Ok(None) => InvocationResponse::failed(
                id,
                "earlier delivery of this invocation was interrupted; retry",
            ),
            Err(_) => InvocationResponse::failed(
                id,
                format!("invocation still being applied after {timeout:?}; retry"),
            ),
        }
    }

    fn validate(&self, invocation: wire::ReactionInvocation) -> Result<ReactionInvocation, ValidationError> {
        let invocation = ReactionInvocation::try_from(invocation)?;
        if !self.config.query_ids.is_empty() && !self.config.query_ids.contains(&invocation.query_id) {
            return Err(ValidationError::UnknownQuery(invocation.query_id));
        }
        invocation.payload.check_disjoint(&self.config.record_id_field)?;
        Ok(invocation)
    }

    fn log_correlation(&self, invocation: &ReactionInvocation) {
        let Some(key) = self.config.correlation_metadata_key.as_deref() else {
            return;
        };
        match invocation.metadata.get(key) {
            Some(value) => info!(
                invocation_id = %invocation.id,
                query_id = %invocation.query_id,
                key,
                value = %value,
                "invocation correlation"
            ),
            None => debug!(invocation_id = %invocation.id, key, "no correlation metadata"),
        }
    }
}
