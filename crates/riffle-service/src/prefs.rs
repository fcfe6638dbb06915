// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Host preferences persisted under the `dispatch_host` config key.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use riffle_proto::{DEFAULT_DISPATCHER_PORT, DEFAULT_HTTP_PORT, DEFAULT_REACTION_PORT};
use serde::{Deserialize, Serialize};

use crate::dispatcher::DispatcherConfig;
use crate::reaction::ReactionConfig;

/// Config key the host reads its preferences from.
pub const PREFS_KEY: &str = "dispatch_host";

/// What a batch does after its first rejected event.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BatchFailurePolicy {
    /// Keep forwarding the remaining events (best effort).
    #[default]
    Continue,
    /// Stop at the first rejection; earlier events stay forwarded.
    Abort,
}

/// Everything the host needs to bind and run both services.
///
/// Unknown fields are ignored and missing ones take their defaults, so an
/// older prefs file keeps loading after new fields are added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPrefs {
    /// gRPC `SourceDispatcher` listen address.
    pub source_dispatcher_addr: SocketAddr,
    /// gRPC `ReactionHandler` listen address.
    pub reaction_handler_addr: SocketAddr,
    /// HTTP+JSON listen address; `None` disables the endpoint.
    pub http_addr: Option<SocketAddr>,
    /// Source stream used by `DispatchSingle` and `POST /events`.
    pub default_source_id: String,
    /// Concurrent in-flight calls across all services.
    pub max_workers: usize,
    /// Upper bound on waiting for a worker and on each pipeline call.
    pub request_timeout_secs: u64,
    /// Batch behaviour after a rejected event.
    pub batch_failure_policy: BatchFailurePolicy,
    /// Distinct source streams the dispatcher tracks.
    pub max_source_streams: usize,
    /// Completed invocation ids remembered for de-duplication.
    pub dedup_capacity: usize,
    /// Queries this handler serves; empty accepts any non-empty id.
    pub query_ids: BTreeSet<String>,
    /// Record field that carries a result row's identity.
    pub record_id_field: String,
    /// Invocation metadata key logged for correlation.
    pub correlation_metadata_key: Option<String>,
    /// Stop serving after this many applied invocations.
    pub stop_after_invocations: Option<u64>,
}

fn any_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
}

impl Default for HostPrefs {
    fn default() -> Self {
        Self {
            source_dispatcher_addr: any_addr(DEFAULT_DISPATCHER_PORT),
            reaction_handler_addr: any_addr(DEFAULT_REACTION_PORT),
            http_addr: Some(any_addr(DEFAULT_HTTP_PORT)),
            default_source_id: String::new(),
            max_workers: 10,
            request_timeout_secs: 30,
            batch_failure_policy: BatchFailurePolicy::Continue,
            max_source_streams: 10_000,
            dedup_capacity: 10_000,
            query_ids: BTreeSet::new(),
            record_id_field: "id".into(),
            correlation_metadata_key: Some("x-query-sequence".into()),
            stop_after_invocations: None,
        }
    }
}

impl HostPrefs {
    /// `request_timeout_secs` as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings for the source dispatcher core.
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            default_source_id: self.default_source_id.clone(),
            failure_policy: self.batch_failure_policy,
            request_timeout: self.request_timeout(),
            max_source_streams: self.max_source_streams,
        }
    }

    /// Settings for the reaction handler core.
    pub fn reaction_config(&self) -> ReactionConfig {
        ReactionConfig {
            query_ids: self.query_ids.clone(),
            record_id_field: self.record_id_field.clone(),
            dedup_capacity: self.dedup_capacity,
            correlation_metadata_key: self.correlation_metadata_key.clone(),
            stop_after_invocations: self.stop_after_invocations,
            request_timeout: self.request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riffle_config::{ConfigService, ConfigStore, MemoryConfigStore};

    #[test]
    fn defaults_match_the_documented_endpoints() {
        let prefs = HostPrefs::default();
        assert_eq!(prefs.source_dispatcher_addr.port(), 50051);
        assert_eq!(prefs.reaction_handler_addr.port(), 50052);
        assert_eq!(prefs.http_addr.map(|a| a.port()), Some(9000));
        assert_eq!(prefs.max_workers, 10);
        assert_eq!(prefs.request_timeout(), Duration::from_secs(30));
        assert_eq!(prefs.batch_failure_policy, BatchFailurePolicy::Continue);
    }

    #[test]
    fn policy_serializes_lowercase() {
        let json = serde_json::to_string(&BatchFailurePolicy::Abort).unwrap();
        assert_eq!(json, "\"abort\"");
    }

    #[test]
    fn partial_prefs_file_keeps_other_defaults() {
        let store = MemoryConfigStore::new();
        store
            .save_raw(
                PREFS_KEY,
                br#"{"batch_failure_policy":"abort","query_ids":["q1"],"http_addr":null}"#,
            )
            .unwrap();
        let prefs: HostPrefs = ConfigService::new(store).load_or_init(PREFS_KEY).unwrap();
        assert_eq!(prefs.batch_failure_policy, BatchFailurePolicy::Abort);
        assert!(prefs.query_ids.contains("q1"));
        assert_eq!(prefs.http_addr, None);
        assert_eq!(prefs.dedup_capacity, 10_000);
        assert_eq!(prefs.dispatcher_config().failure_policy, BatchFailurePolicy::Abort);
    }
}
