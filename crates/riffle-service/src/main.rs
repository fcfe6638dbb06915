// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Riffle dispatch host: `SourceDispatcher` and `ReactionHandler` over gRPC,
//! plus the HTTP+JSON event endpoint.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use riffle_config::ConfigService;
use riffle_config_fs::FsConfigStore;
use riffle_service::{
    BatchFailurePolicy, HostPrefs, LoggingReactionSink, LoggingSink, ServiceHost, PREFS_KEY,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Riffle change dispatch host")]
struct Args {
    /// SourceDispatcher gRPC listener (e.g. 0.0.0.0:50051)
    #[arg(long)]
    dispatcher_addr: Option<SocketAddr>,
    /// ReactionHandler gRPC listener (e.g. 0.0.0.0:50052)
    #[arg(long)]
    reaction_addr: Option<SocketAddr>,
    /// HTTP+JSON listener (e.g. 0.0.0.0:9000)
    #[arg(long, conflicts_with = "no_http")]
    http_addr: Option<SocketAddr>,
    /// Do not serve the HTTP+JSON endpoint.
    #[arg(long)]
    no_http: bool,
    /// Source stream for unbatched events.
    #[arg(long)]
    default_source_id: Option<String>,
    /// Concurrent in-flight calls.
    #[arg(long)]
    max_workers: Option<usize>,
    /// Bound on worker waits and pipeline calls, in seconds.
    #[arg(long)]
    request_timeout_secs: Option<u64>,
    /// What a batch does after a rejected event.
    #[arg(long, value_enum)]
    batch_failure_policy: Option<BatchFailurePolicy>,
    /// Distinct source streams tracked at once.
    #[arg(long)]
    max_source_streams: Option<usize>,
    /// Completed invocation ids remembered for de-duplication.
    #[arg(long)]
    dedup_capacity: Option<usize>,
    /// Served query id (repeatable). Replaces the configured set when given.
    #[arg(long = "query-id")]
    query_ids: Vec<String>,
    /// Record field holding a result row's identity.
    #[arg(long)]
    record_id_field: Option<String>,
    /// Invocation metadata key logged for correlation.
    #[arg(long)]
    correlation_key: Option<String>,
    /// Stop after this many applied invocations.
    #[arg(long)]
    stop_after: Option<u64>,
    /// Read and persist prefs here instead of the platform config dir.
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

impl Args {
    /// Overlay command-line flags on stored prefs. Not persisted.
    fn apply(self, mut prefs: HostPrefs) -> HostPrefs {
        if let Some(addr) = self.dispatcher_addr {
            prefs.source_dispatcher_addr = addr;
        }
        if let Some(addr) = self.reaction_addr {
            prefs.reaction_handler_addr = addr;
        }
        if self.no_http {
            prefs.http_addr = None;
        } else if let Some(addr) = self.http_addr {
            prefs.http_addr = Some(addr);
        }
        if let Some(source) = self.default_source_id {
            prefs.default_source_id = source;
        }
        if let Some(n) = self.max_workers {
            prefs.max_workers = n;
        }
        if let Some(secs) = self.request_timeout_secs {
            prefs.request_timeout_secs = secs;
        }
        if let Some(policy) = self.batch_failure_policy {
            prefs.batch_failure_policy = policy;
        }
        if let Some(n) = self.max_source_streams {
            prefs.max_source_streams = n;
        }
        if let Some(n) = self.dedup_capacity {
            prefs.dedup_capacity = n;
        }
        if !self.query_ids.is_empty() {
            prefs.query_ids = self.query_ids.into_iter().collect();
        }
        if let Some(field) = self.record_id_field {
            prefs.record_id_field = field;
        }
        if let Some(key) = self.correlation_key {
            prefs.correlation_metadata_key = Some(key);
        }
        if let Some(n) = self.stop_after {
            prefs.stop_after_invocations = Some(n);
        }
        prefs
    }
}

// Config (best-effort): a missing or unreadable store falls back to defaults.
fn load_prefs(config_dir: Option<&Path>) -> HostPrefs {
    let store = match config_dir {
        Some(dir) => FsConfigStore::with_base(dir),
        None => FsConfigStore::new(),
    };
    let config = match store {
        Ok(store) => ConfigService::new(store),
        Err(err) => {
            warn!(%err, "config store unavailable; using defaults");
            return HostPrefs::default();
        }
    };
    match config.load_or_init::<HostPrefs>(PREFS_KEY) {
        Ok(prefs) => prefs,
        Err(err) => {
            warn!(%err, key = PREFS_KEY, "could not load prefs; using defaults");
            HostPrefs::default()
        }
    }
}

/// `RUST_LOG` when set and valid, else `info`.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

async fn bind(addr: SocketAddr, what: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {what} on {addr}"))?;
    info!(addr = %listener.local_addr()?, "{what} listening");
    Ok(listener)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .init();

    let prefs = load_prefs(args.config_dir.as_deref());
    let prefs = args.apply(prefs);
    info!(?prefs, "starting riffle-service");

    let host = ServiceHost::new(&prefs, Arc::new(LoggingSink), Arc::new(LoggingReactionSink));

    let dispatcher_listener = bind(prefs.source_dispatcher_addr, "source dispatcher").await?;
    let reaction_listener = bind(prefs.reaction_handler_addr, "reaction handler").await?;
    let http_listener = match prefs.http_addr {
        Some(addr) => Some(bind(addr, "http endpoint").await?),
        None => None,
    };

    // graceful shutdown on Ctrl+C
    let ctrl_c = host.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl-c received; shutting down");
                ctrl_c.shutdown();
            }
            Err(err) => warn!(%err, "failed to install ctrl-c handler"),
        }
    });

    let dispatcher = async {
        host.serve_dispatcher(dispatcher_listener)
            .await
            .context("source dispatcher")
    };
    let reactions = async {
        host.serve_reactions(reaction_listener)
            .await
            .context("reaction handler")
    };
    let http = async {
        match http_listener {
            Some(listener) => host.serve_http(listener).await.context("http endpoint"),
            None => Ok(()),
        }
    };
    tokio::try_join!(dispatcher, reactions, http)?;

    let dispatch = host.dispatcher().metrics().snapshot();
    let reaction = host.reactions().metrics().snapshot();
    info!(?dispatch, ?reaction, "riffle-service stopped");
    Ok(())
}
