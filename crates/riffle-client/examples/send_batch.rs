// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Push a few graph changes and one reaction invocation at a running
//! `riffle-service` on the default ports.
//!
//! ```text
//! cargo run -p riffle-service &
//! cargo run -p riffle-client --example send_batch
//! ```

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use riffle_client::batcher::AdaptiveBatchConfig;
use riffle_client::{
    AdaptiveSourceDispatcher, DispatcherSettings, ReactionClientSettings, ReactionHandlerClient,
    SourceDispatcherClient,
};
use riffle_proto::{ChangeOp, ReactionInvocation, ReactionPayload, SourceChangeEvent, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let now = i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos())?;

    let dispatcher = SourceDispatcherClient::new(DispatcherSettings {
        source_id: "building-sensors".into(),
        ..DispatcherSettings::default()
    })?;
    let events = vec![
        SourceChangeEvent::node(1, ChangeOp::Create, "room-1")
            .with_timestamp(now)
            .with_label("Room")
            .with_property("temperature", "21.5"),
        SourceChangeEvent::node(2, ChangeOp::Create, "floor-1")
            .with_timestamp(now)
            .with_label("Floor"),
        SourceChangeEvent::relationship(3, ChangeOp::Create, "part-of-1", "room-1", "floor-1")
            .with_timestamp(now)
            .with_label("PART_OF"),
        SourceChangeEvent::node(4, ChangeOp::Update, "room-1")
            .with_timestamp(now)
            .with_property("temperature", "23.0"),
    ];
    let resp = dispatcher.dispatch(events).await?;
    info!(success = resp.success, processed = resp.events_processed, message = %resp.message, "dispatch");

    // A burst of readings through the background batcher.
    let stream = AdaptiveSourceDispatcher::spawn(dispatcher, AdaptiveBatchConfig::default(), 1000);
    for seq in 5..105u64 {
        let reading = format!("{}.{}", 20 + seq % 10 / 2, seq % 2 * 5);
        stream
            .send(
                SourceChangeEvent::node(seq, ChangeOp::Update, "room-1")
                    .with_timestamp(now)
                    .with_property("temperature", reading),
            )
            .await?;
    }
    let report = stream.close().await?;
    info!(?report, "burst");

    let reactions = ReactionHandlerClient::new(ReactionClientSettings::default())?;
    let mut record = BTreeMap::new();
    record.insert("id".to_string(), Value::String("room-1".into()));
    record.insert("temperature".to_string(), Value::Double(23.0));
    let invocation = ReactionInvocation {
        id: format!("demo-{now}"),
        timestamp: now,
        query_id: "warm-rooms".into(),
        metadata: BTreeMap::new(),
        payload: ReactionPayload {
            sequence: 1,
            added: vec![record],
            ..ReactionPayload::default()
        },
    };
    let resp = reactions.handle_invocation(invocation.clone()).await?;
    info!(success = resp.success, message = %resp.message, "invocation");

    // Redelivery is answered from the de-duplication window.
    let again = reactions.handle_invocation(invocation).await?;
    info!(success = again.success, message = %again.message, "redelivery");
    Ok(())
}
