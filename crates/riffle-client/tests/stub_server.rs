// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Clients against a scripted in-process server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use riffle_client::batcher::AdaptiveBatchConfig;
use riffle_client::{
    AdaptiveSourceDispatcher, ClientError, ConnectionSettings, DispatcherSettings,
    ReactionClientSettings, ReactionHandlerClient, RetryPolicy, SourceDispatcherClient,
};
use riffle_proto::rpc::reaction_handler_server::{ReactionHandler, ReactionHandlerServer};
use riffle_proto::rpc::source_dispatcher_server::{SourceDispatcher, SourceDispatcherServer};
use riffle_proto::{wire, ChangeOp, ReactionInvocation, ReactionPayload, SourceChangeEvent};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// Fails the first `unavailable` calls, then echoes counts.
#[derive(Default)]
struct Scripted {
    unavailable: u32,
    calls: AtomicU32,
    batches: Mutex<Vec<wire::EventBatch>>,
    headers: Mutex<Vec<Option<String>>>,
}

/// Server handle sharing one script between both services.
#[derive(Clone)]
struct Stub(Arc<Scripted>);

impl Scripted {
    fn gate(&self) -> Result<(), Status> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.unavailable {
            return Err(Status::unavailable("warming up"));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl SourceDispatcher for Stub {
    async fn dispatch_single(
        &self,
        request: Request<wire::SourceChangeEvent>,
    ) -> Result<Response<wire::DispatchResponse>, Status> {
        self.0.gate()?;
        let event = request.into_inner();
        let ok = event.op != "x";
        Ok(Response::new(wire::DispatchResponse {
            success: ok,
            message: if ok { "ok".into() } else { "invalid op".into() },
            events_processed: u64::from(ok),
        }))
    }

    async fn dispatch_batch(
        &self,
        request: Request<wire::EventBatch>,
    ) -> Result<Response<wire::DispatchResponse>, Status> {
        self.0.gate()?;
        let batch = request.into_inner();
        let n = batch.events.len() as u64;
        self.0.batches.lock().unwrap().push(batch);
        Ok(Response::new(wire::DispatchResponse {
            success: true,
            message: "ok".into(),
            events_processed: n,
        }))
    }
}

#[tonic::async_trait]
impl ReactionHandler for Stub {
    async fn handle_invocation(
        &self,
        request: Request<wire::ReactionInvocation>,
    ) -> Result<Response<wire::InvocationResponse>, Status> {
        self.0.gate()?;
        let header = request
            .metadata()
            .get("x-query-sequence")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.0.headers.lock().unwrap().push(header);
        let id = request.into_inner().id;
        Ok(Response::new(wire::InvocationResponse {
            success: true,
            message: "applied".into(),
            invocation_id: id,
        }))
    }
}

async fn spawn(scripted: Arc<Scripted>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(
        Server::builder()
            .add_service(SourceDispatcherServer::new(Stub(scripted.clone())))
            .add_service(ReactionHandlerServer::new(Stub(scripted)))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    port
}

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

fn dispatcher_settings(port: u16, batch_events: bool) -> DispatcherSettings {
    DispatcherSettings {
        connection: ConnectionSettings {
            retry: fast_retry(3),
            ..ConnectionSettings::new("127.0.0.1", port)
        },
        batch_events,
        source_id: "sensors".into(),
        ..DispatcherSettings::default()
    }
}

fn events() -> Vec<SourceChangeEvent> {
    vec![
        SourceChangeEvent::node(1, ChangeOp::Create, "n1").with_label("Room"),
        SourceChangeEvent::relationship(2, ChangeOp::Create, "r1", "n1", "n2"),
    ]
}

#[tokio::test]
async fn unavailable_server_is_retried() {
    let scripted = Arc::new(Scripted {
        unavailable: 2,
        ..Scripted::default()
    });
    let port = spawn(scripted.clone()).await;
    let client = SourceDispatcherClient::new(dispatcher_settings(port, true)).unwrap();

    let resp = timeout(Duration::from_secs(5), client.dispatch(events()))
        .await
        .expect("dispatch timed out")
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.events_processed, 2);
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 3);

    let batches = scripted.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].source_id, "sensors");
    assert!(batches[0].events[0].relationship.is_none());
    assert!(batches[0].events[1].relationship.is_some());
}

#[tokio::test]
async fn retries_give_up_with_the_last_status() {
    let scripted = Arc::new(Scripted {
        unavailable: 100,
        ..Scripted::default()
    });
    let port = spawn(scripted.clone()).await;
    let client = SourceDispatcherClient::new(dispatcher_settings(port, true)).unwrap();

    let err = client.dispatch(events()).await.unwrap_err();
    assert!(matches!(err, ClientError::Status(ref s) if s.code() == tonic::Code::Unavailable));
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn unbatched_mode_folds_single_responses() {
    let port = spawn(Arc::new(Scripted::default())).await;
    let client = SourceDispatcherClient::new(dispatcher_settings(port, false)).unwrap();

    let mut evs = events();
    evs.push(SourceChangeEvent::node(3, ChangeOp::Delete, "n1"));
    let resp = client.dispatch(evs).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.events_processed, 3);
}

#[tokio::test]
async fn refused_connection_is_a_retryable_error() {
    // Bind and drop to find a port nobody listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let client = SourceDispatcherClient::new(DispatcherSettings {
        connection: ConnectionSettings {
            retry: fast_retry(1),
            ..ConnectionSettings::new("127.0.0.1", port)
        },
        ..DispatcherSettings::default()
    })
    .unwrap();
    let err = client.dispatch(events()).await.unwrap_err();
    assert!(err.is_retryable(), "{err}");
}

#[tokio::test]
async fn reaction_client_sends_the_sequence_header() {
    let scripted = Arc::new(Scripted::default());
    let port = spawn(scripted.clone()).await;
    let client = ReactionHandlerClient::new(ReactionClientSettings {
        connection: ConnectionSettings {
            retry: fast_retry(0),
            ..ConnectionSettings::new("127.0.0.1", port)
        },
        ..ReactionClientSettings::default()
    })
    .unwrap();

    let invocation = ReactionInvocation {
        id: "inv-9".into(),
        timestamp: 0,
        query_id: "comfort".into(),
        metadata: Default::default(),
        payload: ReactionPayload {
            sequence: 42,
            ..ReactionPayload::default()
        },
    };
    let resp = client.handle_invocation(invocation).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.invocation_id, "inv-9");
    assert_eq!(
        scripted.headers.lock().unwrap().as_slice(),
        &[Some("42".to_string())]
    );
}

#[tokio::test]
async fn adaptive_dispatcher_flushes_everything_on_close() {
    let scripted = Arc::new(Scripted::default());
    let port = spawn(scripted.clone()).await;
    let client = SourceDispatcherClient::new(dispatcher_settings(port, true)).unwrap();
    let adaptive = AdaptiveSourceDispatcher::spawn(
        client,
        AdaptiveBatchConfig {
            max_batch_size: 10,
            min_batch_size: 1,
            max_wait_time: Duration::from_millis(20),
            min_wait_time: Duration::from_millis(1),
            ..AdaptiveBatchConfig::default()
        },
        8,
    );

    for seq in 1..=25u64 {
        adaptive
            .send(SourceChangeEvent::node(seq, ChangeOp::Update, format!("n{seq}")))
            .await
            .unwrap();
    }
    let report = timeout(Duration::from_secs(5), adaptive.close())
        .await
        .expect("close timed out")
        .unwrap();
    assert_eq!(report.events_processed, 25);
    assert_eq!(report.batches_failed, 0);
    assert_eq!(report.events_rejected, 0);

    let batches = scripted.batches.lock().unwrap();
    assert_eq!(report.batches_sent, batches.len() as u64);
    assert!(batches.iter().all(|b| b.source_id == "sensors"));
    assert!(batches.iter().all(|b| b.events.len() <= 10));
    let sequences: Vec<u64> = batches
        .iter()
        .flat_map(|b| b.events.iter().map(|e| e.sequence_number))
        .collect();
    assert_eq!(sequences, (1..=25).collect::<Vec<_>>());
}

#[tokio::test]
async fn adaptive_dispatcher_counts_batches_lost_to_the_transport() {
    let scripted = Arc::new(Scripted {
        unavailable: 100,
        ..Scripted::default()
    });
    let port = spawn(scripted.clone()).await;
    let client = SourceDispatcherClient::new(dispatcher_settings(port, true)).unwrap();
    let adaptive = AdaptiveSourceDispatcher::spawn(client, AdaptiveBatchConfig::default(), 4);

    for event in events() {
        adaptive.send(event).await.unwrap();
    }
    let report = timeout(Duration::from_secs(5), adaptive.close())
        .await
        .expect("close timed out")
        .unwrap();
    assert_eq!(report.batches_sent, 0);
    assert!(report.batches_failed >= 1);
    assert_eq!(report.events_processed, 0);
}
