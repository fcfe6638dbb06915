// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Riffle dispatch host.
//!
//! [`dispatcher::DispatcherCore`] and [`reaction::ReactionHandlerCore`] hold
//! the protocol semantics and know nothing about transports. [`grpc`] and
//! [`http`] adapt them to tonic and axum; [`host::ServiceHost`] wires the
//! cores, the shared [`pool::WorkerPool`] and the listeners together.

pub mod dispatcher;
pub mod grpc;
pub mod host;
pub mod http;
pub mod metrics;
pub mod pool;
pub mod prefs;
pub mod reaction;
pub mod sink;

pub use dispatcher::{DispatcherConfig, DispatcherCore};
pub use host::ServiceHost;
pub use prefs::{BatchFailurePolicy, HostPrefs, PREFS_KEY};
pub use reaction::{ReactionConfig, ReactionHandlerCore};
pub use sink::{
    ChannelReactionSink, ChannelSink, EventSink, ForwardedEvent, LoggingReactionSink, LoggingSink,
    ReactionSink, SinkError,
};
