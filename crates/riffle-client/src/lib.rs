// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Clients for the Riffle dispatch host.
//!
//! [`SourceDispatcherClient`] sends change events from a source;
//! [`ReactionHandlerClient`] delivers query result deltas to a reaction
//! consumer. Both connect lazily and retry transport failures per their
//! [`RetryPolicy`]. [`batcher::AdaptiveBatcher`] groups a stream of events
//! into batches sized by observed throughput; [`AdaptiveSourceDispatcher`]
//! runs one in the background in front of a dispatcher client.

mod adaptive;
pub mod batcher;
mod dispatcher;
mod error;
mod reaction;
mod retry;
mod settings;

pub use adaptive::{AdaptiveReport, AdaptiveSourceDispatcher};
pub use dispatcher::{DispatcherSettings, SourceDispatcherClient};
pub use error::ClientError;
pub use reaction::{ReactionClientSettings, ReactionHandlerClient};
pub use retry::RetryPolicy;
pub use settings::ConnectionSettings;
