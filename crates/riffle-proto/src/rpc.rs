// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Generated tonic stubs (package `riffle.v1`).
//!
//! Servers implement [`source_dispatcher_server::SourceDispatcher`] and
//! [`reaction_handler_server::ReactionHandler`]; clients use
//! [`source_dispatcher_client::SourceDispatcherClient`] and
//! [`reaction_handler_client::ReactionHandlerClient`].

include!(concat!(env!("OUT_DIR"), "/riffle.v1.SourceDispatcher.rs"));
include!(concat!(env!("OUT_DIR"), "/riffle.v1.ReactionHandler.rs"));

/// Fully-qualified gRPC service name of the source dispatcher.
pub const SOURCE_DISPATCHER_SERVICE: &str = "riffle.v1.SourceDispatcher";
/// Fully-qualified gRPC service name of the reaction handler.
pub const REACTION_HANDLER_SERVICE: &str = "riffle.v1.ReactionHandler";
