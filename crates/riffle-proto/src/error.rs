// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Validation errors raised when a wire message becomes a domain value.

use thiserror::Error;

/// A malformed field in an event, batch or invocation.
///
/// Never retried by the server; reported to the caller as `success = false`
/// with the error's display text as the response message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `SourceChangeEvent.id` is empty.
    #[error("event id is empty")]
    EmptyId,
    /// `op` is not one of `c`, `u`, `d`.
    #[error("invalid op code {0:?} (expected c, u or d)")]
    InvalidOp(String),
    /// A present relationship is missing one of its endpoint ids.
    #[error("relationship {id:?} has an empty {end} id")]
    IncompleteRelationship {
        /// Relationship id.
        id: String,
        /// Which endpoint (`start` or `end`).
        end: &'static str,
    },
    /// A `Value` message with no variant populated.
    #[error("field {field:?} holds a value with no variant set")]
    EmptyValue {
        /// Record field name.
        field: String,
    },
    /// `EventBatch.source_id` is empty.
    #[error("batch source_id is empty")]
    EmptySourceId,
    /// Event sequence number is below the last one accepted for its source.
    #[error("sequence number {got} is below last accepted {last} for source {source_id:?}")]
    SequenceRegression {
        /// Source stream.
        source_id: String,
        /// Highest sequence number accepted so far.
        last: u64,
        /// Offending sequence number.
        got: u64,
    },
    /// A new source stream would exceed the dispatcher's stream limit.
    #[error("source stream limit of {limit} reached; source {source_id:?} not accepted")]
    SourceLimit {
        /// Rejected source stream.
        source_id: String,
        /// Configured limit.
        limit: usize,
    },
    /// `ReactionInvocation.id` is empty.
    #[error("invocation id is empty")]
    EmptyInvocationId,
    /// `ReactionInvocation.query_id` is empty.
    #[error("query id is empty")]
    EmptyQueryId,
    /// `query_id` is not served by this handler.
    #[error("unknown query id {0:?}")]
    UnknownQuery(String),
    /// Invocation arrived without a payload.
    #[error("invocation has no payload")]
    MissingPayload,
    /// The same record identity appears in two of added/updated/deleted.
    #[error("record {id} appears in both {first} and {second}")]
    OverlappingRecords {
        /// Display form of the record identity value.
        id: String,
        /// Set where the identity was first seen.
        first: &'static str,
        /// Set where it was seen again.
        second: &'static str,
    },
}
