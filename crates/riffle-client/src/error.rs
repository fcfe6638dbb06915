// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client-side failures. A `success = false` response is not one of them.

use thiserror::Error;

/// Why a call produced no response.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Host/port do not form a valid URI.
    #[error("invalid endpoint {uri}: {source}")]
    InvalidEndpoint {
        /// Rejected URI.
        uri: String,
        /// Parser error.
        #[source]
        source: tonic::transport::Error,
    },
    /// Connection could not be established.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The server (or the channel) answered with a non-OK status.
    #[error("rpc failed: {0}")]
    Status(#[from] tonic::Status),
    /// The background dispatcher is no longer accepting events.
    #[error("adaptive dispatcher is closed")]
    Closed,
}

impl ClientError {
    /// Transport failures and `Unavailable` may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::InvalidEndpoint { .. } | ClientError::Closed => false,
            ClientError::Transport(_) => true,
            ClientError::Status(status) => status.code() == tonic::Code::Unavailable,
        }
    }
}
