// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine-side client for `riffle.v1.ReactionHandler`.

use riffle_proto::rpc::reaction_handler_client::ReactionHandlerClient as GrpcClient;
use riffle_proto::{wire, InvocationResponse, ReactionInvocation, DEFAULT_REACTION_PORT};
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue};
use tonic::transport::Channel;
use tonic::Request;
use tracing::warn;

use crate::{ClientError, ConnectionSettings};

/// Reaction client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionClientSettings {
    /// Endpoint, timeouts and retries.
    pub connection: ConnectionSettings,
    /// gRPC header carrying the payload sequence; `None` sends no header.
    pub correlation_metadata_key: Option<String>,
}

impl Default for ReactionClientSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionSettings::new("localhost", DEFAULT_REACTION_PORT),
            correlation_metadata_key: Some("x-query-sequence".into()),
        }
    }
}

/// Delivers reaction invocations. Redelivering the same invocation is safe:
/// the handler applies each id at most once.
#[derive(Debug, Clone)]
pub struct ReactionHandlerClient {
    inner: GrpcClient<Channel>,
    header: Option<AsciiMetadataKey>,
    retry: crate::RetryPolicy,
}

impl ReactionHandlerClient {
    /// Client that connects on its first call.
    pub fn new(settings: ReactionClientSettings) -> Result<Self, ClientError> {
        let channel = settings.connection.lazy_channel()?;
        let header = settings
            .correlation_metadata_key
            .as_deref()
            .and_then(|key| match AsciiMetadataKey::from_bytes(key.as_bytes()) {
                Ok(key) => Some(key),
                Err(err) => {
                    warn!(key, %err, "ignoring invalid correlation header name");
                    None
                }
            });
        Ok(Self {
            inner: GrpcClient::new(channel),
            header,
            retry: settings.connection.retry,
        })
    }

    /// `HandleInvocation`.
    pub async fn handle_invocation(
        &self,
        invocation: ReactionInvocation,
    ) -> Result<InvocationResponse, ClientError> {
        let sequence = invocation.payload.sequence;
        let invocation = wire::ReactionInvocation::from(invocation);
        let response = self
            .retry
            .run("HandleInvocation", || {
                let mut client = self.inner.clone();
                let mut request = Request::new(invocation.clone());
                if let Some(key) = &self.header {
                    if let Ok(value) = sequence.to_string().parse::<AsciiMetadataValue>() {
                        request.metadata_mut().insert(key.clone(), value);
                    }
                }
                async move {
                    let response = client.handle_invocation(request).await?;
                    Ok::<_, ClientError>(response.into_inner())
                }
            })
            .await?;
        Ok(response.into())
    }
}
