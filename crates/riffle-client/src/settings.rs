// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Connection settings shared by both clients.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

use crate::{ClientError, RetryPolicy};

/// Where and how to reach a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Per-request deadline.
    pub timeout: Duration,
    /// Connection establishment deadline.
    pub connect_timeout: Duration,
    /// Retry policy for transport failures.
    pub retry: RetryPolicy,
}

impl ConnectionSettings {
    /// Settings for `host:port` with default timeouts and retries.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    /// `http://host:port`.
    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn endpoint(&self) -> Result<Endpoint, ClientError> {
        let uri = self.uri();
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|source| ClientError::InvalidEndpoint { uri, source })?;
        Ok(endpoint
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout))
    }

    /// Channel that connects on first use and reconnects after failures.
    pub(crate) fn lazy_channel(&self) -> Result<Channel, ClientError> {
        Ok(self.endpoint()?.connect_lazy())
    }

    /// Channel connected now.
    pub(crate) async fn connected_channel(&self) -> Result<Channel, ClientError> {
        Ok(self.endpoint()?.connect().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_joins_host_and_port() {
        assert_eq!(ConnectionSettings::new("localhost", 50051).uri(), "http://localhost:50051");
    }

    #[test]
    fn bad_host_is_an_invalid_endpoint() {
        let err = ConnectionSettings::new("bad host", 1).endpoint().unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint { .. }));
        assert!(!err.is_retryable());
    }
}
