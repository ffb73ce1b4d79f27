//! Connection Provider: opens connections with a bounded, fixed-interval retry.

use crate::client::{Connection, Credentials, Driver};
use crate::url::ConnectionUrl;
use std::sync::Arc;
use tdengine_connect_core::{ConnectorError, ConnectorResult, RetryPolicy};
use tracing::{info, warn};

/// Produces live connections for one URL and set of credentials
#[derive(Clone)]
pub struct ConnectionProvider {
    driver: Arc<dyn Driver>,
    url: ConnectionUrl,
    credentials: Credentials,
    policy: RetryPolicy,
}

impl ConnectionProvider {
    pub fn new(
        driver: Arc<dyn Driver>,
        url: ConnectionUrl,
        credentials: Credentials,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            driver,
            url,
            credentials,
            policy,
        }
    }

    /// Parse `raw_url` up front so a bad prefix fails before any attempt
    pub fn from_url(
        driver: Arc<dyn Driver>,
        raw_url: &str,
        credentials: Credentials,
        policy: RetryPolicy,
    ) -> ConnectorResult<Self> {
        let url = ConnectionUrl::parse(raw_url)?;
        Ok(Self::new(driver, url, credentials, policy))
    }

    pub fn url(&self) -> &ConnectionUrl {
        &self.url
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Open a connection, retrying transient failures
    ///
    /// Returns [`ConnectorError::Connection`] wrapping the last failure once
    /// every attempt is used. Errors that cannot succeed on retry, such as
    /// rejected credentials, are returned after the first attempt.
    pub async fn connect(&self) -> ConnectorResult<Box<dyn Connection>> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                attempt,
                max_attempts,
                "Connecting to TDengine at {}", self.url
            );

            let err = match self.driver.connect(&self.url, &self.credentials).await {
                Ok(connection) => {
                    info!(attempt, "Connected to TDengine at {}", self.url);
                    return Ok(connection);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                warn!(attempt, "Connection to {} rejected: {}", self.url, err);
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(
                    attempt,
                    max_attempts,
                    "Giving up on {} after {} attempt(s): {}", self.url, attempt, err
                );
                return Err(ConnectorError::Connection {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(
                attempt,
                max_attempts,
                "Connection attempt failed, retrying in {:?}: {}",
                self.policy.backoff(),
                err
            );
            tokio::time::sleep(self.policy.backoff()).await;
        }
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("url", &self.url.to_string())
            .field("credentials", &self.credentials)
            .field("policy", &self.policy)
            .finish()
    }
}
