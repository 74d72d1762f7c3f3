//! Connection factory
//!
//! Creates connections bound to a variant and fills pools with them.

use tokio::task::JoinSet;
use tracing::debug;

use super::connection::{ConnectOptions, Connection};
use crate::config::BenchConfig;
use crate::pool::Pool;
use crate::utils::ProvisioningError;
use crate::variant::Variant;

/// Factory carrying the connection parameters shared by every variant
#[derive(Clone)]
pub struct ConnectionFactory {
    opts: ConnectOptions,
}

impl ConnectionFactory {
    pub fn new(config: &BenchConfig) -> Self {
        Self {
            opts: ConnectOptions {
                host: config.host.clone(),
                port: config.port,
                user: config.user.clone(),
                password: config.password.clone(),
                database: config.database.clone(),
                connect_timeout: config.connect_timeout,
                tls: config.tls.clone(),
            },
        }
    }

    /// Create one connection bound to `variant`
    pub async fn connect(&self, variant: Variant) -> Result<Connection, ProvisioningError> {
        Connection::connect(&self.opts, variant).await
    }

    /// Fill a pool with exactly `capacity` connections, establishing
    /// them concurrently.
    ///
    /// All-or-nothing: the first failure wins, remaining connect
    /// attempts are aborted and any connections already established are
    /// terminated.
    pub async fn provision(
        &self,
        variant: Variant,
        capacity: usize,
    ) -> Result<Pool<Connection>, ProvisioningError> {
        let mut attempts = JoinSet::new();
        for _ in 0..capacity {
            let factory = self.clone();
            attempts.spawn(async move { factory.connect(variant).await });
        }

        let mut connections = Vec::with_capacity(capacity);
        let mut failure: Option<ProvisioningError> = None;

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(Ok(conn)) => connections.push(conn),
                Ok(Err(e)) => {
                    if failure.is_none() {
                        failure = Some(e);
                        attempts.abort_all();
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(_) => {
                    if failure.is_none() {
                        failure = Some(ProvisioningError::Rejected(
                            "Connect task panicked".to_string(),
                        ));
                        attempts.abort_all();
                    }
                }
            }
        }

        if let Some(e) = failure {
            for conn in connections {
                conn.shutdown().await;
            }
            return Err(e);
        }

        debug!(
            "Provisioned {} connections for variant {}",
            connections.len(),
            variant.kind
        );
        Ok(Pool::new(connections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{TransportSecurity, VariantKind};
    use std::time::Duration;

    #[tokio::test]
    async fn test_provision_fails_against_closed_port() {
        // Nothing listens on this port; provisioning must fail as a
        // whole rather than hand back a partial pool
        let factory = ConnectionFactory {
            opts: ConnectOptions {
                host: "127.0.0.1".to_string(),
                port: 1,
                user: "root".to_string(),
                password: String::new(),
                database: String::new(),
                connect_timeout: Duration::from_millis(500),
                tls: Default::default(),
            },
        };

        let variant = VariantKind::Text.settings(TransportSecurity::Disabled);
        let err = factory.provision(variant, 4).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::ConnectFailed { .. } | ProvisioningError::Timeout(_)
        ));
    }
}
