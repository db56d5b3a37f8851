use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sqlgate_core::config::DatabaseConfig;
use sqlgate_core::{EventEmitter, GatewayEvent, QueryOutcome, QueryRequest};

use crate::connection::{self, ConnectError, DbConnection, DbTarget};
use crate::executor::{ExecutionLimits, QueryExecutor};

/// Owns the gateway's single database connection.
///
/// Requests take the lock for their whole round trip, so statements never
/// overlap and are serviced in arrival order.
#[derive(Debug)]
pub struct Session {
    connection: Mutex<Option<DbConnection>>,
    limits: ExecutionLimits,
}

impl Session {
    pub async fn connect(
        config: &DatabaseConfig,
        limits: ExecutionLimits,
    ) -> Result<Self, ConnectError> {
        let target_label = config.redacted_target();
        info!(
            event_name = "gateway.db.connecting",
            target = %target_label,
            "Connecting to database"
        );

        let target = DbTarget::from_config(config)?;
        match connection::connect(&target, config.connect_timeout()).await {
            Ok(connection) => {
                info!(
                    event_name = "gateway.db.connected",
                    backend = connection.backend().as_str(),
                    "Database connection established."
                );
                Ok(Self::with_connection(connection, limits))
            }
            Err(error) => {
                warn!(
                    event_name = "gateway.db.connect_failed",
                    target = %target_label,
                    error = %error,
                    "Database connection failed"
                );
                Err(error)
            }
        }
    }

    pub fn with_connection(connection: DbConnection, limits: ExecutionLimits) -> Self {
        Self { connection: Mutex::new(Some(connection)), limits }
    }

    /// A session with no connection; every request reports it as unavailable.
    pub fn detached(limits: ExecutionLimits) -> Self {
        Self { connection: Mutex::new(None), limits }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    pub async fn disconnect(&self) {
        let Some(connection) = self.connection.lock().await.take() else {
            warn!(event_name = "gateway.db.disconnect_skipped", "No database connection to close.");
            return;
        };

        if let Err(error) = connection.close().await {
            warn!(
                event_name = "gateway.db.close_failed",
                error = %error,
                "database connection did not close cleanly"
            );
        }
        info!(event_name = "gateway.db.disconnected", "Database connection closed.");
    }

    /// Runs one request to completion. Never fails: every error is folded
    /// into a `QueryOutcome::Failure`, including a panic inside the driver.
    pub async fn execute(&self, request: QueryRequest, events: &EventEmitter) -> QueryOutcome {
        let request_id = GatewayEvent::new_request_id();
        events
            .emit(GatewayEvent::started(
                request_id.clone(),
                request.statement.clone(),
                request.parameters.clone(),
            ))
            .await;

        // A panic unwinds through the connection guard and the open
        // transaction, whose drop queues the rollback.
        let outcome = match AssertUnwindSafe(self.run(&request, &request_id)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                warn!(
                    event_name = "gateway.query.worker_failed",
                    request_id = %request_id,
                    error = %detail,
                    "query worker stopped before producing a result"
                );
                QueryOutcome::unexpected(detail)
            }
        };

        events.emit(GatewayEvent::finished(request_id, &outcome)).await;
        outcome
    }

    async fn run(&self, request: &QueryRequest, request_id: &str) -> QueryOutcome {
        let mut guard = self.connection.lock().await;
        let Some(connection) = guard.as_mut() else {
            return QueryOutcome::unavailable();
        };

        debug!(
            event_name = "gateway.query.dispatch",
            request_id = %request_id,
            backend = connection.backend().as_str(),
            "connection acquired"
        );

        match QueryExecutor::new(connection, &self.limits).run(request).await {
            Ok(outcome) => outcome,
            Err(error) => error.into_outcome(),
        }
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("query worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("query worker panicked: {message}")
    } else {
        "query worker panicked".to_string()
    }
}
