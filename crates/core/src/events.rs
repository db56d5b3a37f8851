use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::codec::{Parameters, QueryOutcome};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    QueryStarted {
        request_id: String,
        statement: String,
        parameters: Option<Parameters>,
        occurred_at: DateTime<Utc>,
    },
    QuerySucceeded {
        request_id: String,
        /// The encoded response, exactly as returned to the caller.
        response: String,
        rows: Option<usize>,
        rows_affected: Option<u64>,
        occurred_at: DateTime<Utc>,
    },
    QueryFailed {
        request_id: String,
        error: String,
        occurred_at: DateTime<Utc>,
    },
}

impl GatewayEvent {
    pub fn new_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn started(
        request_id: impl Into<String>,
        statement: impl Into<String>,
        parameters: Option<Parameters>,
    ) -> Self {
        Self::QueryStarted {
            request_id: request_id.into(),
            statement: statement.into(),
            parameters,
            occurred_at: Utc::now(),
        }
    }

    pub fn finished(request_id: impl Into<String>, outcome: &QueryOutcome) -> Self {
        let request_id = request_id.into();
        let occurred_at = Utc::now();
        match outcome {
            QueryOutcome::Failure(error) => {
                Self::QueryFailed { request_id, error: error.clone(), occurred_at }
            }
            QueryOutcome::RowSet(rows) => Self::QuerySucceeded {
                request_id,
                response: outcome.to_json(),
                rows: Some(rows.len()),
                rows_affected: None,
                occurred_at,
            },
            QueryOutcome::MutationAck { rows_affected } => Self::QuerySucceeded {
                request_id,
                response: outcome.to_json(),
                rows: None,
                rows_affected: Some(*rows_affected),
                occurred_at,
            },
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::QueryStarted { request_id, .. }
            | Self::QuerySucceeded { request_id, .. }
            | Self::QueryFailed { request_id, .. } => request_id,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::QueryFailed { .. })
    }

    /// Operator-facing one-line rendering, shared by every sink.
    pub fn summary(&self) -> String {
        match self {
            Self::QueryStarted { statement, parameters, .. } => {
                let parameters =
                    parameters.as_ref().map(|p| Value::Object(p.clone())).unwrap_or(Value::Null);
                format!("Executing query: {statement} with params: {parameters}")
            }
            Self::QuerySucceeded { response, rows_affected: None, .. } => {
                format!("Query result: {response}")
            }
            Self::QuerySucceeded { rows_affected: Some(count), .. } => {
                format!("Query executed successfully. {count} rows affected.")
            }
            Self::QueryFailed { error, .. } => format!("Query execution error: {error}"),
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &GatewayEvent);
}

/// Fans a single emission out to every subscribed sink, in subscription order.
#[derive(Clone, Default)]
pub struct EventEmitter {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub async fn emit(&self, event: GatewayEvent) {
        for sink in &self.sinks {
            sink.emit(&event).await;
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn emit(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::QueryStarted { request_id, statement, parameters, .. } => {
                tracing::info!(
                    event_name = "gateway.query.started",
                    request_id = %request_id,
                    statement = %statement,
                    parameters = ?parameters,
                    "{}",
                    event.summary()
                );
            }
            GatewayEvent::QuerySucceeded { request_id, rows, rows_affected, .. } => {
                tracing::info!(
                    event_name = "gateway.query.succeeded",
                    request_id = %request_id,
                    rows = ?rows,
                    rows_affected = ?rows_affected,
                    "{}",
                    event.summary()
                );
            }
            GatewayEvent::QueryFailed { request_id, error, .. } => {
                tracing::error!(
                    event_name = "gateway.query.failed",
                    request_id = %request_id,
                    error = %error,
                    "{}",
                    event.summary()
                );
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<GatewayEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<GatewayEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn emit(&self, event: &GatewayEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::codec::{QueryOutcome, QueryRequest};
    use crate::events::{EventEmitter, GatewayEvent, InMemoryEventSink, TracingSink};

    #[tokio::test]
    async fn one_emission_reaches_every_sink() {
        let log = InMemoryEventSink::default();
        let notifications = InMemoryEventSink::default();
        let emitter = EventEmitter::new()
            .with_sink(Arc::new(TracingSink))
            .with_sink(Arc::new(log.clone()))
            .with_sink(Arc::new(notifications.clone()));

        emitter.emit(GatewayEvent::started("req-1", "SELECT 1", None)).await;

        assert_eq!(emitter.sink_count(), 3);
        assert_eq!(log.events(), notifications.events());
        assert_eq!(log.events()[0].request_id(), "req-1");
    }

    #[tokio::test]
    async fn per_call_subscription_leaves_the_shared_emitter_alone() {
        let log = InMemoryEventSink::default();
        let shared = EventEmitter::new().with_sink(Arc::new(log.clone()));

        let caller = InMemoryEventSink::default();
        let mut per_call = shared.clone();
        per_call.subscribe(Arc::new(caller.clone()));
        per_call.emit(GatewayEvent::started("req-6", "SELECT 1", None)).await;

        assert_eq!(shared.sink_count(), 1);
        assert_eq!(per_call.sink_count(), 2);
        assert_eq!(log.events().len(), 1);
        assert_eq!(caller.events(), log.events());
    }

    #[test]
    fn finished_event_mirrors_the_outcome() {
        let event = GatewayEvent::finished("req-2", &QueryOutcome::MutationAck { rows_affected: 4 });
        assert_eq!(event.summary(), "Query executed successfully. 4 rows affected.");
        assert!(!event.is_failure());

        let event = GatewayEvent::finished("req-3", &QueryOutcome::Failure("syntax error".into()));
        assert!(event.is_failure());
        assert_eq!(event.summary(), "Query execution error: syntax error");

        let event = GatewayEvent::finished("req-4", &QueryOutcome::RowSet(Vec::new()));
        assert_eq!(event.summary(), "Query result: []");
    }

    #[test]
    fn started_summary_includes_statement_and_parameters() {
        let request = QueryRequest::new("DELETE FROM shopping_cart WHERE customer_id = :customer")
            .with_parameter("customer", 1);
        let event = GatewayEvent::started("req-5", &request.statement, request.parameters.clone());

        assert_eq!(
            event.summary(),
            format!(
                "Executing query: {} with params: {}",
                request.statement,
                json!({"customer": 1})
            )
        );
    }
}
