//! Runs one statement against the session's connection.
//!
//! Each request gets its own transaction. Statements whose prepared form has
//! result columns produce a row set; everything else produces a mutation
//! acknowledgement. A PostgreSQL script of several commands without
//! parameters is reported by its last command. Either way the transaction is
//! committed on success and rolled back on failure, so the next request
//! always starts clean.

use std::time::Duration;

use futures::TryStreamExt;
use sqlx::postgres::{PgConnection, Postgres};
use sqlx::sqlite::SqliteConnection;
use sqlx::{Connection, Database, Either, Executor, Statement, Transaction};
use thiserror::Error;
use tracing::warn;

use sqlgate_core::config::LimitsConfig;
use sqlgate_core::{QueryOutcome, QueryRequest};

use crate::coerce;
use crate::connection::DbConnection;
use crate::decode;
use crate::declared;
use crate::params::{self, BindError, BindValue, BoundStatement};

/// SQLSTATE raised when PostgreSQL cancels a statement on `statement_timeout`.
const PG_QUERY_CANCELED: &str = "57014";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub statement_timeout: Option<Duration>,
    pub max_rows: Option<usize>,
}

impl From<&LimitsConfig> for ExecutionLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self { statement_timeout: config.statement_timeout(), max_rows: config.max_rows }
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Rejected by the database; carries the driver's message.
    #[error("{0}")]
    Database(String),
    #[error("statement timed out after {0:?}")]
    TimedOut(Duration),
    #[error("result exceeds row limit of {0} rows")]
    RowLimit(usize),
    #[error(transparent)]
    Bind(#[from] BindError),
    #[error("could not decode column `{column}`: {source}")]
    Decode {
        column: String,
        #[source]
        source: sqlx::Error,
    },
}

impl ExecutionError {
    pub fn from_sqlx(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(database) => Self::Database(database.message().to_string()),
            _ => Self::Database(error.to_string()),
        }
    }

    fn from_pg(error: sqlx::Error, limits: &ExecutionLimits) -> Self {
        let canceled = matches!(
            &error,
            sqlx::Error::Database(database) if database.code().as_deref() == Some(PG_QUERY_CANCELED)
        );
        match limits.statement_timeout {
            Some(limit) if canceled => Self::TimedOut(limit),
            _ => Self::from_sqlx(error),
        }
    }

    /// Failures raised by the gateway itself rather than reported by the
    /// database or by a configured limit.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Bind(_) | Self::Decode { .. })
    }

    pub fn into_outcome(self) -> QueryOutcome {
        if self.is_unexpected() {
            QueryOutcome::unexpected(self)
        } else {
            QueryOutcome::Failure(self.to_string())
        }
    }
}

/// Borrows the session's connection for the duration of one request.
pub struct QueryExecutor<'c> {
    connection: &'c mut DbConnection,
    limits: &'c ExecutionLimits,
}

impl<'c> QueryExecutor<'c> {
    pub fn new(connection: &'c mut DbConnection, limits: &'c ExecutionLimits) -> Self {
        Self { connection, limits }
    }

    pub async fn run(&mut self, request: &QueryRequest) -> Result<QueryOutcome, ExecutionError> {
        let bound = params::bind(&request.statement, request.parameters.as_ref())?;
        match &mut *self.connection {
            DbConnection::Postgres(connection) => run_postgres(connection, &bound, self.limits).await,
            DbConnection::Sqlite(connection) => run_sqlite(connection, &bound, self.limits).await,
        }
    }
}

async fn run_postgres(
    connection: &mut PgConnection,
    bound: &BoundStatement,
    limits: &ExecutionLimits,
) -> Result<QueryOutcome, ExecutionError> {
    let mut tx = connection.begin().await.map_err(ExecutionError::from_sqlx)?;

    // Enforced server side so a slow statement is actually cancelled.
    if let Some(limit) = limits.statement_timeout {
        let set_timeout = format!("SET LOCAL statement_timeout = {}", limit.as_millis());
        if let Err(error) = (&mut *tx).execute(sqlx::raw_sql(&set_timeout)).await {
            rollback(tx).await;
            return Err(ExecutionError::from_sqlx(error));
        }
    }

    match postgres_statement(&mut tx, bound, limits.max_rows).await {
        Ok(outcome) => {
            tx.commit().await.map_err(ExecutionError::from_sqlx)?;
            Ok(outcome)
        }
        Err(StatementError::Sqlx(error)) => {
            rollback(tx).await;
            Err(ExecutionError::from_pg(error, limits))
        }
        Err(StatementError::Execution(error)) => {
            rollback(tx).await;
            Err(error)
        }
    }
}

async fn postgres_statement(
    tx: &mut Transaction<'_, Postgres>,
    bound: &BoundStatement,
    max_rows: Option<usize>,
) -> Result<QueryOutcome, StatementError> {
    // The extended protocol takes one command per prepare; scripts without
    // parameters go through the simple protocol instead.
    if bound.values.is_empty() && params::has_multiple_statements(&bound.sql) {
        return postgres_script(tx, &bound.sql, max_rows).await;
    }

    // Prepared without declared types: PostgreSQL infers each parameter and
    // every value is converted to what it inferred.
    let statement = (&mut **tx).prepare(&bound.sql).await?;
    let types = match statement.parameters() {
        Some(Either::Left(types)) => types,
        _ => &[],
    };
    let arguments = coerce::coerce_all(bound, types).map_err(ExecutionError::from)?;
    let returns_rows = !statement.columns().is_empty();

    let mut query = statement.query();
    for argument in arguments {
        query = argument.bind_to(query);
    }

    if returns_rows {
        let rows = query.fetch_all(&mut **tx).await?;
        check_row_limit(rows.len(), max_rows)?;
        let records = rows.iter().map(decode::pg_record).collect::<Result<Vec<_>, _>>()?;
        Ok(QueryOutcome::RowSet(records))
    } else {
        let done = query.execute(&mut **tx).await?;
        Ok(QueryOutcome::MutationAck { rows_affected: done.rows_affected() })
    }
}

/// Runs every command of `sql` and reports the last one. A last command that
/// returned rows yields a row set; otherwise its affected-row count.
async fn postgres_script(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    max_rows: Option<usize>,
) -> Result<QueryOutcome, StatementError> {
    let mut results = sqlx::raw_sql(sql).fetch_many(&mut **tx);
    let mut rows = Vec::new();
    let mut outcome = QueryOutcome::MutationAck { rows_affected: 0 };

    while let Some(step) = results.try_next().await? {
        match step {
            Either::Right(row) => {
                rows.push(row);
                check_row_limit(rows.len(), max_rows)?;
            }
            Either::Left(done) => {
                outcome = if rows.is_empty() {
                    QueryOutcome::MutationAck { rows_affected: done.rows_affected() }
                } else {
                    let records = rows.iter().map(decode::pg_record).collect::<Result<Vec<_>, _>>()?;
                    QueryOutcome::RowSet(records)
                };
                rows.clear();
            }
        }
    }

    Ok(outcome)
}

async fn run_sqlite(
    connection: &mut SqliteConnection,
    bound: &BoundStatement,
    limits: &ExecutionLimits,
) -> Result<QueryOutcome, ExecutionError> {
    let mut tx = connection.begin().await.map_err(ExecutionError::from_sqlx)?;

    let work = sqlite_statement(&mut tx, bound, limits.max_rows);
    let finished = match limits.statement_timeout {
        Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| limit),
        None => Ok(work.await),
    };
    let result = match finished {
        Ok(result) => result,
        Err(limit) => {
            // The worker is still busy with the statement; dropping the
            // transaction queues its rollback ahead of the next request.
            drop(tx);
            return Err(ExecutionError::TimedOut(limit));
        }
    };

    match result {
        Ok(outcome) => {
            tx.commit().await.map_err(ExecutionError::from_sqlx)?;
            Ok(outcome)
        }
        Err(error) => {
            rollback(tx).await;
            Err(error.into_execution())
        }
    }
}

async fn sqlite_statement(
    tx: &mut Transaction<'_, sqlx::Sqlite>,
    bound: &BoundStatement,
    max_rows: Option<usize>,
) -> Result<QueryOutcome, StatementError> {
    let statement = (&mut **tx).prepare(&bound.sql).await?;
    let returns_rows = !statement.columns().is_empty();

    let mut query = statement.query();
    for value in &bound.values {
        query = match value.clone() {
            BindValue::Null => query.bind(None::<String>),
            BindValue::Bool(flag) => query.bind(flag),
            BindValue::Int(int) => query.bind(int),
            BindValue::Float(float) => query.bind(float),
            BindValue::Text(text) => query.bind(text),
            BindValue::Json(json) => query.bind(json),
        };
    }

    if returns_rows {
        let declared = declared::column_types(&mut **tx, &bound.sql).await?;
        let rows = query.fetch_all(&mut **tx).await?;
        check_row_limit(rows.len(), max_rows)?;
        let records = rows
            .iter()
            .map(|row| decode::sqlite_record(row, &declared))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryOutcome::RowSet(records))
    } else {
        let done = query.execute(&mut **tx).await?;
        Ok(QueryOutcome::MutationAck { rows_affected: done.rows_affected() })
    }
}

fn check_row_limit(rows: usize, max_rows: Option<usize>) -> Result<(), ExecutionError> {
    match max_rows {
        Some(limit) if rows > limit => Err(ExecutionError::RowLimit(limit)),
        _ => Ok(()),
    }
}

async fn rollback<DB: Database>(tx: Transaction<'_, DB>) {
    if let Err(error) = tx.rollback().await {
        warn!(
            event_name = "gateway.query.rollback_failed",
            error = %error,
            "rollback after failed statement did not complete"
        );
    }
}

/// Keeps raw driver errors apart from gateway errors until the backend
/// decides how to classify them.
enum StatementError {
    Sqlx(sqlx::Error),
    Execution(ExecutionError),
}

impl StatementError {
    fn into_execution(self) -> ExecutionError {
        match self {
            Self::Sqlx(error) => ExecutionError::from_sqlx(error),
            Self::Execution(error) => error,
        }
    }
}

impl From<sqlx::Error> for StatementError {
    fn from(error: sqlx::Error) -> Self {
        Self::Sqlx(error)
    }
}

impl From<ExecutionError> for StatementError {
    fn from(error: ExecutionError) -> Self {
        Self::Execution(error)
    }
}
