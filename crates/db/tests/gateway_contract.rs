use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use sqlgate_core::config::AppConfig;
use sqlgate_core::storefront;
use sqlgate_core::{
    EventEmitter, GatewayEvent, InMemoryEventSink, QueryOutcome, QueryRequest,
    UNEXPECTED_ERROR_PREFIX,
};
use sqlgate_db::{ExecutionLimits, Session};

type ContractResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

const SCHEMA: [&str; 5] = [
    "CREATE TABLE product (product_id INTEGER PRIMARY KEY, name TEXT NOT NULL, price NUMERIC NOT NULL)",
    "CREATE TABLE shopping_cart (\
        customer_id INTEGER NOT NULL, \
        product_id INTEGER NOT NULL REFERENCES product (product_id), \
        quantity INTEGER NOT NULL, \
        unit_price NUMERIC NOT NULL, \
        PRIMARY KEY (customer_id, product_id))",
    "CREATE TABLE refund (refund_id INTEGER PRIMARY KEY, status TEXT NOT NULL DEFAULT 'Pending', reason TEXT)",
    "INSERT INTO product (product_id, name, price) VALUES (16, 'Enamel mug', 19.99), (17, 'Tea towel', 7.5), (18, 'Kettle', 42.0)",
    "INSERT INTO refund (refund_id, status) VALUES (1, 'Pending')",
];

async fn storefront_session(limits: ExecutionLimits) -> ContractResult<Arc<Session>> {
    let mut config = AppConfig::default().database;
    config.url = Some("sqlite::memory:".to_string());
    let session = Session::connect(&config, limits)
        .await
        .map(Arc::new)
        .map_err(|error| format!("connect failed: {error}"))?;

    let events = EventEmitter::new();
    for statement in SCHEMA {
        let outcome = session.execute(QueryRequest::new(statement), &events).await;
        require!(!outcome.is_failure(), "schema statement failed: {outcome:?}");
    }
    Ok(session)
}

async fn run(session: &Arc<Session>, request: QueryRequest) -> Value {
    session.execute(request, &EventEmitter::new()).await.to_value()
}

#[tokio::test]
async fn add_to_cart_commits_and_is_visible() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;

    let ack = run(&session, storefront::add_to_cart(1, 16, 2, 19.99)).await;
    require_eq!(ack, json!({"status": "success", "rows_affected": 1}));

    let rows = run(
        &session,
        QueryRequest::new(
            "SELECT quantity FROM shopping_cart WHERE customer_id = :customer_id AND product_id = :product_id",
        )
        .with_parameter("customer_id", 1)
        .with_parameter("product_id", 16),
    )
    .await;
    require_eq!(rows, json!([{"quantity": 2}]));
    Ok(())
}

#[tokio::test]
async fn cart_updates_and_removals_report_affected_rows() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;
    run(&session, storefront::add_to_cart(1, 17, 1, 7.5)).await;

    let updated = run(&session, storefront::update_quantity_in_cart(4, 1, 17)).await;
    require_eq!(updated, json!({"status": "success", "rows_affected": 1}));

    let removed = run(&session, storefront::remove_from_cart(1, 17)).await;
    require_eq!(removed, json!({"status": "success", "rows_affected": 1}));

    let removed_again = run(&session, storefront::remove_from_cart(1, 17)).await;
    require_eq!(removed_again, json!({"status": "success", "rows_affected": 0}));
    Ok(())
}

#[tokio::test]
async fn approving_an_unknown_refund_touches_nothing() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;

    let ack = run(&session, storefront::approve_refund(999)).await;
    require_eq!(ack, json!({"status": "success", "rows_affected": 0}));

    let rejected = run(&session, storefront::reject_refund(1, "damaged in transit")).await;
    require_eq!(rejected, json!({"status": "success", "rows_affected": 1}));

    let refund = run(&session, QueryRequest::new("SELECT status, reason FROM refund WHERE refund_id = 1")).await;
    require_eq!(refund, json!([{"status": "Rejected", "reason": "damaged in transit"}]));
    Ok(())
}

#[tokio::test]
async fn failed_statement_leaves_the_connection_usable() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;

    let failure = session
        .execute(QueryRequest::new("SELECT no_such_column FROM product"), &EventEmitter::new())
        .await;
    let QueryOutcome::Failure(message) = failure else {
        return Err(format!("expected a failure, got {failure:?}"));
    };
    require!(message.contains("no such column"), "unexpected database message: {message}");
    require!(!message.starts_with(UNEXPECTED_ERROR_PREFIX), "database errors carry no prefix: {message}");

    let rows = run(&session, QueryRequest::new("SELECT name FROM product WHERE product_id = 16")).await;
    require_eq!(rows, json!([{"name": "Enamel mug"}]));
    Ok(())
}

#[tokio::test]
async fn constraint_violations_roll_back() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;
    run(&session, storefront::add_to_cart(3, 16, 1, 19.99)).await;

    let duplicate = run(&session, storefront::add_to_cart(3, 16, 5, 19.99)).await;
    let message = duplicate["error"].as_str().unwrap_or_default().to_string();
    require!(message.contains("UNIQUE constraint failed"), "unexpected response: {duplicate}");

    let unknown_product = run(&session, storefront::add_to_cart(3, 999, 1, 1.0)).await;
    let message = unknown_product["error"].as_str().unwrap_or_default().to_string();
    require!(message.contains("FOREIGN KEY constraint failed"), "unexpected response: {unknown_product}");

    let rows = run(&session, QueryRequest::new("SELECT product_id, quantity FROM shopping_cart WHERE customer_id = 3")).await;
    require_eq!(rows, json!([{"product_id": 16, "quantity": 1}]));
    Ok(())
}

#[tokio::test]
async fn repeated_selects_return_identical_results() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;
    let select = || QueryRequest::new("SELECT product_id, name, price FROM product ORDER BY product_id");

    let first = run(&session, select()).await;
    let second = run(&session, select()).await;
    require_eq!(first, second);
    require_eq!(first.as_array().map(Vec::len), Some(3));
    require_eq!(first[0], json!({"product_id": 16, "name": "Enamel mug", "price": "19.99"}));
    require_eq!(first[2]["price"], json!("42"));

    let empty = run(&session, QueryRequest::new("SELECT name FROM product WHERE product_id = -1")).await;
    require_eq!(empty, json!([]));
    Ok(())
}

#[tokio::test]
async fn returning_clause_yields_rows_and_commits() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;

    let inserted = run(
        &session,
        QueryRequest::new("INSERT INTO refund (refund_id) VALUES (%(refund_id)s) RETURNING refund_id, status")
            .with_parameter("refund_id", 2),
    )
    .await;
    require_eq!(inserted, json!([{"refund_id": 2, "status": "Pending"}]));

    let count = run(&session, QueryRequest::new("SELECT COUNT(*) AS refunds FROM refund")).await;
    require_eq!(count, json!([{"refunds": 2}]));
    Ok(())
}

#[tokio::test]
async fn missing_parameter_is_an_unexpected_failure() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;

    let outcome = session
        .execute(
            QueryRequest::new("UPDATE refund SET status = 'Approved' WHERE refund_id = :refund_id")
                .with_parameter("id", 1),
            &EventEmitter::new(),
        )
        .await;
    let QueryOutcome::Failure(message) = outcome else {
        return Err(format!("expected a failure, got {outcome:?}"));
    };
    require!(message.starts_with(UNEXPECTED_ERROR_PREFIX), "missing prefix: {message}");
    require!(message.contains("refund_id"), "parameter name missing: {message}");

    let untouched = run(&session, QueryRequest::new("SELECT status FROM refund WHERE refund_id = 1")).await;
    require_eq!(untouched, json!([{"status": "Pending"}]));
    Ok(())
}

#[tokio::test]
async fn row_limit_rejects_oversized_results() -> ContractResult {
    let limits = ExecutionLimits { statement_timeout: None, max_rows: Some(2) };
    let session = storefront_session(limits).await?;

    let too_many = run(&session, QueryRequest::new("SELECT product_id FROM product")).await;
    require_eq!(too_many, json!({"error": "result exceeds row limit of 2 rows"}));

    let within = run(&session, QueryRequest::new("SELECT product_id FROM product ORDER BY product_id LIMIT 2")).await;
    require_eq!(within, json!([{"product_id": 16}, {"product_id": 17}]));
    Ok(())
}

#[tokio::test]
async fn slow_statements_time_out_and_the_next_request_runs() -> ContractResult {
    let limits = ExecutionLimits { statement_timeout: Some(Duration::from_millis(100)), max_rows: None };
    let session = storefront_session(limits).await?;

    let slow = run(
        &session,
        QueryRequest::new(
            "WITH RECURSIVE counter(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM counter WHERE x < 10000000) \
             SELECT count(*) AS total FROM counter",
        ),
    )
    .await;
    require_eq!(slow, json!({"error": "statement timed out after 100ms"}));

    let next = run(&session, QueryRequest::new("SELECT name FROM product WHERE product_id = 17")).await;
    require_eq!(next, json!([{"name": "Tea towel"}]));
    Ok(())
}

#[tokio::test]
async fn null_binds_into_typed_columns() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;

    let ack = run(
        &session,
        QueryRequest::new("UPDATE refund SET reason = :reason WHERE refund_id = :refund_id")
            .with_parameter("reason", Value::Null)
            .with_parameter("refund_id", 1),
    )
    .await;
    require_eq!(ack, json!({"status": "success", "rows_affected": 1}));

    let refund = run(&session, QueryRequest::new("SELECT reason FROM refund WHERE refund_id = 1")).await;
    require_eq!(refund, json!([{"reason": null}]));
    Ok(())
}

#[tokio::test]
async fn disconnected_session_reports_unavailable() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;
    session.disconnect().await;

    let outcome = run(&session, QueryRequest::new("SELECT 1")).await;
    require_eq!(outcome, json!({"error": "Database connection is not available."}));
    Ok(())
}

#[tokio::test]
async fn events_describe_each_request() -> ContractResult {
    let session = storefront_session(ExecutionLimits::default()).await?;
    let sink = Arc::new(InMemoryEventSink::default());
    let events = EventEmitter::new().with_sink(sink.clone());

    session.execute(storefront::approve_refund(1), &events).await;

    let recorded = sink.events();
    require_eq!(recorded.len(), 2);
    let summaries = recorded.iter().map(GatewayEvent::summary).collect::<Vec<_>>();
    require_eq!(
        summaries[0],
        "Executing query: UPDATE refund SET status = 'Approved' WHERE refund_id = :refund_id with params: {\"refund_id\":1}"
            .to_string()
    );
    require_eq!(summaries[1], "Query executed successfully. 1 rows affected.".to_string());
    Ok(())
}
