use std::sync::Arc;

use rmcp::ServiceExt;
use sqlgate_core::config::{AppConfig, ConfigError, LoadOptions, LogFormat};
use sqlgate_db::{ConnectError, ExecutionLimits, Session};
use thiserror::Error;
use tracing::{error, info};

use crate::server::SqlGatewayServer;

pub struct Application {
    pub config: AppConfig,
    pub session: Arc<Session>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] ConnectError),
    #[error("MCP transport failed: {0}")]
    Transport(String),
}

/// Logs go to stderr; stdout carries the protocol stream.
pub fn init_logging(config: &AppConfig) -> Result<(), BootstrapError> {
    let level = config.logging.max_level()?;
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(level);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| BootstrapError::Logging(error.to_string()))
}

/// Connects the session. A connect failure is fatal to the process.
pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "gateway.bootstrap.start", "starting sqlgate bootstrap");

    let limits = ExecutionLimits::from(&config.limits);
    let session = match Session::connect(&config.database, limits).await {
        Ok(session) => Arc::new(session),
        Err(connect_error) => {
            error!(
                event_name = "gateway.bootstrap.connect_failed",
                severity = "fatal",
                target = %config.database.redacted_target(),
                error = %connect_error,
                "Failed to connect to database"
            );
            return Err(BootstrapError::DatabaseConnect(connect_error));
        }
    };

    Ok(Application { config, session })
}

pub async fn run(options: LoadOptions) -> Result<(), BootstrapError> {
    let config = AppConfig::load(options)?;
    init_logging(&config)?;

    let app = bootstrap_with_config(config).await?;
    let served = serve_stdio(Arc::clone(&app.session)).await;

    app.session.disconnect().await;
    info!(event_name = "gateway.server.stopped", "sqlgate server stopped");
    served
}

async fn serve_stdio(session: Arc<Session>) -> Result<(), BootstrapError> {
    let service = SqlGatewayServer::new(session)
        .serve(rmcp::transport::stdio())
        .await
        .map_err(|error| BootstrapError::Transport(error.to_string()))?;
    info!(event_name = "gateway.server.ready", transport = "stdio", "MCP server ready");

    // Dropping the running service on a signal cancels it.
    tokio::select! {
        quit = service.waiting() => match quit {
            Ok(reason) => info!(
                event_name = "gateway.server.client_closed",
                reason = ?reason,
                "MCP client disconnected"
            ),
            Err(join_error) => return Err(BootstrapError::Transport(join_error.to_string())),
        },
        () = shutdown_signal() => {
            info!(event_name = "gateway.server.signal", "shutdown signal received");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(event_name = "gateway.server.signal_failed", error = %error, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(event_name = "gateway.server.signal_failed", error = %error, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use sqlgate_core::config::{AppConfig, LoadOptions};

    use super::{bootstrap_with_config, BootstrapError};

    #[tokio::test]
    async fn sqlite_url_bootstraps_a_connected_session() {
        let mut config = AppConfig::default();
        config.database.url = Some("sqlite::memory:".to_string());
        config.limits.max_rows = Some(50);

        let app = bootstrap_with_config(config).await.expect("bootstrap");
        assert!(app.session.is_connected().await);
        assert_eq!(app.session.limits().max_rows, Some(50));
        app.session.disconnect().await;
    }

    #[tokio::test]
    async fn unreachable_database_is_a_bootstrap_error() {
        let mut config = AppConfig::default();
        config.database.url = Some("sqlite:///no/such/dir/sqlgate.db".to_string());

        let error = match bootstrap_with_config(config).await {
            Ok(_) => panic!("bootstrap should fail without a database"),
            Err(error) => error,
        };
        assert!(matches!(error, BootstrapError::DatabaseConnect(_)));
    }

    #[tokio::test]
    async fn invalid_config_file_fails_before_connecting() {
        let error = super::run(LoadOptions {
            config_path: Some("/definitely/missing/sqlgate.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        })
        .await
        .expect_err("missing required config file");
        assert!(matches!(error, BootstrapError::Config(_)));
    }
}
