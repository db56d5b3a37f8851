use std::str::FromStr;
use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use thiserror::Error;

use sqlgate_core::config::DatabaseConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Sqlite,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

/// Where the gateway connects, resolved from configuration.
#[derive(Clone, Debug)]
pub enum DbTarget {
    Postgres(PgConnectOptions),
    Sqlite(SqliteConnectOptions),
}

/// The single live connection a session owns.
#[derive(Debug)]
pub enum DbConnection {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid database url: {0}")]
    InvalidUrl(#[source] sqlx::Error),
    #[error("database connection failed: {0}")]
    Database(#[source] sqlx::Error),
    #[error("database connection timed out after {0:?}")]
    TimedOut(Duration),
}

impl DbTarget {
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConnectError> {
        match config.url.as_deref().map(str::trim) {
            Some(url) if url.starts_with("sqlite:") => SqliteConnectOptions::from_str(url)
                .map(|options| Self::Sqlite(options.foreign_keys(true)))
                .map_err(ConnectError::InvalidUrl),
            Some(url) => PgConnectOptions::from_str(url)
                .map(|options| Self::Postgres(options.application_name("sqlgate")))
                .map_err(ConnectError::InvalidUrl),
            None => Ok(Self::Postgres(
                PgConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .database(&config.name)
                    .username(&config.user)
                    .password(config.password.expose_secret())
                    .application_name("sqlgate"),
            )),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Postgres(_) => Backend::Postgres,
            Self::Sqlite(_) => Backend::Sqlite,
        }
    }
}

/// Opens the gateway's one connection. No retry; callers decide whether a
/// failure is fatal.
pub async fn connect(target: &DbTarget, timeout: Duration) -> Result<DbConnection, ConnectError> {
    DbConnection::open(target, timeout).await
}

impl DbConnection {
    pub async fn open(target: &DbTarget, timeout: Duration) -> Result<Self, ConnectError> {
        let connecting = async {
            match target {
                DbTarget::Postgres(options) => options.connect().await.map(Self::Postgres),
                DbTarget::Sqlite(options) => options.connect().await.map(Self::Sqlite),
            }
        };

        match tokio::time::timeout(timeout, connecting).await {
            Ok(result) => result.map_err(ConnectError::Database),
            Err(_) => Err(ConnectError::TimedOut(timeout)),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Postgres(_) => Backend::Postgres,
            Self::Sqlite(_) => Backend::Sqlite,
        }
    }

    pub async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            Self::Postgres(connection) => connection.close().await,
            Self::Sqlite(connection) => connection.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sqlgate_core::config::AppConfig;

    use super::{connect, Backend, ConnectError, DbTarget};

    #[test]
    fn discrete_settings_resolve_to_postgres() {
        let config = AppConfig::default().database;
        let target = DbTarget::from_config(&config).expect("target");
        assert_eq!(target.backend(), Backend::Postgres);
    }

    #[test]
    fn url_scheme_selects_the_backend() {
        let mut config = AppConfig::default().database;

        config.url = Some("sqlite::memory:".to_string());
        assert_eq!(DbTarget::from_config(&config).expect("sqlite").backend(), Backend::Sqlite);

        config.url = Some("postgresql://agent:pw@db:5432/shop".to_string());
        assert_eq!(DbTarget::from_config(&config).expect("postgres").backend(), Backend::Postgres);
    }

    #[tokio::test]
    async fn in_memory_sqlite_opens_and_closes() {
        let mut config = AppConfig::default().database;
        config.url = Some("sqlite::memory:".to_string());
        let target = DbTarget::from_config(&config).expect("target");

        let connection = connect(&target, Duration::from_secs(5)).await.expect("open connection");
        assert_eq!(connection.backend(), Backend::Sqlite);
        connection.close().await.expect("close");
    }

    #[tokio::test]
    async fn missing_sqlite_file_is_a_connect_error() {
        let mut config = AppConfig::default().database;
        config.url = Some("sqlite:///definitely/not/here/sqlgate.db".to_string());
        let target = DbTarget::from_config(&config).expect("target");

        let error = connect(&target, Duration::from_secs(5))
            .await
            .expect_err("opening a missing file without mode=rwc should fail");
        assert!(matches!(error, ConnectError::Database(_)));
    }
}
