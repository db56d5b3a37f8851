//! `sqlgate-mcp` binary.
//!
//! ```bash
//! # discrete settings, defaults to postgres://user@localhost:5432/testdb
//! DB_HOST=db.internal DB_PASSWORD=secret sqlgate-mcp
//!
//! # full URL, sqlite allowed
//! DATABASE_URL=sqlite://shop.db sqlgate-mcp --max-rows 500
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use sqlgate_core::config::{ConfigOverrides, LoadOptions, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "sqlgate-mcp",
    version,
    about = "SQL query gateway served over MCP stdio",
    long_about = "Runs SQL statements sent through the execute_query tool against one database connection."
)]
struct Cli {
    #[arg(long, help = "Path to a sqlgate TOML config file")]
    config: Option<PathBuf>,
    #[arg(long, help = "Database URL; overrides DATABASE_URL and the DB_* settings")]
    database_url: Option<String>,
    #[arg(long, help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,
    #[arg(long, help = "Log format: compact, pretty, json")]
    log_format: Option<LogFormat>,
    #[arg(long, help = "Cancel statements running longer than this many seconds")]
    statement_timeout_secs: Option<u64>,
    #[arg(long, help = "Reject row sets larger than this")]
    max_rows: Option<usize>,
}

impl Cli {
    fn load_options(self) -> LoadOptions {
        LoadOptions {
            require_file: self.config.is_some(),
            config_path: self.config,
            overrides: ConfigOverrides {
                database_url: self.database_url,
                log_level: self.log_level,
                log_format: self.log_format,
                statement_timeout_secs: self.statement_timeout_secs,
                max_rows: self.max_rows,
            },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let options = Cli::parse().load_options();
    sqlgate_mcp::run(options).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use sqlgate_core::config::LogFormat;

    use super::Cli;

    #[test]
    fn flags_become_overrides() {
        let cli = Cli::parse_from([
            "sqlgate-mcp",
            "--config",
            "deploy/sqlgate.toml",
            "--database-url",
            "sqlite::memory:",
            "--log-format",
            "json",
            "--max-rows",
            "25",
        ]);
        let options = cli.load_options();

        assert!(options.require_file);
        assert_eq!(options.overrides.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(options.overrides.log_format, Some(LogFormat::Json));
        assert_eq!(options.overrides.max_rows, Some(25));
        assert_eq!(options.overrides.statement_timeout_secs, None);
    }

    #[test]
    fn no_flags_means_optional_config_file() {
        let options = Cli::parse_from(["sqlgate-mcp"]).load_options();
        assert!(!options.require_file);
        assert!(options.config_path.is_none());
    }
}
