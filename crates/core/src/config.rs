use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Full connection URL. When set it wins over the discrete fields below.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: SecretString,
    pub connect_timeout_secs: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LimitsConfig {
    pub statement_timeout_secs: Option<u64>,
    pub max_rows: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub statement_timeout_secs: Option<u64>,
    pub max_rows: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: None,
                host: "localhost".to_string(),
                port: 5432,
                name: "testdb".to_string(),
                user: "user".to_string(),
                password: secret_value("password".to_string()),
                connect_timeout_secs: 10,
            },
            limits: LimitsConfig::default(),
            logging: LoggingConfig { level: "DEBUG".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl DatabaseConfig {
    /// Connection target with the password left out, safe to log.
    pub fn redacted_target(&self) -> String {
        match &self.url {
            Some(url) => redact_url(url),
            None => format!("postgres://{}@{}:{}/{}", self.user, self.host, self.port, self.name),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl LimitsConfig {
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.statement_timeout_secs.map(Duration::from_secs)
    }
}

impl LoggingConfig {
    /// Accepts `WARNING` and `CRITICAL` alongside the `tracing` level names,
    /// case-insensitively.
    pub fn max_level(&self) -> Result<Level, ConfigError> {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" | "warning" => Ok(Level::WARN),
            "error" | "critical" | "fatal" => Ok(Level::ERROR),
            _ => Err(ConfigError::Validation(
                "logging.level must be one of trace|debug|info|warn|error|critical".to_string(),
            )),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("sqlgate.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = Some(url);
            }
            if let Some(host) = database.host {
                self.database.host = host;
            }
            if let Some(port) = database.port {
                self.database.port = port;
            }
            if let Some(name) = database.name {
                self.database.name = name;
            }
            if let Some(user) = database.user {
                self.database.user = user;
            }
            if let Some(password) = database.password {
                self.database.password = secret_value(password);
            }
            if let Some(connect_timeout_secs) = database.connect_timeout_secs {
                self.database.connect_timeout_secs = connect_timeout_secs;
            }
        }

        if let Some(limits) = patch.limits {
            if let Some(statement_timeout_secs) = limits.statement_timeout_secs {
                self.limits.statement_timeout_secs = Some(statement_timeout_secs);
            }
            if let Some(max_rows) = limits.max_rows {
                self.limits.max_rows = Some(max_rows);
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DATABASE_URL") {
            self.database.url = Some(value);
        }
        if let Some(value) = read_env("DB_HOST") {
            self.database.host = value;
        }
        if let Some(value) = read_env("DB_PORT") {
            self.database.port = parse_u16("DB_PORT", &value)?;
        }
        if let Some(value) = read_env("DB_NAME") {
            self.database.name = value;
        }
        if let Some(value) = read_env("DB_USER") {
            self.database.user = value;
        }
        if let Some(value) = read_env("DB_PASSWORD") {
            self.database.password = secret_value(value);
        }
        if let Some(value) = read_env("DB_CONNECT_TIMEOUT_SECS") {
            self.database.connect_timeout_secs = parse_u64("DB_CONNECT_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("STATEMENT_TIMEOUT_SECS") {
            self.limits.statement_timeout_secs =
                Some(parse_u64("STATEMENT_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = read_env("MAX_ROWS") {
            self.limits.max_rows = Some(parse_usize("MAX_ROWS", &value)?);
        }

        if let Some(value) = read_env("LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = Some(database_url);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(statement_timeout_secs) = overrides.statement_timeout_secs {
            self.limits.statement_timeout_secs = Some(statement_timeout_secs);
        }
        if let Some(max_rows) = overrides.max_rows {
            self.limits.max_rows = Some(max_rows);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_limits(&self.limits)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("sqlgate.toml"), PathBuf::from("config/sqlgate.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    // Passwords may contain `@`; the host part never does.
    match rest.rsplit_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}@{host}")
        }
        None => url.to_string(),
    }
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if let Some(url) = &database.url {
        let url = url.trim();
        let supported = url.starts_with("postgres://")
            || url.starts_with("postgresql://")
            || url.starts_with("sqlite:");
        if !supported {
            return Err(ConfigError::Validation(
                "database.url must be a postgres (`postgres://...`) or sqlite (`sqlite:...`) URL"
                    .to_string(),
            ));
        }
    } else {
        if database.host.trim().is_empty() {
            return Err(ConfigError::Validation("database.host is required".to_string()));
        }
        if database.name.trim().is_empty() {
            return Err(ConfigError::Validation("database.name is required".to_string()));
        }
        if database.user.trim().is_empty() {
            return Err(ConfigError::Validation("database.user is required".to_string()));
        }
        if database.password.expose_secret().is_empty() {
            return Err(ConfigError::Validation("database.password is required".to_string()));
        }
    }

    if database.port == 0 {
        return Err(ConfigError::Validation(
            "database.port must be greater than zero".to_string(),
        ));
    }

    if database.connect_timeout_secs == 0 || database.connect_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.connect_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_limits(limits: &LimitsConfig) -> Result<(), ConfigError> {
    if limits.statement_timeout_secs == Some(0) {
        return Err(ConfigError::Validation(
            "limits.statement_timeout_secs must be greater than zero when set".to_string(),
        ));
    }

    if limits.max_rows == Some(0) {
        return Err(ConfigError::Validation(
            "limits.max_rows must be greater than zero when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    logging.max_level().map(|_| ())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    limits: Option<LimitsPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    connect_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsPatch {
    statement_timeout_secs: Option<u64>,
    max_rows: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
