use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub email: EmailConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub approvals_enabled: bool,
    pub base_url: String,
    pub token_expiry_hours: u32,
    pub cleanup_interval_hours: u32,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub reference_retry_attempts: u32,
    pub escalation_sweep_interval_mins: u32,
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
    pub email_approvals_enabled: Option<bool>,
    pub email_base_url: Option<String>,
    pub token_expiry_hours: Option<u32>,
    pub log_level: Option<String>,
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
                url: "sqlite://flowgate.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            email: EmailConfig {
                approvals_enabled: true,
                base_url: "http://localhost:9500".to_string(),
                token_expiry_hours: 48,
                cleanup_interval_hours: 6,
            },
            workflow: WorkflowConfig {
                reference_retry_attempts: 5,
                escalation_sweep_interval_mins: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("flowgate.toml"));
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
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(email) = patch.email {
            if let Some(approvals_enabled) = email.approvals_enabled {
                self.email.approvals_enabled = approvals_enabled;
            }
            if let Some(base_url) = email.base_url {
                self.email.base_url = base_url;
            }
            if let Some(token_expiry_hours) = email.token_expiry_hours {
                self.email.token_expiry_hours = token_expiry_hours;
            }
            if let Some(cleanup_interval_hours) = email.cleanup_interval_hours {
                self.email.cleanup_interval_hours = cleanup_interval_hours;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(attempts) = workflow.reference_retry_attempts {
                self.workflow.reference_retry_attempts = attempts;
            }
            if let Some(interval) = workflow.escalation_sweep_interval_mins {
                self.workflow.escalation_sweep_interval_mins = interval;
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
        if let Some(value) = read_env("FLOWGATE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FLOWGATE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("FLOWGATE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FLOWGATE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FLOWGATE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FLOWGATE_EMAIL_APPROVALS_ENABLED") {
            self.email.approvals_enabled = parse_bool("FLOWGATE_EMAIL_APPROVALS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("FLOWGATE_EMAIL_BASE_URL") {
            self.email.base_url = value;
        }
        if let Some(value) = read_env("FLOWGATE_EMAIL_TOKEN_EXPIRY_HOURS") {
            self.email.token_expiry_hours =
                parse_u32("FLOWGATE_EMAIL_TOKEN_EXPIRY_HOURS", &value)?;
        }

        if let Some(value) = read_env("FLOWGATE_REFERENCE_RETRY_ATTEMPTS") {
            self.workflow.reference_retry_attempts =
                parse_u32("FLOWGATE_REFERENCE_RETRY_ATTEMPTS", &value)?;
        }

        let log_level =
            read_env("FLOWGATE_LOGGING_LEVEL").or_else(|| read_env("FLOWGATE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FLOWGATE_LOGGING_FORMAT").or_else(|| read_env("FLOWGATE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(approvals_enabled) = overrides.email_approvals_enabled {
            self.email.approvals_enabled = approvals_enabled;
        }
        if let Some(base_url) = overrides.email_base_url {
            self.email.base_url = base_url;
        }
        if let Some(token_expiry_hours) = overrides.token_expiry_hours {
            self.email.token_expiry_hours = token_expiry_hours;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_email(&self.email)?;
        validate_workflow(&self.workflow)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("flowgate.toml"), PathBuf::from("config/flowgate.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_email(email: &EmailConfig) -> Result<(), ConfigError> {
    if email.approvals_enabled {
        if !email.base_url.starts_with("http://") && !email.base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "email.base_url must start with http:// or https://".to_string(),
            ));
        }
        if email.token_expiry_hours == 0 || email.token_expiry_hours > 720 {
            return Err(ConfigError::Validation(
                "email.token_expiry_hours must be in range 1..=720".to_string(),
            ));
        }
    }

    if email.cleanup_interval_hours == 0 {
        return Err(ConfigError::Validation(
            "email.cleanup_interval_hours must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.reference_retry_attempts == 0 {
        return Err(ConfigError::Validation(
            "workflow.reference_retry_attempts must be greater than zero".to_string(),
        ));
    }

    if workflow.escalation_sweep_interval_mins == 0 {
        return Err(ConfigError::Validation(
            "workflow.escalation_sweep_interval_mins must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    email: Option<EmailPatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    approvals_enabled: Option<bool>,
    base_url: Option<String>,
    token_expiry_hours: Option<u32>,
    cleanup_interval_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    reference_retry_attempts: Option<u32>,
    escalation_sweep_interval_mins: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
