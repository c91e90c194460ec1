use std::collections::BTreeMap;
use std::path::PathBuf;

use jid::BareJid;
use serde::Deserialize;

use crate::presence::{Show, StatusRanking};
use crate::types::Account;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("invalid TOML at line {line}, column {column}: {message}")]
    InvalidToml {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("missing required fields: {fields:?}")]
    MissingRequiredFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub account: AccountConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub jid: String,
    #[serde(default = "default_resource")]
    pub resource: String,
    #[serde(default)]
    pub priority: i8,
    /// Nickname used when joining rooms; defaults to the local part of `jid`
    pub nick: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresenceConfig {
    /// Rank overrides keyed by status keyword; lower ranks win
    #[serde(default)]
    pub ranking: BTreeMap<Show, u8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_true")]
    pub file_transfer: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            file_transfer: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            notification_capacity: 1024,
        }
    }
}

impl SessionConfig {
    /// Minimal configuration for an account, everything else defaulted.
    pub fn for_account(jid: impl Into<String>) -> Self {
        Self {
            account: AccountConfig {
                jid: jid.into(),
                resource: default_resource(),
                priority: 0,
                nick: None,
            },
            presence: PresenceConfig::default(),
            channels: ChannelsConfig::default(),
            logging: LoggingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }

    pub fn ranking(&self) -> StatusRanking {
        StatusRanking::default().with_overrides(&self.presence.ranking)
    }

    /// The validated account identity.
    pub fn account(&self) -> Result<Account, ConfigError> {
        let jid: BareJid = self
            .account
            .jid
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                field: "account.jid".to_string(),
                message: format!("{e}"),
            })?;
        let local = jid.node().map(|node| node.to_string()).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "account.jid".to_string(),
                message: "must include a local part".to_string(),
            }
        })?;

        Ok(Account {
            jid: jid.to_string(),
            resource: self.account.resource.clone(),
            nick: self.account.nick.clone().unwrap_or(local),
            priority: self.account.priority,
        })
    }
}

#[derive(Debug, Default, Clone)]
struct ConfigOverrides {
    jid: Option<String>,
    resource: Option<String>,
    log_level: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_resource() -> String {
    "parley".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_notification_capacity() -> usize {
    1024
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Load configuration from a file, merging environment variable overrides.
pub fn load_config_from(path: PathBuf) -> Result<SessionConfig, ConfigError> {
    load_config_from_with_overrides(path, config_overrides_from_env())
}

/// Parse configuration from a TOML string, merging environment variable
/// overrides.
pub fn load_config_from_str(toml_str: &str) -> Result<SessionConfig, ConfigError> {
    load_config_from_str_with_overrides(toml_str, config_overrides_from_env())
}

fn load_config_from_with_overrides(
    path: PathBuf,
    overrides: ConfigOverrides,
) -> Result<SessionConfig, ConfigError> {
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound { path });
        }
        Err(e) => return Err(ConfigError::Io(e)),
    };

    load_config_from_str_with_overrides(&contents, overrides)
}

fn load_config_from_str_with_overrides(
    toml_str: &str,
    overrides: ConfigOverrides,
) -> Result<SessionConfig, ConfigError> {
    let mut config: SessionConfig = toml::from_str(toml_str).map_err(|e| {
        let (line, column) = e.span().map_or((0, 0), |span| {
            let before = &toml_str[..span.start];
            let line = before.chars().filter(|&c| c == '\n').count() + 1;
            let column = before
                .rfind('\n')
                .map_or(span.start + 1, |nl| span.start - nl);
            (line, column)
        });
        ConfigError::InvalidToml {
            line,
            column,
            message: e.message().to_string(),
        }
    })?;

    apply_overrides(&mut config, overrides);
    validate(&config)?;

    Ok(config)
}

fn config_overrides_from_env() -> ConfigOverrides {
    ConfigOverrides {
        jid: std::env::var("PARLEY_JID").ok(),
        resource: std::env::var("PARLEY_RESOURCE").ok(),
        log_level: std::env::var("PARLEY_LOG_LEVEL").ok(),
    }
}

fn apply_overrides(config: &mut SessionConfig, overrides: ConfigOverrides) {
    if let Some(jid) = overrides.jid {
        config.account.jid = jid;
    }
    if let Some(resource) = overrides.resource {
        config.account.resource = resource;
    }
    if let Some(level) = overrides.log_level {
        config.logging.level = level;
    }
}

fn validate(config: &SessionConfig) -> Result<(), ConfigError> {
    let mut missing = Vec::new();

    if config.account.jid.trim().is_empty() {
        missing.push("account.jid".to_string());
    }
    if config.account.resource.trim().is_empty() {
        missing.push("account.resource".to_string());
    }

    if !missing.is_empty() {
        return Err(ConfigError::MissingRequiredFields { fields: missing });
    }

    config.account()?;

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    if config.dispatch.queue_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "dispatch.queue_capacity".to_string(),
            message: "must be greater than zero".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_without_env(toml_str: &str) -> Result<SessionConfig, ConfigError> {
        load_config_from_str_with_overrides(toml_str, ConfigOverrides::default())
    }

    fn minimal_toml() -> &'static str {
        r#"
[account]
jid = "user@example.com"
"#
    }

    #[test]
    fn parses_full_config() {
        let toml = r#"
[account]
jid = "user@example.com"
resource = "laptop"
priority = 10
nick = "juliet"

[presence.ranking]
chat = 0
available = 1

[channels]
file_transfer = false

[logging]
level = "debug"
json = true

[dispatch]
queue_capacity = 64
notification_capacity = 32
"#;
        let config = parse_without_env(toml).unwrap();
        assert_eq!(config.account.resource, "laptop");
        assert_eq!(config.account.priority, 10);
        assert!(!config.channels.file_transfer);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.dispatch.queue_capacity, 64);
        assert_eq!(config.dispatch.notification_capacity, 32);

        let ranking = config.ranking();
        assert_eq!(ranking.rank(Show::Chat), 0);
        assert_eq!(ranking.rank(Show::Available), 1);

        let account = config.account().unwrap();
        assert_eq!(account.nick, "juliet");
        assert_eq!(account.full_jid(), "user@example.com/laptop");
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_without_env(minimal_toml()).unwrap();
        assert_eq!(config.account.resource, "parley");
        assert_eq!(config.account.priority, 0);
        assert!(config.channels.file_transfer);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.dispatch.queue_capacity, 256);
        assert_eq!(config.ranking(), StatusRanking::default());
        assert_eq!(config.account().unwrap().nick, "user");
    }

    #[test]
    fn rejects_missing_jid() {
        let toml = r#"
[account]
jid = ""
"#;
        match parse_without_env(toml).unwrap_err() {
            ConfigError::MissingRequiredFields { fields } => {
                assert_eq!(fields, vec!["account.jid".to_string()]);
            }
            other => panic!("expected MissingRequiredFields, got: {other}"),
        }
    }

    #[test]
    fn rejects_jid_without_local_part() {
        let toml = r#"
[account]
jid = "example.com"
"#;
        match parse_without_env(toml).unwrap_err() {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "account.jid"),
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn rejects_invalid_log_level() {
        let toml = r#"
[account]
jid = "user@example.com"

[logging]
level = "verbose"
"#;
        match parse_without_env(toml).unwrap_err() {
            ConfigError::InvalidValue { field, message } => {
                assert_eq!(field, "logging.level");
                assert!(message.contains("trace"));
            }
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn rejects_unknown_status_keyword_in_ranking() {
        let toml = r#"
[account]
jid = "user@example.com"

[presence.ranking]
sleeping = 0
"#;
        assert!(matches!(
            parse_without_env(toml).unwrap_err(),
            ConfigError::InvalidToml { .. }
        ));
    }

    #[test]
    fn reports_toml_position() {
        let toml = "[account]\njid = \"user@example.com\"\npriority = \"high\"\n";
        match parse_without_env(toml).unwrap_err() {
            ConfigError::InvalidToml { line, .. } => assert_eq!(line, 3),
            other => panic!("expected InvalidToml, got: {other}"),
        }
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = ConfigOverrides {
            jid: Some("other@example.org".to_string()),
            resource: Some("phone".to_string()),
            log_level: Some("warn".to_string()),
        };
        let config = load_config_from_str_with_overrides(minimal_toml(), overrides).unwrap();
        assert_eq!(config.account.jid, "other@example.org");
        assert_eq!(config.account.resource, "phone");
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, minimal_toml()).unwrap();

        let config = load_config_from_with_overrides(path, ConfigOverrides::default()).unwrap();
        assert_eq!(config.account.jid, "user@example.com");
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            load_config_from_with_overrides(path, ConfigOverrides::default()),
            Err(ConfigError::FileNotFound { .. })
        ));
    }
}
