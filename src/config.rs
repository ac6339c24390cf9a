use chrono::FixedOffset;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const CONFIG_PATH_ENV: &str = "CARESTORE_CONFIG";

const MAX_OFFSET_MINUTES: i32 = 18 * 60;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub clock: ClockConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub seed_users: Vec<SeedUser>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3030,
        }
    }
}

impl ApiConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClockConfig {
    /// Offset of the users' wall clock from UTC, used for dose times.
    pub utc_offset_minutes: i32,
}

impl ClockConfig {
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            ConfigError::Invalid(format!("clock.utc_offset_minutes {} is out of range", self.utc_offset_minutes))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub json: bool,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            json: false,
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Bearer token -> user id.
    pub tokens: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedUser {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub diseases: Vec<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, io::Error),
    Parse(serde_yaml::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Failed to read {}: {}", path.display(), e),
            ConfigError::Parse(e) => write!(f, "Invalid configuration file: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(error: serde_yaml::Error) -> Self {
        ConfigError::Parse(error)
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.port == 0 {
            return Err(ConfigError::Invalid("api.port must not be 0".to_string()));
        }
        if self.clock.utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "clock.utc_offset_minutes must be within ±{}",
                MAX_OFFSET_MINUTES
            )));
        }
        if self.storage.backend == Backend::File && self.storage.path.is_none() {
            return Err(ConfigError::Invalid("storage.path is required for the file backend".to_string()));
        }
        // User ids become one segment of `<kind>:<owner>:<n>` keys.
        for (token, user) in &self.auth.tokens {
            if user.trim().is_empty() || user.contains(':') {
                return Err(ConfigError::Invalid(format!(
                    "auth.tokens.{}: user id {:?} must be non-blank and must not contain ':'",
                    token, user
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_config(raw: &str) -> Result<Config, ConfigError> {
    // An empty document deserializes to unit, not to an all-defaults map.
    if raw.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Read and validate `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_config(&raw),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(ConfigError::Io(path.to_path_buf(), e)),
    }
}

/// `CARESTORE_CONFIG` when set, `config.yaml` otherwise.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_when_empty_or_missing() {
        assert_eq!(parse_config("").unwrap(), Config::default());
        let missing = load_config(Path::new("/definitely/not/here.yaml")).unwrap();
        assert_eq!(missing.api.port, 3030);
        assert_eq!(missing.storage.backend, Backend::Memory);
    }

    #[test]
    fn parses_a_full_document() {
        let raw = r#"
storage:
  backend: file
  path: ./data
api:
  host: 0.0.0.0
  port: 8080
clock:
  utc_offset_minutes: 540
logging:
  json: true
  filter: carestore=debug
auth:
  tokens:
    dev-token: demo-user
seed_users:
  - email: kim@example.com
    password: password123
    name: 김철수
    age: 65
    diseases: [diabetes, hypertension]
    token: kim-token
"#;
        let config = parse_config(raw).unwrap();
        assert_eq!(config.storage.backend, Backend::File);
        assert_eq!(config.storage.path, Some(PathBuf::from("./data")));
        assert_eq!(config.api.addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.clock.offset().unwrap().local_minus_utc(), 9 * 3600);
        assert!(config.logging.json);
        assert_eq!(config.auth.tokens.get("dev-token").map(String::as_str), Some("demo-user"));
        assert_eq!(config.seed_users[0].diseases, vec!["diabetes", "hypertension"]);
        assert_eq!(config.seed_users[0].token.as_deref(), Some("kim-token"));
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(parse_config("api:\n  port: 0\n"), Err(ConfigError::Invalid(_))));
        assert!(matches!(
            parse_config("clock:\n  utc_offset_minutes: 1200\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(parse_config("storage:\n  backend: file\n"), Err(ConfigError::Invalid(_))));
        assert!(matches!(parse_config("unknown: 1\n"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn rejects_token_user_ids_that_break_key_prefixes() {
        assert!(matches!(
            parse_config("auth:\n  tokens:\n    t1: \"u1:x\"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            parse_config("auth:\n  tokens:\n    t1: \" \"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(parse_config("auth:\n  tokens:\n    t1: demo-user\n").is_ok());
    }
}
