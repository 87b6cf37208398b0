// Configuration loading and parsing (config/bunutan.toml).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Name of the configuration file inside `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "bunutan.toml";

/// Environment variable that overrides `server.port`.
pub const PORT_ENV: &str = "PORT";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// bunutan.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub roster: RosterConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub draw: DrawConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    /// The one identity allowed to reset the draw. Also allowed to draw.
    pub admin: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Seed items, in the order they are offered.
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrawConfig {
    /// Fixed RNG seed for reproducible draws. Thread RNG when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/bunutan.toml` relative to `base_dir`.
///
/// Does not copy defaults and ignores the environment; see [`load_config`].
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config = parse_config(&text, &path)?;
    validate(&config)?;
    Ok(config)
}

/// Parse config text. `path` is only used for error reporting.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Ensure all config files exist by copying missing ones from `defaults/`.
/// Returns the list of files that were copied. Skips `.example` files.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.exists() {
        if !config_dir.exists() {
            return Err(ConfigError::DefaultsCopyError {
                message: format!(
                    "neither defaults/ nor config/ directory found in {}; \
                     run from the server crate directory or ensure defaults/ is present",
                    base_dir.display()
                ),
            });
        }
        return Ok(vec![]);
    }

    std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to create config directory: {e}"),
    })?;

    let entries = std::fs::read_dir(&defaults_dir).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to read defaults directory: {e}"),
    })?;

    let mut copied = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to read defaults entry: {e}"),
        })?;
        let path = entry.path();

        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if file_name.to_str().is_some_and(|n| n.ends_with(".example")) {
            continue;
        }
        let target = config_dir.join(file_name);

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
        {
            Ok(mut dest) => {
                let content = std::fs::read(&path).map_err(|e| ConfigError::DefaultsCopyError {
                    message: format!("failed to read {}: {e}", path.display()),
                })?;
                std::io::Write::write_all(&mut dest, &content).map_err(|e| {
                    ConfigError::DefaultsCopyError {
                        message: format!("failed to write {}: {e}", target.display()),
                    }
                })?;
                copied.push(target);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(ConfigError::DefaultsCopyError {
                    message: format!("failed to create {}: {e}", target.display()),
                });
            }
        }
    }

    Ok(copied)
}

/// Loads config relative to the current working directory, copying defaults
/// first and applying the `PORT` override.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    apply_port_override(&mut config, std::env::var(PORT_ENV).ok().as_deref())?;
    Ok(config)
}

/// Replace `server.port` with `value` when one is given.
pub fn apply_port_override(config: &mut Config, value: Option<&str>) -> Result<(), ConfigError> {
    let Some(raw) = value else {
        return Ok(());
    };
    let port: u16 = raw.trim().parse().map_err(|_| ConfigError::ValidationError {
        field: PORT_ENV.into(),
        message: format!("not a valid port number: {raw:?}"),
    })?;
    if port == 0 {
        return Err(ConfigError::ValidationError {
            field: PORT_ENV.into(),
            message: "must be greater than 0".into(),
        });
    }
    config.server.port = port;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port", "must be greater than 0"));
    }

    // Roster: non-blank, unique under case-folding, admin included.
    if config.roster.admin.trim().is_empty() {
        return Err(invalid("roster.admin", "must not be blank"));
    }
    let mut seen = HashSet::new();
    seen.insert(bunutan_core::roster::fold(config.roster.admin.trim()));
    for (i, name) in config.roster.participants.iter().enumerate() {
        let field = format!("roster.participants[{i}]");
        if name.trim().is_empty() {
            return Err(invalid(field, "must not be blank"));
        }
        if !seen.insert(bunutan_core::roster::fold(name.trim())) {
            return Err(invalid(field, format!("duplicate roster entry {name:?}")));
        }
    }

    // Pool: at least one item, none blank, none repeated.
    if config.pool.items.is_empty() {
        return Err(invalid("pool.items", "must contain at least one item"));
    }
    let mut items = HashSet::new();
    for (i, item) in config.pool.items.iter().enumerate() {
        let field = format!("pool.items[{i}]");
        if item.trim().is_empty() {
            return Err(invalid(field, "must not be blank"));
        }
        if !items.insert(item.as_str()) {
            return Err(invalid(field, format!("duplicate item {item:?}")));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
