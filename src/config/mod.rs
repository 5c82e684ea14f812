//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub use cli::{
    CliArgs, Command, InitTokensKeyArgs, IssueTokenArgs, ServeArgs, ServeOverrides,
    TokensOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "recipes";
const ENV_PREFIX: &str = "RECIPES";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_TEMPLATES_EXTENSION: &str = "html";
const DEFAULT_RECIPES_DIR: &str = "recipes";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_TOKENS_FILE: &str = "tokens.json";
const DEFAULT_TOKENS_KEY_FILE: &str = "tokens.key";
const DEFAULT_TOKENS_COOKIE_NAME: &str = "token";
const DEFAULT_WATCHER_DEBOUNCE_MS: u64 = 500;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub paths: PathSettings,
    pub tokens: TokenSettings,
    pub watcher: WatcherSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    /// URL prefix without a trailing slash; empty when served at the root.
    pub base_url: String,
    pub secure_cookies: bool,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct PathSettings {
    pub templates_dir: PathBuf,
    pub templates_extension: String,
    pub recipes_dir: PathBuf,
    pub static_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub file: PathBuf,
    pub key_file: PathBuf,
    pub cookie_name: String,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::IssueToken(args)) => raw.apply_tokens_overrides(&args.tokens),
        Some(Command::InitTokensKey(args)) => raw.apply_tokens_overrides(&args.tokens),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    paths: RawPathSettings,
    tokens: RawTokenSettings,
    watcher: RawWatcherSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(base_url) = overrides.base_url.as_ref() {
            self.server.base_url = Some(base_url.clone());
        }
        if overrides.disable_https {
            self.server.secure_cookies = Some(false);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(dir) = overrides.templates_dir.as_ref() {
            self.paths.templates_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.recipes_dir.as_ref() {
            self.paths.recipes_dir = Some(dir.clone());
        }
        if let Some(dir) = overrides.static_dir.as_ref() {
            self.paths.static_dir = Some(dir.clone());
        }
        if let Some(ms) = overrides.watcher_debounce_ms {
            self.watcher.debounce_ms = Some(ms);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_tokens_overrides(&overrides.tokens);
    }

    fn apply_tokens_overrides(&mut self, overrides: &TokensOverrides) {
        if let Some(path) = overrides.key_file.as_ref() {
            self.tokens.key_file = Some(path.clone());
        }
        if let Some(path) = overrides.file.as_ref() {
            self.tokens.file = Some(path.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            paths,
            tokens,
            watcher,
            logging,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            paths: build_path_settings(paths)?,
            tokens: build_token_settings(tokens)?,
            watcher: build_watcher_settings(watcher)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let base_url = normalize_base_url(server.base_url.as_deref().unwrap_or_default())
        .map_err(|reason| LoadError::invalid("server.base_url", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        base_url,
        secure_cookies: server.secure_cookies.unwrap_or(true),
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_path_settings(paths: RawPathSettings) -> Result<PathSettings, LoadError> {
    let templates_extension = paths
        .templates_extension
        .unwrap_or_else(|| DEFAULT_TEMPLATES_EXTENSION.to_string());
    let templates_extension = templates_extension.trim_start_matches('.').to_string();
    if templates_extension.is_empty() {
        return Err(LoadError::invalid(
            "paths.templates_extension",
            "must not be empty",
        ));
    }

    Ok(PathSettings {
        templates_dir: non_empty_path(paths.templates_dir, DEFAULT_TEMPLATES_DIR),
        templates_extension,
        recipes_dir: non_empty_path(paths.recipes_dir, DEFAULT_RECIPES_DIR),
        static_dir: non_empty_path(paths.static_dir, DEFAULT_STATIC_DIR),
    })
}

fn build_token_settings(tokens: RawTokenSettings) -> Result<TokenSettings, LoadError> {
    let cookie_name = tokens
        .cookie_name
        .unwrap_or_else(|| DEFAULT_TOKENS_COOKIE_NAME.to_string());
    let valid_cookie_name = !cookie_name.is_empty()
        && cookie_name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid_cookie_name {
        return Err(LoadError::invalid(
            "tokens.cookie_name",
            format!("`{cookie_name}` is not a valid cookie name"),
        ));
    }

    Ok(TokenSettings {
        file: non_empty_path(tokens.file, DEFAULT_TOKENS_FILE),
        key_file: non_empty_path(tokens.key_file, DEFAULT_TOKENS_KEY_FILE),
        cookie_name,
    })
}

fn build_watcher_settings(watcher: RawWatcherSettings) -> Result<WatcherSettings, LoadError> {
    let debounce_ms = watcher.debounce_ms.unwrap_or(DEFAULT_WATCHER_DEBOUNCE_MS);
    if debounce_ms == 0 {
        return Err(LoadError::invalid(
            "watcher.debounce_ms",
            "must be greater than zero",
        ));
    }
    Ok(WatcherSettings {
        debounce: Duration::from_millis(debounce_ms),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    base_url: Option<String>,
    secure_cookies: Option<bool>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPathSettings {
    templates_dir: Option<PathBuf>,
    templates_extension: Option<String>,
    recipes_dir: Option<PathBuf>,
    static_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTokenSettings {
    file: Option<PathBuf>,
    key_file: Option<PathBuf>,
    cookie_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWatcherSettings {
    debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_empty_path(value: Option<PathBuf>, default: &str) -> PathBuf {
    value
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(default))
}

fn normalize_base_url(value: &str) -> Result<String, String> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    if !trimmed.starts_with('/') {
        return Err(format!("`{trimmed}` must start with `/`"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests;
