use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the recipes binary.
#[derive(Debug, Parser)]
#[command(name = "recipes", version, about = "Recipe collection server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "RECIPES_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the recipe pages.
    Serve(Box<ServeArgs>),
    /// Print the access token for an identifier.
    #[command(name = "issue-token")]
    IssueToken(IssueTokenArgs),
    /// Write a new random key for token issuance.
    #[command(name = "init-tokens-key")]
    InitTokensKey(InitTokensKeyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct IssueTokenArgs {
    #[command(flatten)]
    pub tokens: TokensOverrides,

    /// Identifier the token is issued for.
    #[arg(value_name = "IDENTIFIER")]
    pub identifier: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InitTokensKeyArgs {
    #[command(flatten)]
    pub tokens: TokensOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct TokensOverrides {
    /// Override the tokens key file.
    #[arg(long = "tokens-key-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub key_file: Option<PathBuf>,

    /// Override the tokens file.
    #[arg(long = "tokens-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub tokens: TokensOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the URL prefix the site is served under.
    #[arg(long = "base-url", value_name = "PATH")]
    pub base_url: Option<String>,

    /// Serve over plain HTTP: the token cookie loses its `Secure` flag.
    #[arg(long = "disable-https", action = clap::ArgAction::SetTrue)]
    pub disable_https: bool,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the templates directory.
    #[arg(long = "templates-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub templates_dir: Option<PathBuf>,

    /// Override the recipes directory.
    #[arg(long = "recipes-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub recipes_dir: Option<PathBuf>,

    /// Override the static files directory.
    #[arg(long = "static-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub static_dir: Option<PathBuf>,

    /// Override the file watcher debounce interval.
    #[arg(long = "watcher-debounce-ms", value_name = "MS")]
    pub watcher_debounce_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
