use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// vhostmux CLI application
///
/// `-h` and `-V` are left to the server binary, so help is `--mux-help`.
#[derive(Parser, Debug)]
#[command(name = "vhostmux")]
#[command(about = "Run one web-server instance per vhost behind a generated reverse proxy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// JSON config file (default: the per-user vhostmux config, if present)
    #[arg(long = "mux-config", value_name = "PATH")]
    pub mux_config: Option<PathBuf>,

    /// Print help
    #[arg(long = "mux-help", action = ArgAction::Help)]
    pub help: Option<bool>,

    /// Arguments forwarded to every server instance. Without any, the next
    /// free port is printed and nothing else happens.
    #[arg(
        value_name = "SERVER_ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub server_args: Vec<String>,
}

impl Cli {
    /// Suggest mode: no arguments for the server
    pub fn is_suggest(&self) -> bool {
        self.server_args.is_empty()
    }
}
