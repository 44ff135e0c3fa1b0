use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the gateway binary.
#[derive(Debug, Parser)]
#[command(name = "gatewayd", version, about = "Anthropic-compatible API gateway")]
pub struct Args {
    /// Path to the TOML settings file.
    #[arg(short, long, env = "GATEWAYD_CONFIG", default_value = "gatewayd.toml")]
    pub config: PathBuf,

    /// Log filter string, e.g. `info` or `gatewayd=debug,llm=trace`.
    #[arg(long, env = "GATEWAYD_LOG", default_value = "info")]
    pub log_filter: String,
}
