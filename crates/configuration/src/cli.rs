use clap::Args;
use std::path::PathBuf;

/// Command-line arguments shared by every binary that loads a `Config`.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c', default_value = "sentinel.toml", global = true)]
    pub config: PathBuf,

    /// Overrides `logging.level` (ignored when RUST_LOG is set).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}
