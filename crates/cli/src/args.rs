pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(about = "Encrypted, versioned, content-addressed object vault")]
#[command(version)]
pub struct Args {
    /// Path to the cairn state directory (defaults to ~/.cairn)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
