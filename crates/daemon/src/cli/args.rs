pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "csi-s3")]
#[command(about = "Mount and provision S3-backed Kubernetes volumes")]
pub struct Args {
    /// Driver configuration file (defaults to /etc/csi-s3/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
