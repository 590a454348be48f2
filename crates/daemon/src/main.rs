mod cli;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Bucket, Mount, Prefix, Version};
use tracing_appender::non_blocking::WorkerGuard;

use csi_s3_daemon::process::init_logging;
use csi_s3_daemon::DriverConfig;

command_enum! {
    (Bucket, Bucket),
    (Mount, Mount),
    (Prefix, Prefix),
    (Version, Version),
}

/// Load the driver configuration and install logging.
fn bootstrap(args: &Args) -> anyhow::Result<(DriverConfig, Vec<WorkerGuard>)> {
    let config =
        DriverConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let guards = init_logging(&config).context("failed to initialize logging")?;
    Ok((config, guards))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (config, guards) = match bootstrap(&args) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let ctx = cli::op::OpContext::new(config);

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            1
        }
    };

    // flush the non-blocking writers before exiting
    drop(guards);
    std::process::exit(code);
}
