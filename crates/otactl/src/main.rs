//! otactl - OTA firmware update CLI
//!
//! Looks up vendor manifests, checks whether a device has a newer image
//! published and stages updates to disk through the same coordinator a
//! gateway would run.

#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod device;
mod error;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use meshota_core::{ManifestStoreConfig, OtaConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{Context, IdentityArgs, UpdateArgs};
use crate::error::CliError;

#[derive(Parser)]
#[command(name = "otactl")]
#[command(about = "OTA firmware update control - check manifests and stage device updates")]
#[command(version)]
#[command(long_about = "
otactl resolves firmware images for mesh devices from vendor manifests.
It can list supported devices, inspect a manifest, check whether a device
identity has an update available and run a full update that writes the
verified image to a local file.

Use --json flag for machine-readable output suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for persisted manifests
    #[arg(long, global = true, env = "OTACTL_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Seconds a fetched manifest stays fresh
    #[arg(long, global = true, env = "OTACTL_MANIFEST_TTL", default_value_t = 3600)]
    ttl_secs: u64,

    /// Seconds allowed for a single manifest request
    #[arg(long, global = true, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List devices with built-in vendor support
    Devices,

    /// Fetch and print a manifest
    Manifest {
        /// Manifest URL (http, https or file)
        url: String,
    },

    /// Check whether a device has an update available
    Check(IdentityArgs),

    /// Download, verify and stage an update to a file
    Update(UpdateArgs),
}

impl Cli {
    fn config(&self) -> Result<OtaConfig, CliError> {
        if self.timeout_secs == 0 {
            return Err(CliError::InvalidArgument(
                "--timeout-secs must be positive".to_string(),
            ));
        }
        let mut manifest = ManifestStoreConfig::default()
            .with_ttl(Duration::from_secs(self.ttl_secs))
            .with_request_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(dir) = &self.cache_dir {
            manifest = manifest.with_persist_dir(dir.clone());
        }
        let config = OtaConfig {
            manifest,
            ..OtaConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("otactl={log_level},meshota_core={log_level},meshota_vendors={log_level}")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match execute_command(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }

            let code = e
                .downcast_ref::<CliError>()
                .map(CliError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    let ctx = Context {
        json: cli.json,
        config: cli.config()?,
    };

    match &cli.command {
        Commands::Devices => commands::devices::execute(ctx.json).await,
        Commands::Manifest { url } => commands::manifest::execute(url, &ctx).await,
        Commands::Check(args) => commands::check::execute(args, &ctx).await,
        Commands::Update(args) => commands::update::execute(args, &ctx).await,
    }
}
