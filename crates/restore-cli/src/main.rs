use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use restore_core::TenantScope;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::*;
use config::Config;

#[derive(Parser)]
#[command(name = "restorectl")]
#[command(author, version, about = "Pre-split and scatter restore spans across a cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split and scatter the entries of a spec file
    Run {
        /// Spec file (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Cluster node ids, overriding the configuration
        #[arg(short, long, value_delimiter = ',')]
        nodes: Option<Vec<u32>>,

        /// Tenant executing the restore
        #[arg(short, long, value_enum, default_value = "system")]
        tenant: TenantArg,

        /// Tenant id when running as a secondary tenant
        #[arg(long, default_value = "2")]
        tenant_id: u64,
    },

    /// Print the encoded routing span of each node
    Routes {
        /// Node ids
        #[arg(short, long, value_delimiter = ',', default_value = "1,2,3")]
        nodes: Vec<u32>,
    },

    /// Write a synthetic spec file
    SampleSpec {
        /// Output file
        #[arg(short, long, default_value = "spec.json")]
        output: PathBuf,

        /// Number of chunks
        #[arg(short, long, default_value = "4")]
        chunks: usize,

        /// Entries per chunk
        #[arg(short, long, default_value = "8")]
        entries: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TenantArg {
    System,
    Secondary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Run {
            spec,
            nodes,
            tenant,
            tenant_id,
        } => {
            let nodes = nodes.unwrap_or_else(|| config.nodes.clone());
            let tenant = match tenant {
                TenantArg::System => TenantScope::System,
                TenantArg::Secondary => TenantScope::Secondary(tenant_id),
            };
            if !tenant.owns_keyspace() {
                println!(
                    "{}",
                    "Secondary tenant: ranges are not split, rows go to the local stream"
                        .bright_black()
                );
            }
            run_stage(&spec, &nodes, tenant, &config).await?;
        }
        Commands::Routes { nodes } => {
            show_routes(&nodes)?;
        }
        Commands::SampleSpec {
            output,
            chunks,
            entries,
        } => {
            write_sample_spec(&output, chunks, entries)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "restore_cli=debug,restore_scatter=debug,restore_core=debug"
    } else {
        "restore_cli=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
