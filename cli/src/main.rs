mod client;
mod import;
mod local;
mod sync;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::{Registry, RegistryClient};
use common::domain::skill::VersionBump;
use common::entities::packages::PackageKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "ClawHub registry command line", long_about = None)]
struct Cli {
    /// Registry base URL.
    #[arg(long, env = "CLAWHUB_REGISTRY", default_value = "http://localhost:3000", global = true)]
    registry: String,

    /// Bearer token used for authenticated calls.
    #[arg(long, env = "CLAWHUB_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish new or changed local skill folders
    Sync {
        /// Folder to scan; repeatable. Defaults to the current directory.
        #[arg(long = "root")]
        roots: Vec<PathBuf>,
        #[arg(long, default_value_t = sync::DEFAULT_CONCURRENCY)]
        concurrency: usize,
        #[arg(long)]
        dry_run: bool,
        /// patch, minor or major
        #[arg(long, default_value = "patch")]
        bump: VersionBump,
    },
    /// Import a skill from a GitHub repository
    Import {
        #[command(subcommand)]
        action: ImportAction,
    },
    /// Show the registry entry for a package
    Inspect {
        slug: String,
        #[arg(long, default_value = "skill")]
        kind: PackageKind,
    },
}

#[derive(Subcommand, Debug)]
enum ImportAction {
    /// List the skills found in a repository
    Preview { url: String },
    /// Show the files of one skill and the suggested slug and version
    Candidate {
        url: String,
        #[arg(long)]
        path: String,
    },
    /// Import one skill
    Run {
        url: String,
        #[arg(long)]
        path: String,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        version: Option<String>,
        /// File to include; repeatable. Defaults to the suggested selection.
        #[arg(long)]
        select: Vec<String>,
    },
}

async fn dispatch(cli: Cli) -> Result<()> {
    let client = RegistryClient::new(&cli.registry, cli.token)?;

    match cli.command {
        Commands::Sync {
            roots,
            concurrency,
            dry_run,
            bump,
        } => {
            let roots = if roots.is_empty() {
                vec![std::env::current_dir()?]
            } else {
                roots
            };
            let options = sync::SyncOptions {
                roots,
                concurrency: sync::clamp_concurrency(concurrency),
                dry_run,
                bump,
            };
            let report = sync::run(Arc::new(client), &options).await?;
            println!(
                "{} new, {} changed, {} synced, {} published, {} failed",
                report.new, report.changed, report.synced, report.published, report.failed
            );
            if report.failed > 0 {
                anyhow::bail!("{} skill(s) failed to sync", report.failed);
            }
        }
        Commands::Import { action } => match action {
            ImportAction::Preview { url } => {
                import::print_preview(&client.preview(&url).await?);
            }
            ImportAction::Candidate { url, path } => {
                import::print_candidate(&client.preview_candidate(&url, &path).await?);
            }
            ImportAction::Run {
                url,
                path,
                slug,
                version,
                select,
            } => {
                let args = import::RunArgs {
                    url,
                    path,
                    slug,
                    version,
                    select,
                };
                let result = import::run(&client, &args).await?;
                println!("Imported {}@{}", result.slug, result.version);
            }
        },
        Commands::Inspect { slug, kind } => match client.package(kind, &slug).await? {
            Some(detail) => println!("{}", serde_json::to_string_pretty(&detail)?),
            None => anyhow::bail!("{} {} not found", kind, slug),
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "clawhub=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dispatch(Cli::parse()).await
}
