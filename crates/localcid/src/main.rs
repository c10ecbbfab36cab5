//! localcid - continuous testing agent
//!
//! Reads a TOML configuration listing repositories, then either monitors
//! them forever or tests each pinned pull request once.
//!
//! ## Commands
//!
//! - `monitor`: poll every repository and test new revisions (default)
//! - `test`: test the pinned pull request of every repository once
//! - `check`: validate the configuration and exit

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lang_env_manager::HostProvisioner;
use localci_core::{
    AgentConfig, DispatchMode, DispatchPolicy, GithubProvider, RepositoryMonitor, RevisionTester,
    ScpLogShipper, ValidatedRepo,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "localcid")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Continuous testing agent for GitHub repositories", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "LOCALCI_CONFIG",
        default_value = "/etc/localci/config.toml"
    )]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Run revision tests concurrently, overriding the configuration file
    #[arg(long, global = true)]
    parallel: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Monitor every configured repository
    Monitor,

    /// Test the pinned pull request of every repository once
    Test,

    /// Validate the configuration file and exit
    Check,
}

/// Validate every repository, dropping the ones that are misconfigured.
fn validated_repos(config: AgentConfig) -> Vec<ValidatedRepo> {
    config
        .repos
        .into_iter()
        .filter_map(|repo| {
            let url = repo.url.clone();
            let validated = match repo.validate() {
                Ok(validated) => validated,
                Err(e) => {
                    error!(repo = %url, error = %e, "Invalid repository configuration, not monitoring");
                    return None;
                }
            };
            if let Err(e) = validated.prepare_log_dir() {
                error!(repo = %url, error = %e, "Cannot prepare log directory, not monitoring");
                return None;
            }
            Some(validated)
        })
        .collect()
}

fn build_tester(repo: ValidatedRepo) -> Result<RevisionTester> {
    let provider = GithubProvider::new(&repo.url, repo.token.clone())
        .with_context(|| format!("Failed to create provider for {}", repo.url))?;
    let provisioner = HostProvisioner::new(repo.language);
    let shipper = repo.log_server.as_ref().map(ScpLogShipper::new);

    let tester = RevisionTester::new(Arc::new(repo), Arc::new(provider), Arc::new(provisioner));
    Ok(match shipper {
        Some(shipper) => tester.with_log_shipper(Arc::new(shipper)),
        None => tester,
    })
}

fn build_testers(repos: Vec<ValidatedRepo>) -> Vec<RevisionTester> {
    repos
        .into_iter()
        .filter_map(|repo| {
            let url = repo.url.clone();
            match build_tester(repo) {
                Ok(tester) => Some(tester),
                Err(e) => {
                    error!(repo = %url, error = %e, "Not monitoring repository");
                    None
                }
            }
        })
        .collect()
}

async fn cmd_monitor(testers: Vec<RevisionTester>, policy: DispatchPolicy) -> Result<()> {
    info!(repos = testers.len(), mode = ?policy.mode(), "localcid started");

    let mut monitors = JoinSet::new();
    for tester in testers {
        monitors.spawn(RepositoryMonitor::new(tester, policy.clone()).run());
    }

    while let Some(joined) = monitors.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Repository monitor stopped");
        }
    }
    Ok(())
}

async fn cmd_test(testers: Vec<RevisionTester>, policy: DispatchPolicy) -> Result<()> {
    let mut failures = 0usize;
    for tester in testers {
        let url = tester.repo().url.clone();
        let monitor = RepositoryMonitor::new(tester, policy.clone());
        match monitor.test_pinned().await {
            Ok(report) if report.success => info!(repo = %url, "Pull request passed"),
            Ok(_) => {
                warn!(repo = %url, "Pull request failed");
                failures += 1;
            }
            Err(e) => {
                error!(repo = %url, error = %e, "Pull request could not be tested");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} pull request test(s) failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    localci_core::init_tracing(cli.json, level);

    let config = AgentConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let policy = DispatchPolicy::new(DispatchMode::from_parallel(cli.parallel || config.parallel));

    let repos = validated_repos(config);
    if repos.is_empty() {
        bail!("No valid repository in {}", cli.config.display());
    }

    match cli.command.unwrap_or(Commands::Monitor) {
        Commands::Check => {
            for repo in &repos {
                info!(
                    repo = %repo.url,
                    language = %repo.language,
                    refresh = ?repo.refresh,
                    pinned_pr = ?repo.pinned_pr,
                    "Repository configuration is valid"
                );
            }
            Ok(())
        }
        Commands::Monitor => cmd_monitor(build_testers(repos), policy).await,
        Commands::Test => cmd_test(build_testers(repos), policy).await,
    }
}
