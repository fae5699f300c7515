mod cli;
mod output;

use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use wfaudit::{resolve, resolve_local, AuditTarget, ResolveOptions, ResolvedGraph};

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.verbosity.tracing_level_filter().to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<i32> {
    let (owner, repo) = args.owner_repo()?;
    let target = AuditTarget::new(owner, repo, args.git_ref.clone());
    let options = ResolveOptions {
        token: args.token.clone(),
        max_concurrency: args.concurrency,
        max_depth: args.depth.to_max_depth(),
        deadline: args.deadline.map(Duration::from_secs),
        stale_after: chrono::Duration::days(args.stale_after_days),
        trusted_owners: args.trusted.clone(),
    };

    let graph = match &args.path {
        Some(dir) => {
            if !dir.is_dir() {
                anyhow::bail!("path not found: {}", dir.display());
            }
            debug!(path = %dir.display(), "auditing local checkout");
            resolve_local(dir.clone(), &target, options, None).await?
        }
        None => resolve(&target, options).await?,
    };

    let formatter = output::formatter(args.json, args.show_clean);
    formatter.write_report(&graph, &mut std::io::stdout().lock())?;

    if let Some(threshold) = args.fail_on {
        if worst_severity(&graph).is_some_and(|worst| worst >= threshold) {
            return Ok(2);
        }
    }
    Ok(0)
}

fn worst_severity(graph: &ResolvedGraph) -> Option<wfaudit::Severity> {
    graph.nodes().iter().filter_map(|n| n.max_severity()).max()
}
