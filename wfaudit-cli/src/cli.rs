use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::bail;
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use wfaudit::Severity;

/// Audit a repository's CI automation tree for security issues
#[derive(Parser)]
#[command(name = "wfaudit", version)]
pub struct Cli {
    /// Repository to audit, as owner/repo
    #[arg(value_name = "OWNER/REPO", required_unless_present = "path")]
    pub target: Option<String>,

    /// Git ref of the audited repository
    #[arg(long = "ref", default_value = "HEAD", value_name = "REF")]
    pub git_ref: String,

    /// Audit a local checkout instead of fetching from GitHub
    #[arg(long, value_name = "DIR")]
    pub path: Option<PathBuf>,

    /// GitHub API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// How deeply to expand transitive components: a number or "unlimited"
    #[arg(long, default_value_t = DepthLimit::Unlimited)]
    pub depth: DepthLimit,

    /// Wall-clock budget for resolution, in seconds
    #[arg(long, value_name = "SECONDS")]
    pub deadline: Option<u64>,

    /// Publisher owner exempt from the untrusted-publisher rule (repeatable)
    #[arg(long = "trust", value_name = "OWNER")]
    pub trusted: Vec<String>,

    /// Days after which a hash-pinned commit counts as stale
    #[arg(long, default_value_t = 540, value_name = "DAYS")]
    pub stale_after_days: i64,

    /// Concurrent in-flight fetches
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,

    /// Emit the full annotated graph as JSON
    #[arg(long)]
    pub json: bool,

    /// Also list nodes with no findings in text output
    #[arg(long)]
    pub show_clean: bool,

    /// Exit with status 2 when any finding reaches this severity
    #[arg(long, value_name = "SEVERITY", value_parser = parse_severity)]
    pub fail_on: Option<Severity>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,
}

impl Cli {
    /// The audited repository's owner and name. Local audits without an
    /// explicit target get a placeholder identity.
    pub fn owner_repo(&self) -> anyhow::Result<(String, String)> {
        let Some(target) = &self.target else {
            return Ok(("local".to_string(), "checkout".to_string()));
        };
        match target.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok((owner.to_string(), repo.to_string()))
            }
            _ => bail!("invalid target {target:?} (expected owner/repo)"),
        }
    }
}

fn parse_severity(s: &str) -> anyhow::Result<Severity> {
    match s.to_ascii_lowercase().as_str() {
        "low" => Ok(Severity::Low),
        "medium" => Ok(Severity::Medium),
        "high" => Ok(Severity::High),
        "critical" => Ok(Severity::Critical),
        _ => bail!("invalid severity {s:?} (expected low, medium, high, or critical)"),
    }
}

/// Controls how deeply the resolver expands transitive components.
///
/// Valid inputs: any non-negative integer for a bounded depth, or
/// `"unlimited"` (case-insensitive) for no limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepthLimit {
    Bounded(usize),
    Unlimited,
}

impl DepthLimit {
    /// `Bounded(n)` returns `Some(n)`; `Unlimited` returns `None`.
    pub fn to_max_depth(&self) -> Option<usize> {
        match self {
            DepthLimit::Bounded(n) => Some(*n),
            DepthLimit::Unlimited => None,
        }
    }
}

impl fmt::Display for DepthLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepthLimit::Bounded(n) => write!(f, "{n}"),
            DepthLimit::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl FromStr for DepthLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(DepthLimit::Unlimited);
        }
        match s.parse::<usize>() {
            Ok(n) => Ok(DepthLimit::Bounded(n)),
            Err(_) => bail!(
                "invalid depth limit: {s:?} (expected a non-negative integer or \"unlimited\")"
            ),
        }
    }
}
