use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::action_ref::{ActionRef, RefType};
use crate::fetch::{FetchError, Fetcher};
use crate::graph::{issue_types, Issue, Severity};
use crate::version::{compare_versions, is_stale_by_date, major_component, VersionOrder};
use crate::workflow::NormalizedDefinition;

use super::{AsyncCheck, NodeContext};

/// When remote tag metadata is unavailable, majors below this floor are
/// still flagged as a lower-confidence signal.
pub const MODERN_MAJOR_FLOOR: u64 = 2;

/// Version/staleness checks that need remote metadata: tag refs are compared
/// against the latest published tag; hash pins against the commit date.
/// Lookup failures degrade to the coarse major-version floor rather than
/// going silent.
pub struct FreshnessCheck;

#[async_trait]
impl AsyncCheck for FreshnessCheck {
    fn name(&self) -> &'static str {
        "freshness"
    }

    async fn run(
        &self,
        def: &NormalizedDefinition,
        ctx: &NodeContext,
        fetcher: &dyn Fetcher,
    ) -> anyhow::Result<Vec<Issue>> {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut issues = Vec::new();

        for (raw, line) in def.component_refs() {
            let Ok(action) = raw.parse::<ActionRef>() else {
                continue;
            };
            if !seen.insert(action.dedup_key()) {
                continue;
            }

            match action.ref_type {
                RefType::Symbolic => {
                    if action.version().is_some() {
                        issues.extend(audit_tag_ref(&action, line, fetcher).await);
                    }
                }
                RefType::FullSha => {
                    issues.extend(audit_hash_ref(&action, line, ctx, fetcher).await);
                }
                RefType::ShortSha => {}
            }
        }

        Ok(issues)
    }
}

async fn audit_tag_ref(
    action: &ActionRef,
    line: Option<usize>,
    fetcher: &dyn Fetcher,
) -> Vec<Issue> {
    match fetcher.fetch_latest_tag(&action.owner, &action.repo).await {
        Ok(Some(latest)) => {
            if compare_versions(&action.git_ref, &latest.name) != VersionOrder::Less {
                return vec![];
            }
            let (Some(used), Some(available)) = (
                major_component(&action.git_ref),
                major_component(&latest.name),
            ) else {
                return vec![];
            };
            if available <= used {
                return vec![];
            }
            vec![
                Issue::new(
                    issue_types::OUTDATED_VERSION,
                    Severity::Medium,
                    format!(
                        "{} lags behind the latest release {}",
                        action, latest.name
                    ),
                )
                .with_evidence("reference", action.to_string())
                .with_evidence("used", action.git_ref.clone())
                .with_evidence("latest", latest.name.clone())
                .with_recommendation("Update to the current major release")
                .at_line(line),
            ]
        }
        Ok(None) => vec![],
        Err(e @ FetchError::NotFound(_)) => {
            debug!(action = %action, error = %e, "tag lookup not possible");
            vec![]
        }
        Err(e) => {
            warn!(action = %action, error = %e, "tag lookup failed, degrading to major-version floor");
            degraded_version_issue(action, line)
        }
    }
}

fn degraded_version_issue(action: &ActionRef, line: Option<usize>) -> Vec<Issue> {
    let Some(major) = major_component(&action.git_ref) else {
        return vec![];
    };
    if major >= MODERN_MAJOR_FLOOR {
        return vec![];
    }
    vec![
        Issue::new(
            issue_types::LEGACY_MAJOR_VERSION,
            Severity::Low,
            format!(
                "{} uses major version {major}; release metadata was unavailable, so this is a low-confidence staleness signal",
                action
            ),
        )
        .with_evidence("reference", action.to_string())
        .with_evidence("major", major)
        .with_recommendation("Verify the component's current release and update")
        .at_line(line),
    ]
}

async fn audit_hash_ref(
    action: &ActionRef,
    line: Option<usize>,
    ctx: &NodeContext,
    fetcher: &dyn Fetcher,
) -> Vec<Issue> {
    let date = match fetcher
        .fetch_commit_date(&action.owner, &action.repo, &action.git_ref)
        .await
    {
        Ok(Some(date)) => date,
        Ok(None) => return vec![],
        Err(e) => {
            // No version exists for a hash pin, so there is no coarse
            // fallback; the resolver's retry policy already ran.
            warn!(action = %action, error = %e, "commit date lookup failed");
            return vec![];
        }
    };

    let now = Utc::now();
    if !is_stale_by_date(date, now, ctx.stale_after) {
        return vec![];
    }
    let age_days = (now - date).num_days();
    vec![
        Issue::new(
            issue_types::STALE_PINNED_COMMIT,
            Severity::Medium,
            format!(
                "{} is pinned to a commit from {} ({age_days} days old)",
                action,
                date.format("%Y-%m-%d")
            ),
        )
        .with_evidence("reference", action.to_string())
        .with_evidence("commit_date", date.to_rfc3339())
        .with_evidence("age_days", age_days)
        .with_recommendation("Re-pin to a current commit of a maintained release")
        .at_line(line),
    ]
}
