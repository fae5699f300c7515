use crate::graph::{issue_types, Issue, Severity};
use crate::workflow::NormalizedDefinition;

use super::NodeContext;

/// Trigger events an external contributor can fire against the repository.
pub const FORK_REACHABLE_TRIGGERS: &[&str] = &[
    "pull_request",
    "pull_request_target",
    "issue_comment",
    "workflow_run",
];

/// Runner exposure: a self-hosted runner executing fork-reachable workloads
/// hands persistent infrastructure to whoever opens a pull request.
pub fn check(def: &NormalizedDefinition, _ctx: &NodeContext) -> Vec<Issue> {
    let fork_reachable = FORK_REACHABLE_TRIGGERS
        .iter()
        .any(|trigger| def.has_trigger(trigger));

    let mut issues = Vec::new();
    for job in &def.jobs {
        if !job.runs_on.iter().any(|label| label == "self-hosted") {
            continue;
        }
        let severity = if fork_reachable {
            Severity::High
        } else {
            Severity::Medium
        };
        let mut issue = Issue::new(
            issue_types::SELF_HOSTED_RUNNER,
            severity,
            format!("job '{}' runs on a self-hosted runner", job.id),
        )
        .with_evidence("job", job.id.clone())
        .with_evidence(
            "labels",
            serde_json::Value::from(job.runs_on.clone()),
        )
        .with_recommendation(
            "Use ephemeral hosted runners, or restrict self-hosted runners to trusted, non-fork triggers",
        );
        if fork_reachable {
            issue = issue.with_evidence(
                "fork_reachable_triggers",
                serde_json::Value::from(
                    def.triggers
                        .iter()
                        .filter(|t| FORK_REACHABLE_TRIGGERS.contains(&t.as_str()))
                        .cloned()
                        .collect::<Vec<_>>(),
                ),
            );
        }
        issues.push(issue);
    }
    issues
}
