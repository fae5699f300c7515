use crate::graph::{issue_types, Issue, Severity};
use crate::workflow::NormalizedDefinition;

use super::NodeContext;

const PRIVILEGED_TRIGGERS: &[&str] = &["pull_request_target", "workflow_run"];

/// Best practice: privileged triggers checking out contributor code, and
/// error suppression on steps that handle secrets.
pub fn check(def: &NormalizedDefinition, _ctx: &NodeContext) -> Vec<Issue> {
    let mut issues = Vec::new();

    let privileged: Vec<&str> = PRIVILEGED_TRIGGERS
        .iter()
        .copied()
        .filter(|t| def.has_trigger(t))
        .collect();

    for job in &def.jobs {
        for step in &job.steps {
            if !privileged.is_empty() {
                if let Some(uses) = &step.uses {
                    if uses.starts_with("actions/checkout@") {
                        let explicit_head = step
                            .with_ref
                            .as_deref()
                            .is_some_and(|r| r.contains("${{"));
                        let severity = if explicit_head {
                            Severity::High
                        } else {
                            Severity::Medium
                        };
                        issues.push(
                            Issue::new(
                                issue_types::DANGEROUS_TRIGGER,
                                severity,
                                format!(
                                    "job '{}' checks out contributor code under privileged trigger '{}'",
                                    job.id, privileged[0]
                                ),
                            )
                            .with_evidence("job", job.id.clone())
                            .with_evidence(
                                "triggers",
                                serde_json::Value::from(
                                    privileged.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
                                ),
                            )
                            .with_evidence("explicit_head_ref", explicit_head)
                            .with_recommendation(
                                "Split privileged work from untrusted checkout, or switch to the plain pull_request trigger",
                            )
                            .at_line(step.line),
                        );
                    }
                }
            }

            if step.continue_on_error && references_secrets(step.run.as_deref()) {
                issues.push(
                    Issue::new(
                        issue_types::CONTINUE_ON_ERROR,
                        Severity::Low,
                        format!(
                            "job '{}' suppresses failures on a step that handles secrets",
                            job.id
                        ),
                    )
                    .with_evidence("job", job.id.clone())
                    .with_recommendation("Let secret-handling steps fail loudly")
                    .at_line(step.line),
                );
            }
        }
    }

    issues
}

fn references_secrets(run: Option<&str>) -> bool {
    run.is_some_and(|r| r.contains("secrets."))
}
