use crate::graph::{issue_types, Issue, Severity};
use crate::workflow::{DefinitionKind, NormalizedDefinition, Permissions};

use super::NodeContext;

/// Permission surface: `write-all` grants everything to every step,
/// scoped writes are still broad, and a missing block falls back to the
/// repository default (often read-write on older repos).
pub fn check(def: &NormalizedDefinition, _ctx: &NodeContext) -> Vec<Issue> {
    let mut issues = Vec::new();

    audit_block(&def.permissions, "workflow", &mut issues);
    for job in &def.jobs {
        audit_block(&job.permissions, &job.id, &mut issues);
    }

    let nothing_declared = !def.permissions.is_specified()
        && def.jobs.iter().all(|j| !j.permissions.is_specified());
    if def.kind == DefinitionKind::Workflow && nothing_declared {
        issues.push(
            Issue::new(
                issue_types::MISSING_PERMISSIONS,
                Severity::Low,
                "no permissions block declared; the workflow runs with the repository default token scope",
            )
            .with_recommendation("Declare `permissions: contents: read` at the workflow level"),
        );
    }

    issues
}

fn audit_block(permissions: &Permissions, scope_label: &str, issues: &mut Vec<Issue>) {
    match permissions {
        Permissions::WriteAll => {
            issues.push(
                Issue::new(
                    issue_types::EXCESSIVE_PERMISSIONS,
                    Severity::Critical,
                    format!("'{scope_label}' grants write-all permissions"),
                )
                .with_evidence("scope", scope_label)
                .with_evidence("grant", "write-all")
                .with_recommendation("Replace write-all with the minimal scoped grants each job needs"),
            );
        }
        Permissions::Scoped(_) => {
            let writes = permissions.write_scopes();
            if !writes.is_empty() {
                issues.push(
                    Issue::new(
                        issue_types::EXCESSIVE_PERMISSIONS,
                        Severity::High,
                        format!(
                            "'{scope_label}' grants write access to: {}",
                            writes.join(", ")
                        ),
                    )
                    .with_evidence("scope", scope_label)
                    .with_evidence(
                        "grant",
                        serde_json::Value::from(
                            writes.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                        ),
                    )
                    .with_recommendation("Keep write grants only on the jobs that publish"),
                );
            }
        }
        Permissions::ReadAll | Permissions::Unspecified => {}
    }
}
