use crate::action_ref::{ActionRef, RefType};
use crate::graph::{issue_types, Issue, Severity};
use crate::workflow::NormalizedDefinition;

use super::NodeContext;

/// Pinning/immutability: every third-party reference should be bound to a
/// full commit hash. Symbolic refs from untrusted owners are worse than the
/// same refs from trusted ones.
pub fn check(def: &NormalizedDefinition, ctx: &NodeContext) -> Vec<Issue> {
    let mut issues = Vec::new();
    for (raw, line) in def.component_refs() {
        let Ok(action) = raw.parse::<ActionRef>() else {
            continue;
        };
        match action.ref_type {
            RefType::FullSha => {}
            RefType::ShortSha => {
                issues.push(
                    Issue::new(
                        issue_types::SHORT_HASH_PIN,
                        Severity::Medium,
                        format!("{} is pinned to an abbreviated commit hash", action),
                    )
                    .with_evidence("reference", raw.clone())
                    .with_evidence("ref", action.git_ref.clone())
                    .with_recommendation("Pin to the full 40-character commit hash")
                    .at_line(line),
                );
            }
            RefType::Symbolic => {
                let severity = if ctx.trusted(&action.owner) {
                    Severity::Medium
                } else {
                    Severity::High
                };
                issues.push(
                    Issue::new(
                        issue_types::UNPINNED_MUTABLE_REF,
                        severity,
                        format!("{} uses a mutable ref '{}'", action, action.git_ref),
                    )
                    .with_evidence("reference", raw.clone())
                    .with_evidence("owner", action.owner.clone())
                    .with_evidence("ref", action.git_ref.clone())
                    .with_recommendation(
                        "Pin the reference to a full commit hash so the resolved code cannot change",
                    )
                    .at_line(line),
                );
            }
        }
    }
    issues
}
