use std::collections::BTreeSet;

use crate::action_ref::ActionRef;
use crate::graph::{issue_types, Issue, Severity};
use crate::workflow::NormalizedDefinition;

use super::NodeContext;

/// Supply chain: components from publishers outside the configured trust
/// list get one issue per distinct owner.
pub fn check(def: &NormalizedDefinition, ctx: &NodeContext) -> Vec<Issue> {
    let mut flagged: BTreeSet<String> = BTreeSet::new();
    let mut issues = Vec::new();

    for (raw, line) in def.component_refs() {
        let Ok(action) = raw.parse::<ActionRef>() else {
            continue;
        };
        let owner_key = action.owner.to_ascii_lowercase();
        if ctx.trusted(&action.owner) || flagged.contains(&owner_key) {
            continue;
        }
        flagged.insert(owner_key);
        issues.push(
            Issue::new(
                issue_types::UNTRUSTED_PUBLISHER,
                Severity::Medium,
                format!("component publisher '{}' is not on the trusted list", action.owner),
            )
            .with_evidence("owner", action.owner.clone())
            .with_evidence("reference", raw.clone())
            .with_recommendation(
                "Review the publisher, then either add it to the trusted list or replace the component",
            )
            .at_line(line),
        );
    }

    issues
}
