use crate::graph::{issue_types, Issue, Severity};
use crate::workflow::NormalizedDefinition;

use super::NodeContext;

/// Expression contexts whose value is attacker-controlled on public repos.
const DANGEROUS_CONTEXTS: &[&str] = &[
    "github.event.issue.title",
    "github.event.issue.body",
    "github.event.pull_request.title",
    "github.event.pull_request.body",
    "github.event.comment.body",
    "github.event.review.body",
    "github.event.head_commit.message",
    "github.head_ref",
    "github.event.workflow_run.head_branch",
    "github.event.discussion.title",
    "github.event.discussion.body",
];

/// Script injection: an attacker-controlled context interpolated into `run`
/// text executes inside the shell with the job's token.
pub fn check(def: &NormalizedDefinition, _ctx: &NodeContext) -> Vec<Issue> {
    let mut issues = Vec::new();
    for job in &def.jobs {
        for step in &job.steps {
            let Some(run) = &step.run else { continue };
            if !run.contains("${{") {
                continue;
            }
            for context in DANGEROUS_CONTEXTS {
                if contains_expression(run, context) {
                    issues.push(
                        Issue::new(
                            issue_types::EXPRESSION_INJECTION,
                            Severity::Critical,
                            format!(
                                "job '{}' interpolates attacker-controlled '{}' into a run command",
                                job.id, context
                            ),
                        )
                        .with_evidence("job", job.id.clone())
                        .with_evidence("context", *context)
                        .with_recommendation(
                            "Assign the expression to an environment variable and reference that variable in the script",
                        )
                        .at_line(step.line),
                    );
                }
            }
        }
    }
    issues
}

/// True when `context` occurs inside a `${{ ... }}` expression in `run`.
fn contains_expression(run: &str, context: &str) -> bool {
    let mut rest = run;
    while let Some(start) = rest.find("${{") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("}}") else { return false };
        if after[..end].contains(context) {
            return true;
        }
        rest = &after[end + 2..];
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::context_with_trusted;
    use crate::workflow::normalize_document;

    fn run_check(yaml: &str) -> Vec<Issue> {
        check(&normalize_document(yaml).unwrap(), &context_with_trusted(&[]))
    }

    #[test]
    fn pr_title_in_run_is_critical() {
        let issues = run_check(
            "jobs:\n  greet:\n    steps:\n      - run: echo \"${{ github.event.pull_request.title }}\"\n",
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, issue_types::EXPRESSION_INJECTION);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert_eq!(issues[0].evidence["context"], "github.event.pull_request.title");
    }

    #[test]
    fn safe_context_is_not_flagged() {
        let issues = run_check("jobs:\n  build:\n    steps:\n      - run: echo ${{ github.sha }}\n");
        assert!(issues.is_empty());
    }

    #[test]
    fn dangerous_context_outside_expression_is_not_flagged() {
        let issues = run_check(
            "jobs:\n  docs:\n    steps:\n      - run: echo \"see github.event.issue.title docs\"\n",
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn head_ref_without_spaces_is_detected() {
        let issues =
            run_check("jobs:\n  a:\n    steps:\n      - run: git checkout ${{github.head_ref}}\n");
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn multiple_contexts_in_one_step_each_flagged() {
        let issues = run_check(
            "jobs:\n  a:\n    steps:\n      - run: echo ${{ github.event.issue.title }} ${{ github.event.comment.body }}\n",
        );
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn uses_only_steps_are_ignored() {
        let issues = run_check("jobs:\n  a:\n    steps:\n      - uses: acme/tool@v1\n");
        assert!(issues.is_empty());
    }
}
