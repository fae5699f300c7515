use crate::graph::{issue_types, Issue, Severity};
use crate::workflow::NormalizedDefinition;

use super::NodeContext;

/// Secrets exposure: interpolating `${{ secrets.* }}` directly into shell
/// text puts the value into the process argument list and logs; passing the
/// whole secret store to a reusable workflow widens the blast radius.
pub fn check(def: &NormalizedDefinition, _ctx: &NodeContext) -> Vec<Issue> {
    let mut issues = Vec::new();

    for job in &def.jobs {
        if job.secrets_inherit {
            issues.push(
                Issue::new(
                    issue_types::SECRETS_INHERIT,
                    Severity::Medium,
                    format!("job '{}' forwards all secrets with 'secrets: inherit'", job.id),
                )
                .with_evidence("job", job.id.clone())
                .with_recommendation("Pass only the specific secrets the called workflow needs"),
            );
        }

        for step in &job.steps {
            let Some(run) = &step.run else { continue };
            for secret in interpolated_secrets(run) {
                issues.push(
                    Issue::new(
                        issue_types::SECRET_IN_RUN,
                        Severity::High,
                        format!(
                            "job '{}' interpolates secret '{}' directly into a run command",
                            job.id, secret
                        ),
                    )
                    .with_evidence("job", job.id.clone())
                    .with_evidence("secret", secret)
                    .with_recommendation(
                        "Pass the secret through `env:` and reference the environment variable instead",
                    )
                    .at_line(step.line),
                );
            }
        }
    }

    issues
}

/// Secret names referenced as `${{ secrets.NAME }}` inside expression text.
fn interpolated_secrets(run: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = run;
    while let Some(start) = rest.find("${{") {
        let after = &rest[start + 3..];
        let Some(end) = after.find("}}") else { break };
        let expr = after[..end].trim();
        if let Some(name) = expr.strip_prefix("secrets.") {
            let name: String = name
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        rest = &after[end + 2..];
    }
    names
}
