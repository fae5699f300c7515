use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use futures::future::join_all;
use tracing::warn;

use crate::action_ref::ActionRef;
use crate::fetch::Fetcher;
use crate::graph::{issue_types, Issue, NodeKind, ResolvedGraph, Severity};
use crate::workflow::NormalizedDefinition;

pub mod best_practice;
pub mod consistency;
pub mod freshness;
pub mod injection;
pub mod permissions;
pub mod pinning;
pub mod runner;
pub mod secrets;
pub mod supply_chain;

/// Trusted-publisher predicate, injected by the caller at construction.
pub type TrustedPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Per-node inputs shared by every check besides the document itself.
#[derive(Clone)]
pub struct NodeContext {
    pub kind: NodeKind,
    /// The node's own reference; `None` for the Origin and for definitions
    /// addressed by path.
    pub action: Option<ActionRef>,
    pub is_trusted: TrustedPredicate,
    /// Age beyond which a hash-pinned commit counts as stale.
    pub stale_after: Duration,
}

impl NodeContext {
    pub fn trusted(&self, owner: &str) -> bool {
        (self.is_trusted)(owner)
    }
}

/// Pure, synchronous check. Must not perform I/O.
pub type SyncCheck = fn(&NormalizedDefinition, &NodeContext) -> Vec<Issue>;

/// Check that needs remote metadata. Receives the fetch layer as a
/// capability; must not touch any other shared state.
#[async_trait]
pub trait AsyncCheck: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(
        &self,
        def: &NormalizedDefinition,
        ctx: &NodeContext,
        fetcher: &dyn Fetcher,
    ) -> anyhow::Result<Vec<Issue>>;
}

/// Whole-graph check, run once after resolution completes. Output is
/// attached to the Origin node.
pub type GraphCheck = fn(&ResolvedGraph) -> Vec<Issue>;

/// Fixed registry of named check functions. Registration order determines
/// the order of issues on a node, regardless of async completion order.
pub struct CheckRegistry {
    sync_checks: Vec<(&'static str, SyncCheck)>,
    async_checks: Vec<Box<dyn AsyncCheck>>,
    graph_checks: Vec<(&'static str, GraphCheck)>,
}

impl CheckRegistry {
    /// The standard registry, in its canonical category order.
    pub fn standard() -> Self {
        Self {
            sync_checks: vec![
                ("pinning", pinning::check),
                ("permissions", permissions::check),
                ("secrets", secrets::check),
                ("injection", injection::check),
                ("supply_chain", supply_chain::check),
                ("runner", runner::check),
                ("best_practice", best_practice::check),
            ],
            async_checks: vec![Box::new(freshness::FreshnessCheck)],
            graph_checks: vec![("consistency", consistency::check)],
        }
    }

    pub fn empty() -> Self {
        Self {
            sync_checks: vec![],
            async_checks: vec![],
            graph_checks: vec![],
        }
    }

    pub fn sync_names(&self) -> Vec<&'static str> {
        self.sync_checks.iter().map(|(name, _)| *name).collect()
    }

    /// Run every synchronous check in registration order. A panicking check
    /// is isolated into a `check_internal_error` diagnostic and the
    /// remaining checks still run.
    pub fn run_sync(&self, def: &NormalizedDefinition, ctx: &NodeContext) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (name, check) in &self.sync_checks {
            match catch_unwind(AssertUnwindSafe(|| check(def, ctx))) {
                Ok(found) => issues.extend(found),
                Err(_) => {
                    warn!(check = name, "check panicked, continuing with remaining checks");
                    issues.push(internal_error_issue(name));
                }
            }
        }
        issues
    }

    /// Run every async check concurrently, then buffer and flatten results
    /// in registration order so node output is deterministic. A failing
    /// check becomes a `check_internal_error` diagnostic.
    pub async fn run_async(
        &self,
        def: &NormalizedDefinition,
        ctx: &NodeContext,
        fetcher: &dyn Fetcher,
    ) -> Vec<Issue> {
        let results = join_all(
            self.async_checks
                .iter()
                .map(|check| check.run(def, ctx, fetcher)),
        )
        .await;

        let mut issues = Vec::new();
        for (check, result) in self.async_checks.iter().zip(results) {
            match result {
                Ok(found) => issues.extend(found),
                Err(e) => {
                    warn!(check = check.name(), error = %e, "async check failed");
                    issues.push(internal_error_issue(check.name()));
                }
            }
        }
        issues
    }

    /// Run whole-graph checks against the completed graph.
    pub fn run_graph(&self, graph: &ResolvedGraph) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (name, check) in &self.graph_checks {
            match catch_unwind(AssertUnwindSafe(|| check(graph))) {
                Ok(found) => issues.extend(found),
                Err(_) => {
                    warn!(check = name, "whole-graph check panicked");
                    issues.push(internal_error_issue(name));
                }
            }
        }
        issues
    }
}

fn internal_error_issue(check_name: &str) -> Issue {
    Issue::new(
        issue_types::CHECK_INTERNAL_ERROR,
        Severity::Low,
        format!("check '{check_name}' failed internally; its findings for this node are incomplete"),
    )
    .with_evidence("check", check_name)
}

/// Context helper for tests and simple callers.
pub fn context_with_trusted(owners: &[&str]) -> NodeContext {
    let owners: Vec<String> = owners.iter().map(|s| s.to_ascii_lowercase()).collect();
    NodeContext {
        kind: NodeKind::Definition,
        action: None,
        is_trusted: Arc::new(move |owner: &str| {
            owners.iter().any(|o| o.eq_ignore_ascii_case(owner))
        }),
        stale_after: Duration::days(540),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::normalize_document;

    fn sample_def() -> NormalizedDefinition {
        normalize_document("jobs:\n  build:\n    steps:\n      - uses: actions/checkout@v4\n")
            .unwrap()
    }

    #[test]
    fn standard_registry_order_is_fixed() {
        let registry = CheckRegistry::standard();
        assert_eq!(
            registry.sync_names(),
            vec![
                "pinning",
                "permissions",
                "secrets",
                "injection",
                "supply_chain",
                "runner",
                "best_practice",
            ]
        );
    }

    #[test]
    fn panicking_check_is_isolated() {
        fn boom(_: &NormalizedDefinition, _: &NodeContext) -> Vec<Issue> {
            panic!("internal bug");
        }
        fn fine(_: &NormalizedDefinition, _: &NodeContext) -> Vec<Issue> {
            vec![Issue::new(issue_types::MISSING_PERMISSIONS, Severity::Low, "ok")]
        }
        let registry = CheckRegistry {
            sync_checks: vec![("boom", boom), ("fine", fine)],
            async_checks: vec![],
            graph_checks: vec![],
        };
        let issues = registry.run_sync(&sample_def(), &context_with_trusted(&[]));
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].issue_type, issue_types::CHECK_INTERNAL_ERROR);
        assert_eq!(issues[0].evidence["check"], "boom");
        assert_eq!(issues[1].issue_type, issue_types::MISSING_PERMISSIONS);
    }

    struct FailingAsync;

    #[async_trait]
    impl AsyncCheck for FailingAsync {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn run(
            &self,
            _def: &NormalizedDefinition,
            _ctx: &NodeContext,
            _fetcher: &dyn Fetcher,
        ) -> anyhow::Result<Vec<Issue>> {
            anyhow::bail!("remote exploded")
        }
    }

    #[tokio::test]
    async fn failing_async_check_becomes_diagnostic() {
        let registry = CheckRegistry {
            sync_checks: vec![],
            async_checks: vec![Box::new(FailingAsync)],
            graph_checks: vec![],
        };
        let fetcher = crate::fetch::LocalFetcher::new(
            std::path::PathBuf::from("/nonexistent"),
            "local",
            "repo",
            None,
        );
        let issues = registry
            .run_async(&sample_def(), &context_with_trusted(&[]), &fetcher)
            .await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, issue_types::CHECK_INTERNAL_ERROR);
        assert_eq!(issues[0].evidence["check"], "failing");
    }

    struct SlowAsync;

    #[async_trait]
    impl AsyncCheck for SlowAsync {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn run(
            &self,
            _def: &NormalizedDefinition,
            _ctx: &NodeContext,
            _fetcher: &dyn Fetcher,
        ) -> anyhow::Result<Vec<Issue>> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(vec![Issue::new(
                issue_types::OUTDATED_VERSION,
                Severity::Medium,
                "slow finding",
            )])
        }
    }

    struct FastAsync;

    #[async_trait]
    impl AsyncCheck for FastAsync {
        fn name(&self) -> &'static str {
            "fast"
        }
        async fn run(
            &self,
            _def: &NormalizedDefinition,
            _ctx: &NodeContext,
            _fetcher: &dyn Fetcher,
        ) -> anyhow::Result<Vec<Issue>> {
            Ok(vec![Issue::new(
                issue_types::LEGACY_MAJOR_VERSION,
                Severity::Low,
                "fast finding",
            )])
        }
    }

    #[tokio::test]
    async fn async_issues_keep_registration_order() {
        // the first-registered check finishes last; its issues still lead
        let registry = CheckRegistry {
            sync_checks: vec![],
            async_checks: vec![Box::new(SlowAsync), Box::new(FastAsync)],
            graph_checks: vec![],
        };
        let fetcher = crate::fetch::LocalFetcher::new(
            std::path::PathBuf::from("/nonexistent"),
            "local",
            "repo",
            None,
        );
        let issues = registry
            .run_async(&sample_def(), &context_with_trusted(&[]), &fetcher)
            .await;
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].issue_type, issue_types::OUTDATED_VERSION);
        assert_eq!(issues[1].issue_type, issue_types::LEGACY_MAJOR_VERSION);
    }

    #[test]
    fn trusted_predicate_is_case_insensitive() {
        let ctx = context_with_trusted(&["actions"]);
        assert!(ctx.trusted("Actions"));
        assert!(!ctx.trusted("acme"));
    }
}
