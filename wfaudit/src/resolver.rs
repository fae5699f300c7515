use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::action_ref::{ActionRef, RefType};
use crate::checks::{CheckRegistry, NodeContext, TrustedPredicate};
use crate::fetch::{CachedFetcher, FetchError, Fetcher, GitHubFetcher, LocalFetcher};
use crate::graph::{issue_types, Issue, NodeId, NodeKind, NodeState, ResolvedGraph, Severity};
use crate::workflow::normalize_document;

/// The repository whose automation tree is being audited.
#[derive(Debug, Clone)]
pub struct AuditTarget {
    pub owner: String,
    pub repo: String,
    pub git_ref: String,
}

impl AuditTarget {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            git_ref: git_ref.into(),
        }
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Clone)]
pub struct ResolveOptions {
    pub token: Option<String>,
    /// Concurrent in-flight node resolutions.
    pub max_concurrency: usize,
    /// Maximum tree depth to expand; the origin is depth 0 and its workflow
    /// files depth 1. `None` means unbounded.
    pub max_depth: Option<usize>,
    /// Wall-clock budget for the whole resolution. On expiry the graph is
    /// returned partially resolved.
    pub deadline: Option<Duration>,
    /// Age beyond which a hash-pinned commit counts as stale.
    pub stale_after: chrono::Duration,
    /// Publisher owners exempt from the untrusted-publisher rule.
    pub trusted_owners: Vec<String>,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            token: None,
            max_concurrency: 8,
            max_depth: None,
            deadline: None,
            stale_after: chrono::Duration::days(540),
            trusted_owners: vec![],
        }
    }
}

impl ResolveOptions {
    fn trusted_predicate(&self) -> TrustedPredicate {
        let owners: Vec<String> = self
            .trusted_owners
            .iter()
            .map(|o| o.to_ascii_lowercase())
            .collect();
        Arc::new(move |owner: &str| owners.iter().any(|o| o.eq_ignore_ascii_case(owner)))
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cannot resolve audit target {reference}: {source}")]
    RootUnresolvable {
        reference: String,
        #[source]
        source: FetchError,
    },
}

/// Audit a repository over the GitHub API.
pub async fn resolve(
    target: &AuditTarget,
    options: ResolveOptions,
) -> Result<ResolvedGraph, ResolveError> {
    let mut github = GitHubFetcher::new(options.token.clone());
    if let Some(budget) = options.deadline {
        github = github.with_deadline(Instant::now() + budget);
    }
    let fetcher: Arc<dyn Fetcher> = Arc::new(CachedFetcher::new(Arc::new(github)));
    resolve_with(target, options, fetcher).await
}

/// Audit a local checkout. Transitive components are only expanded when a
/// remote transport is supplied; without one they resolve as unreachable.
pub async fn resolve_local(
    root: PathBuf,
    target: &AuditTarget,
    options: ResolveOptions,
    remote: Option<Arc<dyn Fetcher>>,
) -> Result<ResolvedGraph, ResolveError> {
    let local = LocalFetcher::new(root, target.owner.clone(), target.repo.clone(), remote);
    let fetcher: Arc<dyn Fetcher> = Arc::new(CachedFetcher::new(Arc::new(local)));
    resolve_with(target, options, fetcher).await
}

/// Shared check inputs that do not vary by node.
struct CheckInputs {
    trusted: TrustedPredicate,
    stale_after: chrono::Duration,
}

impl CheckInputs {
    fn context(&self, kind: NodeKind, action: Option<ActionRef>) -> NodeContext {
        NodeContext {
            kind,
            action,
            is_trusted: Arc::clone(&self.trusted),
            stale_after: self.stale_after,
        }
    }
}

enum Work {
    Definition {
        node: NodeId,
        parent: NodeId,
        owner: String,
        repo: String,
        git_ref: String,
        path: String,
        depth: usize,
    },
    Component {
        node: NodeId,
        parent: NodeId,
        action: ActionRef,
        depth: usize,
    },
}

impl Work {
    fn meta(&self) -> (NodeId, NodeId, usize) {
        match self {
            Work::Definition { node, parent, depth, .. }
            | Work::Component { node, parent, depth, .. } => (*node, *parent, *depth),
        }
    }
}

enum Outcome {
    /// Document normalized, checks still running. Progress-only; the worker
    /// still sends a terminal outcome afterwards.
    Parsed,
    Resolved {
        issues: Vec<Issue>,
        children: Vec<(String, Option<usize>)>,
        resolved_sha: Option<String>,
    },
    FetchFailed(FetchError),
    Malformed(String),
}

struct WorkerMsg {
    node: NodeId,
    parent: NodeId,
    depth: usize,
    outcome: Outcome,
}

/// Resolve the full dependency tree of `target` and run every check.
///
/// The coordinator owns the graph; workers only fetch, parse, and check one
/// node each, reporting back over a channel. Node identity (case-normalized
/// reference keys) makes repeats and cycles collapse into edges, so the walk
/// terminates on any input.
#[instrument(skip(options, fetcher), fields(target = %target.slug()))]
pub async fn resolve_with(
    target: &AuditTarget,
    options: ResolveOptions,
    fetcher: Arc<dyn Fetcher>,
) -> Result<ResolvedGraph, ResolveError> {
    let registry = Arc::new(CheckRegistry::standard());
    let inputs = Arc::new(CheckInputs {
        trusted: options.trusted_predicate(),
        stale_after: options.stale_after,
    });
    let deadline = options.deadline.map(|budget| Instant::now() + budget);
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
    let (tx, mut rx) = mpsc::channel::<WorkerMsg>(64);

    let mut graph = ResolvedGraph::new();
    let origin_key = format!(
        "origin:{}/{}",
        target.owner.to_ascii_lowercase(),
        target.repo.to_ascii_lowercase()
    );
    let origin = graph.add_node(origin_key, target.slug(), NodeKind::Origin, None);
    graph.node_mut(origin).state = NodeState::Fetching;

    let paths = fetcher
        .list_definitions(&target.owner, &target.repo, &target.git_ref)
        .await
        .map_err(|source| ResolveError::RootUnresolvable {
            reference: format!("{}@{}", target.slug(), target.git_ref),
            source,
        })?;
    graph.node_mut(origin).state = NodeState::Checked;
    debug!(count = paths.len(), "workflow definitions listed");

    let mut in_flight = 0usize;
    for path in paths {
        let key = format!(
            "definition:{}/{}/{}",
            target.owner.to_ascii_lowercase(),
            target.repo.to_ascii_lowercase(),
            path
        );
        let node = graph.add_node(key, path.clone(), NodeKind::Definition, None);
        graph.add_edge(origin, node);
        graph.node_mut(node).state = NodeState::Fetching;
        in_flight += 1;
        spawn_worker(
            Work::Definition {
                node,
                parent: origin,
                owner: target.owner.clone(),
                repo: target.repo.clone(),
                git_ref: target.git_ref.clone(),
                path,
                depth: 1,
            },
            &fetcher,
            &registry,
            &inputs,
            &semaphore,
            &tx,
        );
    }

    let mut timed_out = false;
    while in_flight > 0 {
        let msg = match deadline {
            Some(at) => tokio::select! {
                msg = rx.recv() => msg,
                _ = tokio::time::sleep_until(at) => {
                    timed_out = true;
                    break;
                }
            },
            None => rx.recv().await,
        };
        let Some(msg) = msg else { break };
        if matches!(msg.outcome, Outcome::Parsed) {
            graph.node_mut(msg.node).state = NodeState::Parsed;
            continue;
        }
        in_flight -= 1;

        match msg.outcome {
            Outcome::Parsed => unreachable!("handled above"),
            Outcome::Resolved { issues, children, resolved_sha } => {
                {
                    let node = graph.node_mut(msg.node);
                    node.state = NodeState::Checked;
                    node.resolved_sha = resolved_sha;
                    node.issues.extend(issues);
                }
                for (raw, line) in children {
                    let action: ActionRef = match raw.parse() {
                        Ok(action) => action,
                        Err(e) => {
                            graph.push_issue(
                                msg.node,
                                Issue::new(
                                    issue_types::DEPENDENCY_UNRESOLVED,
                                    Severity::Medium,
                                    format!("'{raw}' is not a resolvable component reference"),
                                )
                                .with_evidence("reference", raw.clone())
                                .with_evidence("reason", e.to_string())
                                .with_recommendation("Fix the reference so the component can be audited")
                                .at_line(line),
                            );
                            continue;
                        }
                    };
                    let key = format!("component:{}", action.dedup_key());
                    if let Some(existing) = graph.lookup(&key) {
                        // Repeat or back-edge; identity dedup keeps the walk
                        // finite.
                        graph.add_edge(msg.node, existing);
                        continue;
                    }
                    let child_depth = msg.depth + 1;
                    if options.max_depth.is_some_and(|max| child_depth > max) {
                        debug!(component = %action, depth = child_depth, "depth limit reached, not expanding");
                        continue;
                    }
                    let child = graph.add_node(
                        key,
                        action.to_string(),
                        NodeKind::Component,
                        Some(action.clone()),
                    );
                    graph.add_edge(msg.node, child);
                    graph.node_mut(child).state = NodeState::Fetching;
                    in_flight += 1;
                    spawn_worker(
                        Work::Component {
                            node: child,
                            parent: msg.node,
                            action,
                            depth: child_depth,
                        },
                        &fetcher,
                        &registry,
                        &inputs,
                        &semaphore,
                        &tx,
                    );
                }
            }
            Outcome::FetchFailed(error) => {
                warn!(node = %graph.node(msg.node).label, error = %error, "node unresolvable");
                graph.node_mut(msg.node).state = NodeState::Failed;
                let dependency = graph.node(msg.node).label.clone();
                graph.push_issue(
                    msg.parent,
                    Issue::new(
                        issue_types::DEPENDENCY_UNRESOLVED,
                        Severity::Medium,
                        format!("dependency '{dependency}' could not be resolved"),
                    )
                    .with_evidence("dependency", dependency)
                    .with_evidence("error", error.to_string())
                    .with_recommendation("Verify the reference exists and is reachable with the configured credentials"),
                );
            }
            Outcome::Malformed(error) => {
                graph.node_mut(msg.node).state = NodeState::Failed;
                let label = graph.node(msg.node).label.clone();
                graph.push_issue(
                    msg.node,
                    Issue::new(
                        issue_types::MALFORMED_DEFINITION,
                        Severity::High,
                        format!("'{label}' could not be parsed; its tree was not expanded"),
                    )
                    .with_evidence("error", error)
                    .with_recommendation("Fix the document so it can be audited"),
                );
            }
        }
    }

    if timed_out {
        warn!("resolution deadline expired, returning partial graph");
        let pending: Vec<NodeId> = graph
            .nodes()
            .iter()
            .filter(|n| n.state == NodeState::Fetching)
            .map(|n| n.id)
            .collect();
        for id in pending {
            graph.node_mut(id).state = NodeState::Failed;
            let label = graph.node(id).label.clone();
            graph.push_issue(
                id,
                Issue::new(
                    issue_types::RESOLUTION_TIMEOUT,
                    Severity::Low,
                    format!("'{label}' was still resolving when the deadline expired"),
                )
                .with_recommendation("Re-run with a longer deadline or a narrower depth limit"),
            );
        }
        // Parsed nodes keep their state: the document was read, but check
        // results never arrived, so their findings are incomplete.
        let unchecked: Vec<NodeId> = graph
            .nodes()
            .iter()
            .filter(|n| n.state == NodeState::Parsed)
            .map(|n| n.id)
            .collect();
        for id in unchecked {
            let label = graph.node(id).label.clone();
            graph.push_issue(
                id,
                Issue::new(
                    issue_types::RESOLUTION_TIMEOUT,
                    Severity::Low,
                    format!("'{label}' parsed, but its checks did not finish before the deadline"),
                )
                .with_recommendation("Re-run with a longer deadline or a narrower depth limit"),
            );
        }
    }

    for issue in registry.run_graph(&graph) {
        graph.push_issue(origin, issue);
    }
    graph.finalize();
    Ok(graph)
}

fn spawn_worker(
    work: Work,
    fetcher: &Arc<dyn Fetcher>,
    registry: &Arc<CheckRegistry>,
    inputs: &Arc<CheckInputs>,
    semaphore: &Arc<Semaphore>,
    tx: &mpsc::Sender<WorkerMsg>,
) {
    let fetcher = Arc::clone(fetcher);
    let registry = Arc::clone(registry);
    let inputs = Arc::clone(inputs);
    let semaphore = Arc::clone(semaphore);
    let tx = tx.clone();
    tokio::spawn(async move {
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return;
        };
        let (node, parent, depth) = work.meta();
        let outcome = resolve_one(&work, fetcher.as_ref(), &registry, &inputs, &tx).await;
        let _ = tx.send(WorkerMsg { node, parent, depth, outcome }).await;
    });
}

/// File paths tried, in order, to locate a component's definition.
fn candidate_paths(action: &ActionRef) -> Vec<String> {
    match &action.subpath {
        Some(p) if p.ends_with(".yml") || p.ends_with(".yaml") => vec![p.clone()],
        Some(p) => vec![format!("{p}/action.yml"), format!("{p}/action.yaml")],
        None => vec!["action.yml".to_string(), "action.yaml".to_string()],
    }
}

async fn resolve_one(
    work: &Work,
    fetcher: &dyn Fetcher,
    registry: &CheckRegistry,
    inputs: &CheckInputs,
    progress: &mpsc::Sender<WorkerMsg>,
) -> Outcome {
    let (body, ctx, resolved_sha) = match work {
        Work::Definition { owner, repo, git_ref, path, .. } => {
            match fetcher.fetch_definition(owner, repo, git_ref, path).await {
                Ok(body) => (body, inputs.context(NodeKind::Definition, None), None),
                Err(e) => return Outcome::FetchFailed(e),
            }
        }
        Work::Component { action, .. } => {
            let mut body = None;
            let mut not_found = None;
            for path in candidate_paths(action) {
                match fetcher
                    .fetch_definition(&action.owner, &action.repo, &action.git_ref, &path)
                    .await
                {
                    Ok(found) => {
                        body = Some(found);
                        break;
                    }
                    Err(e @ FetchError::NotFound(_)) => not_found = Some(e),
                    Err(e) => return Outcome::FetchFailed(e),
                }
            }
            let Some(body) = body else {
                return Outcome::FetchFailed(
                    not_found.unwrap_or_else(|| FetchError::NotFound(action.to_string())),
                );
            };
            let sha = (action.ref_type == RefType::FullSha).then(|| action.git_ref.clone());
            (
                body,
                inputs.context(NodeKind::Component, Some(action.clone())),
                sha,
            )
        }
    };

    let def = match normalize_document(&body) {
        Ok(def) => def,
        Err(e) => return Outcome::Malformed(e.to_string()),
    };
    let (node, parent, depth) = work.meta();
    let _ = progress
        .send(WorkerMsg { node, parent, depth, outcome: Outcome::Parsed })
        .await;
    let mut issues = registry.run_sync(&def, &ctx);
    issues.extend(registry.run_async(&def, &ctx, fetcher).await);
    Outcome::Resolved {
        issues,
        children: def.component_refs(),
        resolved_sha,
    }
}
