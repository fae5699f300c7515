use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::action_ref::ActionRef;

/// Stable identifiers for every issue type the auditor can emit. Each slug
/// doubles as a documentation lookup key for downstream consumers.
pub mod issue_types {
    pub const UNPINNED_MUTABLE_REF: &str = "unpinned_mutable_ref";
    pub const SHORT_HASH_PIN: &str = "short_hash_pin";
    pub const EXCESSIVE_PERMISSIONS: &str = "excessive_permissions";
    pub const MISSING_PERMISSIONS: &str = "missing_permissions";
    pub const SECRET_IN_RUN: &str = "secret_in_run";
    pub const SECRETS_INHERIT: &str = "secrets_inherit";
    pub const EXPRESSION_INJECTION: &str = "expression_injection";
    pub const UNTRUSTED_PUBLISHER: &str = "untrusted_publisher";
    pub const SELF_HOSTED_RUNNER: &str = "self_hosted_runner";
    pub const DANGEROUS_TRIGGER: &str = "dangerous_trigger";
    pub const CONTINUE_ON_ERROR: &str = "continue_on_error_on_risky_step";
    pub const OUTDATED_VERSION: &str = "outdated_version";
    pub const STALE_PINNED_COMMIT: &str = "stale_pinned_commit";
    pub const LEGACY_MAJOR_VERSION: &str = "legacy_major_version";
    pub const INCONSISTENT_VERSION: &str = "inconsistent_version";
    pub const MALFORMED_DEFINITION: &str = "malformed_definition";
    pub const DEPENDENCY_UNRESOLVED: &str = "dependency_unresolved";
    pub const RESOLUTION_TIMEOUT: &str = "resolution_timeout";
    pub const CHECK_INTERNAL_ERROR: &str = "check_internal_error";
}

/// Ordered severity scale. Derived ordering puts `Low` first, so `max()`
/// over a node's issues yields the worst finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single finding attached to exactly one node.
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    /// Stable machine identifier (see [`issue_types`]).
    #[serde(rename = "type")]
    pub issue_type: &'static str,
    pub severity: Severity,
    pub message: String,
    /// Structured key/value context for reporting.
    pub evidence: Map<String, Value>,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Issue {
    pub fn new(issue_type: &'static str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            issue_type,
            severity,
            message: message.into(),
            evidence: Map::new(),
            recommendation: String::new(),
            line: None,
        }
    }

    pub fn with_evidence(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.evidence.insert(key.to_string(), value.into());
        self
    }

    pub fn with_recommendation(mut self, text: impl Into<String>) -> Self {
        self.recommendation = text.into();
        self
    }

    pub fn at_line(mut self, line: Option<usize>) -> Self {
        self.line = line;
        self
    }

    /// Documentation lookup key. Guaranteed equal to the type slug.
    pub fn docs_slug(&self) -> &'static str {
        self.issue_type
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// The audited repository as a whole.
    Origin,
    /// One workflow definition file inside the origin.
    Definition,
    /// One reusable action or workflow at a specific ref.
    Component,
}

/// Resolution lifecycle of a node. `Finalized` and `Failed` are terminal;
/// a deadline expiry can leave a node `Parsed` in the returned partial
/// graph (document read, checks incomplete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Discovered,
    Fetching,
    Parsed,
    Checked,
    Finalized,
    Failed,
}

/// Arena index of a node inside its [`ResolvedGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    /// Unique identity string (kind-prefixed normalized reference).
    pub key: String,
    pub label: String,
    pub kind: NodeKind,
    pub state: NodeState,
    /// Present for Component nodes and reusable-workflow Definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRef>,
    /// Commit the symbolic ref resolved to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_sha: Option<String>,
    pub issues: Vec<Issue>,
}

impl Node {
    /// Severity rollup: the worst severity among attached issues.
    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

/// Directed `uses` relation between two nodes. Duplicates may be recorded
/// during resolution; [`ResolvedGraph::edges`] deduplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

/// Aggregate statistics, computed once at finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_with_issues: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

/// The completed dependency graph: node arena, edges, and statistics.
#[derive(Debug, Serialize)]
pub struct ResolvedGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(skip)]
    index: HashMap<String, NodeId>,
    pub stats: GraphStats,
    finalized: bool,
}

impl ResolvedGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            index: HashMap::new(),
            stats: GraphStats::default(),
            finalized: false,
        }
    }

    /// Insert a node, enforcing identity uniqueness. Returns the existing
    /// id when the key is already present.
    pub fn add_node(
        &mut self,
        key: String,
        label: String,
        kind: NodeKind,
        action: Option<ActionRef>,
    ) -> NodeId {
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.index.insert(key.clone(), id);
        self.nodes.push(Node {
            id,
            key,
            label,
            kind,
            state: NodeState::Discovered,
            action,
            resolved_sha: None,
            issues: Vec::new(),
        });
        id
    }

    pub fn lookup(&self, key: &str) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn add_edge(&mut self, from: NodeId, to: NodeId) {
        self.edges.push(Edge { from, to });
    }

    /// Edges with duplicates between the same pair collapsed, preserving
    /// first-recorded order.
    pub fn edges(&self) -> Vec<Edge> {
        let mut seen = std::collections::HashSet::new();
        self.edges
            .iter()
            .copied()
            .filter(|e| seen.insert((e.from, e.to)))
            .collect()
    }

    /// Raw edge list, duplicates included.
    pub fn raw_edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.edges()
            .iter()
            .filter(|e| e.from == id)
            .map(|e| e.to)
            .collect()
    }

    pub fn push_issue(&mut self, id: NodeId, issue: Issue) {
        self.nodes[id.0].issues.push(issue);
    }

    /// The single Origin node, when present.
    pub fn origin(&self) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|n| n.kind == NodeKind::Origin)
            .map(|n| n.id)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Compute statistics and move every checked node to `Finalized`.
    /// Runs exactly once; later calls are no-ops.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        for node in &mut self.nodes {
            if node.state == NodeState::Checked {
                node.state = NodeState::Finalized;
            }
        }
        let mut stats = GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edges().len(),
            ..GraphStats::default()
        };
        for node in &self.nodes {
            if !node.issues.is_empty() {
                stats.nodes_with_issues += 1;
            }
            for issue in &node.issues {
                match issue.severity {
                    Severity::Critical => stats.critical += 1,
                    Severity::High => stats.high += 1,
                    Severity::Medium => stats.medium += 1,
                    Severity::Low => stats.low += 1,
                }
            }
        }
        self.stats = stats;
        self.finalized = true;
    }
}

impl Default for ResolvedGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(graph: &mut ResolvedGraph, raw: &str) -> NodeId {
        let ar: ActionRef = raw.parse().unwrap();
        graph.add_node(
            format!("component:{}", ar.dedup_key()),
            ar.to_string(),
            NodeKind::Component,
            Some(ar),
        )
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn duplicate_keys_reuse_the_node() {
        let mut graph = ResolvedGraph::new();
        let a = component(&mut graph, "actions/checkout@v4");
        let b = component(&mut graph, "Actions/Checkout@v4");
        assert_eq!(a, b);
        assert_eq!(graph.nodes().len(), 1);
    }

    #[test]
    fn same_component_different_refs_are_two_nodes() {
        let mut graph = ResolvedGraph::new();
        let a = component(&mut graph, "acme/build-tool@v1");
        let b = component(&mut graph, "acme/build-tool@v2");
        assert_ne!(a, b);
        assert_eq!(graph.nodes().len(), 2);
    }

    #[test]
    fn edges_deduplicate_but_preserve_raw_count() {
        let mut graph = ResolvedGraph::new();
        let a = component(&mut graph, "a/b@v1");
        let b = component(&mut graph, "c/d@v1");
        graph.add_edge(a, b);
        graph.add_edge(a, b);
        graph.add_edge(b, a);
        assert_eq!(graph.raw_edge_count(), 3);
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn max_severity_rollup() {
        let mut graph = ResolvedGraph::new();
        let a = component(&mut graph, "a/b@v1");
        assert_eq!(graph.node(a).max_severity(), None);
        graph.push_issue(
            a,
            Issue::new(issue_types::MISSING_PERMISSIONS, Severity::Low, "m"),
        );
        graph.push_issue(
            a,
            Issue::new(issue_types::EXCESSIVE_PERMISSIONS, Severity::Critical, "m"),
        );
        assert_eq!(graph.node(a).max_severity(), Some(Severity::Critical));
    }

    #[test]
    fn finalize_computes_stats_and_states() {
        let mut graph = ResolvedGraph::new();
        let origin = graph.add_node("origin:o/r".into(), "o/r".into(), NodeKind::Origin, None);
        graph.node_mut(origin).state = NodeState::Checked;
        let a = component(&mut graph, "a/b@v1");
        graph.node_mut(a).state = NodeState::Checked;
        let failed = component(&mut graph, "c/d@v1");
        graph.node_mut(failed).state = NodeState::Failed;
        let parsed = component(&mut graph, "e/f@v1");
        graph.node_mut(parsed).state = NodeState::Parsed;
        graph.add_edge(origin, a);
        graph.add_edge(origin, failed);
        graph.push_issue(a, Issue::new(issue_types::SECRET_IN_RUN, Severity::High, "m"));
        graph.push_issue(a, Issue::new(issue_types::SECRETS_INHERIT, Severity::Medium, "m"));

        graph.finalize();
        assert!(graph.is_finalized());
        assert_eq!(graph.stats.node_count, 4);
        assert_eq!(graph.stats.edge_count, 2);
        assert_eq!(graph.stats.nodes_with_issues, 1);
        assert_eq!(graph.stats.high, 1);
        assert_eq!(graph.stats.medium, 1);
        assert_eq!(graph.node(a).state, NodeState::Finalized);
        assert_eq!(graph.node(failed).state, NodeState::Failed);
        // interrupted checks are not promoted
        assert_eq!(graph.node(parsed).state, NodeState::Parsed);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut graph = ResolvedGraph::new();
        let a = component(&mut graph, "a/b@v1");
        graph.push_issue(a, Issue::new(issue_types::SECRET_IN_RUN, Severity::High, "m"));
        graph.finalize();
        let stats = graph.stats.clone();
        graph.finalize();
        assert_eq!(graph.stats, stats);
    }

    #[test]
    fn origin_lookup() {
        let mut graph = ResolvedGraph::new();
        assert!(graph.origin().is_none());
        let origin = graph.add_node("origin:o/r".into(), "o/r".into(), NodeKind::Origin, None);
        assert_eq!(graph.origin(), Some(origin));
    }

    #[test]
    fn docs_slug_matches_type() {
        let issue = Issue::new(issue_types::OUTDATED_VERSION, Severity::Medium, "m");
        assert_eq!(issue.docs_slug(), "outdated_version");
    }
}
