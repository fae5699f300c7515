use std::collections::BTreeMap;

use crate::graph::{issue_types, Issue, NodeKind, ResolvedGraph, Severity};

/// Whole-graph consistency: the same component pulled at several different
/// refs across the tree. One issue per divergent package, attached to the
/// Origin by the resolver.
pub fn check(graph: &ResolvedGraph) -> Vec<Issue> {
    let mut by_package: BTreeMap<String, Vec<&crate::graph::Node>> = BTreeMap::new();
    for node in graph.nodes() {
        if node.kind != NodeKind::Component {
            continue;
        }
        let Some(action) = &node.action else { continue };
        by_package
            .entry(action.package_name().to_ascii_lowercase())
            .or_default()
            .push(node);
    }

    let mut issues = Vec::new();
    for (package, nodes) in by_package {
        let mut refs: Vec<String> = nodes
            .iter()
            .filter_map(|n| n.action.as_ref().map(|a| a.git_ref.clone()))
            .collect();
        refs.sort();
        refs.dedup();
        if refs.len() < 2 {
            continue;
        }

        // Consumers in discovery order: every node with an edge into one of
        // the divergent component nodes.
        let mut consumers: Vec<String> = Vec::new();
        for edge in graph.edges() {
            if nodes.iter().any(|n| n.id == edge.to) {
                let label = graph.node(edge.from).label.clone();
                if !consumers.contains(&label) {
                    consumers.push(label);
                }
            }
        }

        issues.push(
            Issue::new(
                issue_types::INCONSISTENT_VERSION,
                Severity::High,
                format!(
                    "'{package}' is used at {} different refs across the tree",
                    refs.len()
                ),
            )
            .with_evidence("package", package.clone())
            .with_evidence("refs", serde_json::Value::from(refs))
            .with_evidence("consumers", serde_json::Value::from(consumers))
            .with_recommendation("Align every consumer on a single ref for this component"),
        );
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_ref::ActionRef;
    use crate::graph::NodeId;

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
    fn divergent_refs_are_flagged_once_per_package() {
        let mut graph = ResolvedGraph::new();
        let origin = graph.add_node("origin:o/r".into(), "o/r".into(), NodeKind::Origin, None);
        let v1 = component(&mut graph, "acme/build-tool@v1");
        let v2 = component(&mut graph, "acme/build-tool@v2");
        graph.add_edge(origin, v1);
        graph.add_edge(origin, v2);

        let issues = check(&graph);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, issue_types::INCONSISTENT_VERSION);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].evidence["package"], "acme/build-tool");
        assert_eq!(issues[0].evidence["refs"][0], "v1");
        assert_eq!(issues[0].evidence["refs"][1], "v2");
        assert_eq!(issues[0].evidence["consumers"][0], "o/r");
    }

    #[test]
    fn consistent_refs_are_clean() {
        let mut graph = ResolvedGraph::new();
        let origin = graph.add_node("origin:o/r".into(), "o/r".into(), NodeKind::Origin, None);
        let node = component(&mut graph, "acme/build-tool@v1");
        graph.add_edge(origin, node);
        assert!(check(&graph).is_empty());
    }

    #[test]
    fn package_grouping_is_case_insensitive() {
        let mut graph = ResolvedGraph::new();
        let a = component(&mut graph, "Acme/Build-Tool@v1");
        let b = component(&mut graph, "acme/build-tool@v2");
        assert_ne!(a, b);
        let issues = check(&graph);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn subpaths_of_one_repo_are_distinct_packages() {
        let mut graph = ResolvedGraph::new();
        component(&mut graph, "acme/mono/pkg-a@v1");
        component(&mut graph, "acme/mono/pkg-b@v2");
        assert!(check(&graph).is_empty());
    }

    #[test]
    fn consumers_are_listed_in_discovery_order() {
        let mut graph = ResolvedGraph::new();
        let first = graph.add_node(
            "definition:o/r/.github/workflows/ci.yml".into(),
            "ci.yml".into(),
            NodeKind::Definition,
            None,
        );
        let second = graph.add_node(
            "definition:o/r/.github/workflows/release.yml".into(),
            "release.yml".into(),
            NodeKind::Definition,
            None,
        );
        let v1 = component(&mut graph, "acme/build-tool@v1");
        let v2 = component(&mut graph, "acme/build-tool@v2");
        graph.add_edge(second, v2);
        graph.add_edge(first, v1);

        let issues = check(&graph);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].evidence["consumers"][0], "release.yml");
        assert_eq!(issues[0].evidence["consumers"][1], "ci.yml");
    }
}
