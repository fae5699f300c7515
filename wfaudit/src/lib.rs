//! Security auditor for CI automation trees.
//!
//! Starting from one repository, the resolver walks every workflow
//! definition and the transitive closure of third-party components they
//! use, runs a fixed registry of security checks over each node, and
//! returns an annotated dependency graph.

pub mod action_ref;
pub mod checks;
pub mod fetch;
pub mod graph;
pub mod resolver;
pub mod version;
pub mod workflow;

pub use action_ref::{ActionRef, RefType};
pub use checks::CheckRegistry;
pub use fetch::{FetchError, Fetcher, GitHubFetcher, LocalFetcher};
pub use graph::{issue_types, Issue, Node, NodeKind, NodeState, ResolvedGraph, Severity};
pub use resolver::{
    resolve, resolve_local, resolve_with, AuditTarget, ResolveError, ResolveOptions,
};
pub use workflow::{normalize_document, NormalizedDefinition};
