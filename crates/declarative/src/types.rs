//! Core types shared by the graph, the scheduler and the state store

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Property bag exchanged with providers and persisted in state.
///
/// `serde_json::Map` keeps keys sorted, which makes serialized inputs
/// canonical for fingerprinting.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Logical identifier of a resource or component.
///
/// Ids are nesting paths: a child declared under component `dev/network`
/// with name `vpc` gets the id `dev/network/vpc`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Separator between path segments
    pub const SEPARATOR: char = '/';

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append a child segment to this id
    pub fn join(&self, name: &str) -> Self {
        Self(format!("{}{}{}", self.0, Self::SEPARATOR, name))
    }

    /// Last path segment (the name the node was declared with)
    pub fn name(&self) -> &str {
        self.0
            .rsplit(Self::SEPARATOR)
            .next()
            .unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Operation selected for a node after diffing against stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// No prior state: provision a new resource
    Create,
    /// Inputs changed in place; identity preserved
    Update,
    /// A replacement-required property changed: create a new identity,
    /// retire the old one once dependents have moved over
    Replace,
    /// Node removed from the desired graph
    Delete,
    /// Old identity of a replaced node, torn down after its dependents
    DeleteReplaced,
    /// Inputs unchanged; outputs come from state
    Same,
}

impl Operation {
    /// Whether this operation results in a provider call
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Same)
    }

    /// Symbol used when rendering plans
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "+-",
            Self::Delete | Self::DeleteReplaced => "-",
            Self::Same => " ",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::DeleteReplaced => "delete-replaced",
            Self::Same => "same",
        };
        f.write_str(name)
    }
}

/// Why a node was never dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// A node this one waits on failed or was itself skipped
    DependencyFailed { dependency: NodeId },
    /// The run was cancelled before the node became ready
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed { dependency } => write!(f, "dependency {dependency} failed"),
            Self::Cancelled => f.write_str("run cancelled"),
        }
    }
}

/// Terminal status of a node after a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Succeeded,
    Failed { error: String },
    Skipped { reason: SkipReason },
}

impl NodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Per-node entry of a run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub kind: String,
    /// `None` when the node was skipped before an operation was chosen
    pub operation: Option<Operation>,
    pub status: NodeStatus,
    /// Provider identity the operation produced or targeted
    pub identity: Option<String>,
    /// Provider calls made, including retries
    pub attempts: u32,
}

/// Why a run stopped dispatching early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    Cancelled,
    TimedOut,
    /// The state store rejected a write mid-run
    State { message: String },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut => f.write_str("timed out"),
            Self::State { message } => write!(f, "state store failure: {message}"),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    Aborted { reason: AbortReason },
}

/// Value of a stack export after a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExportValue {
    Resolved(serde_json::Value),
    /// The producing node failed, was skipped, or never ran
    Unresolved { reason: String },
}

impl ExportValue {
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Unresolved { .. } => None,
        }
    }
}

/// Result of a run: per-node statuses plus best-effort stack outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub stack: String,
    pub outcome: RunOutcome,
    pub nodes: Vec<NodeReport>,
    pub outputs: BTreeMap<String, ExportValue>,
}

impl RunReport {
    /// First report entry for a node id
    pub fn node(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id.as_str() == id)
    }

    /// All report entries for a node id (a replaced node has two)
    pub fn entries<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a NodeReport> + 'a {
        self.nodes.iter().filter(move |n| n.id.as_str() == id)
    }

    pub fn output(&self, name: &str) -> Option<&serde_json::Value> {
        self.outputs.get(name).and_then(ExportValue::value)
    }

    /// Completed without abort and without failed or skipped nodes
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.nodes.iter().all(|n| n.status.is_success())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for node in &self.nodes {
            summary.add(node);
        }
        summary
    }
}

/// Counts of what a run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Total number of provider-visible changes
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    fn add(&mut self, node: &NodeReport) {
        match (&node.status, node.operation) {
            (NodeStatus::Failed { .. }, _) => self.failed += 1,
            (NodeStatus::Skipped { .. }, _) => self.skipped += 1,
            (NodeStatus::Succeeded, Some(Operation::Create)) => self.created += 1,
            (NodeStatus::Succeeded, Some(Operation::Update)) => self.updated += 1,
            (NodeStatus::Succeeded, Some(Operation::Replace)) => self.replaced += 1,
            (
                NodeStatus::Succeeded,
                Some(Operation::Delete | Operation::DeleteReplaced),
            ) => self.deleted += 1,
            (NodeStatus::Succeeded, Some(Operation::Same) | None) => self.unchanged += 1,
        }
    }
}

/// Options for a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum number of provider operations in flight
    pub concurrency: usize,
    /// Stop dispatching new operations after this long
    pub timeout: Option<Duration>,
    /// Retry policy for transient provider errors
    pub retry: RetryPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: None,
            retry: RetryPolicy::no_retry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_paths() {
        let root = NodeId::new("dev");
        let child = root.join("network").join("vpc");
        assert_eq!(child.as_str(), "dev/network/vpc");
        assert_eq!(child.name(), "vpc");
        assert_eq!(root.name(), "dev");
    }

    #[test]
    fn test_summary_counts() {
        let report = RunReport {
            stack: "dev".into(),
            outcome: RunOutcome::Completed,
            nodes: vec![
                NodeReport {
                    id: "a".into(),
                    kind: "test".into(),
                    operation: Some(Operation::Create),
                    status: NodeStatus::Succeeded,
                    identity: Some("a-1".into()),
                    attempts: 1,
                },
                NodeReport {
                    id: "b".into(),
                    kind: "test".into(),
                    operation: None,
                    status: NodeStatus::Skipped {
                        reason: SkipReason::DependencyFailed {
                            dependency: "a".into(),
                        },
                    },
                    identity: None,
                    attempts: 0,
                },
            ],
            outputs: BTreeMap::new(),
        };

        let summary = report.summary();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total_changes(), 1);
        assert!(!summary.is_success());
        assert!(!report.is_success());
    }
}
