use serde::{Deserialize, Serialize};

use crate::ids::IssueId;

/// Priority classes, P0 highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssuePriority {
    P0,
    P1,
    P2,
    P3,
}

impl IssuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        }
    }
}

/// Issue lifecycle states. Advances monotonically except failed → pending (retry).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Pending,
    Ready,
    InProgress,
    Completed,
    Blocked,
    Failed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// One unit of work in the dependency graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssueNode {
    pub id: IssueId,
    pub title: String,
    pub priority: IssuePriority,
    /// Estimated effort in hours.
    #[serde(default)]
    pub effort: f64,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
}

/// Directed dependency: `from` depends on `to`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: IssueId,
    pub to: IssueId,
}

/// Graph input as ingested from JSON. Unknown fields are ignored.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IssueGraph {
    #[serde(default)]
    pub nodes: Vec<IssueNode>,
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_json_ignores_unknown_fields() {
        let json = r#"{
            "nodes": [
                {"id": "A", "title": "Root", "priority": "P1", "effort": 2.5,
                 "status": "pending", "extra_field": true}
            ],
            "edges": [{"from": "A", "to": "A", "weight": 3}],
            "metadata": {"source": "import"}
        }"#;
        let graph: IssueGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].priority, IssuePriority::P1);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn test_status_round_trip() {
        let s: IssueStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(s, IssueStatus::InProgress);
        assert_eq!(serde_json::to_string(&s).unwrap(), "\"in_progress\"");
    }
}
