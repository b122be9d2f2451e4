use std::collections::HashSet;

use foreman_common::types::IssueGraph;
use foreman_common::{ControllerError, Result};

/// Validate the raw graph before analysis.
///
/// All failures are aggregated and returned together so imported data can
/// be fixed in one pass. An empty graph is its own error.
pub fn validate(graph: &IssueGraph) -> Result<()> {
    if graph.nodes.is_empty() {
        return Err(ControllerError::EmptyGraph);
    }

    let mut errors: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for node in &graph.nodes {
        if node.id.as_str().is_empty() {
            errors.push("node with empty id".into());
            continue;
        }
        if !seen.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id: {}", node.id));
        }
        if node.title.is_empty() {
            errors.push(format!("node {} has an empty title", node.id));
        }
        if !node.effort.is_finite() || node.effort < 0.0 {
            errors.push(format!(
                "node {} has invalid effort {}",
                node.id, node.effort
            ));
        }
    }

    for edge in &graph.edges {
        if edge.from == edge.to {
            errors.push(format!("self-dependency on {}", edge.from));
            continue;
        }
        if !seen.contains(edge.from.as_str()) {
            errors.push(format!(
                "edge references unknown node: {} -> {}",
                edge.from, edge.to
            ));
        }
        if !seen.contains(edge.to.as_str()) {
            errors.push(format!(
                "edge references unknown node: {} -> {}",
                edge.from, edge.to
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ControllerError::GraphValidation { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_common::types::{DependencyEdge, IssueNode, IssuePriority, IssueStatus};
    use foreman_common::IssueId;

    fn node(id: &str) -> IssueNode {
        IssueNode {
            id: IssueId::from(id),
            title: format!("Issue {}", id),
            priority: IssuePriority::P1,
            effort: 1.0,
            status: IssueStatus::Pending,
            url: None,
            component_id: None,
        }
    }

    #[test]
    fn test_empty_graph_rejected() {
        let err = validate(&IssueGraph::default()).unwrap_err();
        assert!(matches!(err, ControllerError::EmptyGraph));
    }

    #[test]
    fn test_failures_are_aggregated() {
        let mut bad = node("A");
        bad.title = String::new();
        bad.effort = -1.0;

        let graph = IssueGraph {
            nodes: vec![bad, node("A")],
            edges: vec![
                DependencyEdge {
                    from: IssueId::from("A"),
                    to: IssueId::from("A"),
                },
                DependencyEdge {
                    from: IssueId::from("A"),
                    to: IssueId::from("MISSING"),
                },
            ],
        };

        match validate(&graph).unwrap_err() {
            ControllerError::GraphValidation { errors } => {
                assert_eq!(errors.len(), 4);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_valid_graph_passes() {
        let graph = IssueGraph {
            nodes: vec![node("A"), node("B")],
            edges: vec![DependencyEdge {
                from: IssueId::from("B"),
                to: IssueId::from("A"),
            }],
        };
        assert!(validate(&graph).is_ok());
    }
}
