use std::collections::HashMap;

use foreman_common::IssueId;

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Find every back edge in the dependency graph and recover the cycle path
/// it closes.
///
/// Each returned cycle lists its nodes in dependency order with the closing
/// node repeated at the end (`[A, B, A]`). Nodes are visited in sorted id
/// order so results are stable across runs.
pub fn detect(
    order: &[IssueId],
    dependencies: &HashMap<IssueId, Vec<IssueId>>,
) -> Vec<Vec<IssueId>> {
    let mut colors: HashMap<IssueId, Color> = order
        .iter()
        .map(|id| (id.clone(), Color::White))
        .collect();
    let mut path: Vec<IssueId> = Vec::new();
    let mut cycles: Vec<Vec<IssueId>> = Vec::new();

    for id in order {
        if colors.get(id) == Some(&Color::White) {
            visit(id, dependencies, &mut colors, &mut path, &mut cycles);
        }
    }

    cycles
}

fn visit(
    node: &IssueId,
    dependencies: &HashMap<IssueId, Vec<IssueId>>,
    colors: &mut HashMap<IssueId, Color>,
    path: &mut Vec<IssueId>,
    cycles: &mut Vec<Vec<IssueId>>,
) {
    colors.insert(node.clone(), Color::Gray);
    path.push(node.clone());

    if let Some(deps) = dependencies.get(node) {
        for dep in deps {
            match colors.get(dep).copied() {
                Some(Color::White) => visit(dep, dependencies, colors, path, cycles),
                Some(Color::Gray) => {
                    // Back edge: the segment of the current path from `dep`
                    // onward, closed by repeating `dep`.
                    if let Some(pos) = path.iter().position(|p| p == dep) {
                        let mut cycle: Vec<IssueId> = path[pos..].to_vec();
                        cycle.push(dep.clone());
                        cycles.push(cycle);
                    }
                }
                _ => {}
            }
        }
    }

    path.pop();
    colors.insert(node.clone(), Color::Black);
}
