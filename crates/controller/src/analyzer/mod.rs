mod cycles;
mod validation;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use foreman_common::config::AnalyzerConfig;
use foreman_common::ids::IssueId;
use foreman_common::types::{IssueGraph, IssueNode, IssuePriority, IssueStatus};
use foreman_common::Result;

/// Lifecycle of a detected cycle. Cycles are data, not errors: they are
/// surfaced for human review while the rest of the graph keeps executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Detected,
    Breaking,
    Resolved,
    Escalated,
}

/// One cycle recovered from a back edge, closing node repeated.
#[derive(Clone, Debug, Serialize)]
pub struct CycleInfo {
    pub nodes: Vec<IssueId>,
    pub detected_at: DateTime<Utc>,
    pub status: CycleStatus,
}

/// Per-node derived analysis.
#[derive(Clone, Debug, Serialize)]
pub struct AnalyzedIssue {
    pub node: IssueNode,
    pub dependencies: Vec<IssueId>,
    pub dependents: Vec<IssueId>,
    pub transitive_dependencies: BTreeSet<IssueId>,
    /// Length of the longest path from any root; roots are 0.
    pub depth: u32,
    pub priority_score: i64,
    pub is_on_critical_path: bool,
    pub dependencies_resolved: bool,
}

/// Issues that can start concurrently, bucketed by depth.
#[derive(Clone, Debug, Serialize)]
pub struct ParallelGroup {
    pub depth: u32,
    pub issues: Vec<IssueId>,
    pub total_effort: f64,
}

/// The effort-weighted longest root-to-leaf path.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CriticalPath {
    pub path: Vec<IssueId>,
    pub total_effort: f64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub max_depth: u32,
    pub cycle_count: usize,
    pub blocked_count: usize,
    pub total_effort: f64,
    pub critical_path_effort: f64,
    pub p0_count: usize,
    pub p1_count: usize,
    pub p2_count: usize,
    pub p3_count: usize,
}

/// Everything `analyze` derives from one graph.
#[derive(Clone, Debug, Serialize)]
pub struct AnalysisResult {
    pub issues: HashMap<IssueId, AnalyzedIssue>,
    /// Topological order over executable nodes, highest score first among
    /// ready nodes. Cycle-blocked nodes never appear.
    pub execution_order: Vec<IssueId>,
    pub parallel_groups: Vec<ParallelGroup>,
    pub critical_path: CriticalPath,
    /// All executable nodes, highest score first.
    pub prioritized_queue: Vec<IssueId>,
    pub statistics: GraphStatistics,
    pub cycles: Vec<CycleInfo>,
    pub blocked_by_cycle: BTreeSet<IssueId>,
}

impl AnalysisResult {
    /// Whether every direct dependency of `id` is completed, re-evaluated
    /// against the current node statuses in `issues`.
    pub fn dependencies_resolved(&self, id: &IssueId) -> bool {
        self.issues.get(id).map_or(false, |issue| {
            issue.dependencies.iter().all(|dep| {
                self.issues
                    .get(dep)
                    .map_or(false, |d| d.node.status == IssueStatus::Completed)
            })
        })
    }
}

/// Dependency graph analysis: validation, cycle tolerance, depth, critical
/// path, priority scoring, execution ordering.
pub struct GraphAnalyzer {
    config: AnalyzerConfig,
}

impl GraphAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, graph: &IssueGraph) -> Result<AnalysisResult> {
        validation::validate(graph)?;

        let nodes: HashMap<IssueId, IssueNode> = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();

        let mut ids: Vec<IssueId> = nodes.keys().cloned().collect();
        ids.sort();

        // Adjacency, deduplicated and sorted for stable traversal.
        let mut dependencies: HashMap<IssueId, Vec<IssueId>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        let mut dependents: HashMap<IssueId, Vec<IssueId>> =
            ids.iter().map(|id| (id.clone(), Vec::new())).collect();

        for edge in &graph.edges {
            let deps = dependencies.get_mut(&edge.from).expect("validated");
            if !deps.contains(&edge.to) {
                deps.push(edge.to.clone());
                dependents
                    .get_mut(&edge.to)
                    .expect("validated")
                    .push(edge.from.clone());
            }
        }
        for list in dependencies.values_mut().chain(dependents.values_mut()) {
            list.sort();
        }

        // Cycles never fail analysis; their members (and everything
        // depending on them, by fixpoint) are just excluded from execution.
        let raw_cycles = cycles::detect(&ids, &dependencies);
        let detected_at = Utc::now();
        let cycle_infos: Vec<CycleInfo> = raw_cycles
            .iter()
            .map(|nodes| CycleInfo {
                nodes: nodes.clone(),
                detected_at,
                status: CycleStatus::Detected,
            })
            .collect();

        let mut blocked: BTreeSet<IssueId> = raw_cycles.into_iter().flatten().collect();
        loop {
            let mut changed = false;
            for id in &ids {
                if blocked.contains(id) {
                    continue;
                }
                if dependencies[id].iter().any(|d| blocked.contains(d)) {
                    blocked.insert(id.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let executable: Vec<IssueId> = ids
            .iter()
            .filter(|id| !blocked.contains(*id))
            .cloned()
            .collect();

        // Plain topological order over the executable subgraph (which is
        // closed under dependencies), used for depth and critical path.
        let topo = plain_topo_order(&executable, &dependencies, &dependents);

        let mut depth: HashMap<IssueId, u32> = HashMap::new();
        for id in &topo {
            let d = dependencies[id]
                .iter()
                .filter_map(|dep| depth.get(dep).map(|v| v + 1))
                .max()
                .unwrap_or(0);
            depth.insert(id.clone(), d);
        }

        let (critical_path, on_critical_path) =
            compute_critical_path(&topo, &nodes, &dependencies, &dependents);

        // Priority scores for every node, blocked included.
        let mut scores: HashMap<IssueId, i64> = HashMap::new();
        for id in &ids {
            let node = &nodes[id];
            let mut score = match node.priority {
                IssuePriority::P0 => self.config.weights.p0,
                IssuePriority::P1 => self.config.weights.p1,
                IssuePriority::P2 => self.config.weights.p2,
                IssuePriority::P3 => self.config.weights.p3,
            };
            score += self.config.dependent_multiplier * dependents[id].len() as i64;
            if on_critical_path.contains(id) {
                score += self.config.critical_path_bonus;
            }
            if node.effort <= self.config.quick_win_threshold_hours {
                score += self.config.quick_win_bonus;
            }
            scores.insert(id.clone(), score);
        }

        let execution_order =
            scored_topo_order(&executable, &nodes, &dependencies, &dependents, &scores);

        // Parallel groups: bucket executable nodes by depth, highest score
        // first within a group.
        let mut buckets: BTreeMap<u32, Vec<IssueId>> = BTreeMap::new();
        for id in &executable {
            buckets.entry(depth[id]).or_default().push(id.clone());
        }
        let parallel_groups: Vec<ParallelGroup> = buckets
            .into_iter()
            .map(|(group_depth, mut issues)| {
                issues.sort_by(|a, b| scores[b].cmp(&scores[a]).then_with(|| a.cmp(b)));
                let total_effort = issues.iter().map(|id| nodes[id].effort).sum();
                ParallelGroup {
                    depth: group_depth,
                    issues,
                    total_effort,
                }
            })
            .collect();

        let mut prioritized_queue = executable.clone();
        prioritized_queue.sort_by(|a, b| scores[b].cmp(&scores[a]).then_with(|| a.cmp(b)));

        let issues: HashMap<IssueId, AnalyzedIssue> = ids
            .iter()
            .map(|id| {
                let node = nodes[id].clone();
                let deps = dependencies[id].clone();
                let dependencies_resolved = deps
                    .iter()
                    .all(|d| nodes[d].status == IssueStatus::Completed);
                let analyzed = AnalyzedIssue {
                    transitive_dependencies: transitive_dependencies(id, &dependencies),
                    dependencies: deps,
                    dependents: dependents[id].clone(),
                    depth: depth.get(id).copied().unwrap_or(0),
                    priority_score: scores[id],
                    is_on_critical_path: on_critical_path.contains(id),
                    dependencies_resolved,
                    node,
                };
                (id.clone(), analyzed)
            })
            .collect();

        let statistics = GraphStatistics {
            node_count: ids.len(),
            edge_count: graph.edges.len(),
            root_count: ids.iter().filter(|id| dependencies[*id].is_empty()).count(),
            leaf_count: ids.iter().filter(|id| dependents[*id].is_empty()).count(),
            max_depth: depth.values().copied().max().unwrap_or(0),
            cycle_count: cycle_infos.len(),
            blocked_count: blocked.len(),
            total_effort: ids.iter().map(|id| nodes[id].effort).sum(),
            critical_path_effort: critical_path.total_effort,
            p0_count: priority_count(&nodes, IssuePriority::P0),
            p1_count: priority_count(&nodes, IssuePriority::P1),
            p2_count: priority_count(&nodes, IssuePriority::P2),
            p3_count: priority_count(&nodes, IssuePriority::P3),
        };

        tracing::info!(
            nodes = statistics.node_count,
            edges = statistics.edge_count,
            cycles = statistics.cycle_count,
            blocked = statistics.blocked_count,
            critical_path_effort = statistics.critical_path_effort,
            "Graph analysis complete"
        );

        Ok(AnalysisResult {
            issues,
            execution_order,
            parallel_groups,
            critical_path,
            prioritized_queue,
            statistics,
            cycles: cycle_infos,
            blocked_by_cycle: blocked,
        })
    }
}

fn priority_count(nodes: &HashMap<IssueId, IssueNode>, priority: IssuePriority) -> usize {
    nodes.values().filter(|n| n.priority == priority).count()
}

/// Kahn's algorithm with a FIFO ready set, nodes seeded in sorted order.
fn plain_topo_order(
    executable: &[IssueId],
    dependencies: &HashMap<IssueId, Vec<IssueId>>,
    dependents: &HashMap<IssueId, Vec<IssueId>>,
) -> Vec<IssueId> {
    let in_set: HashSet<&IssueId> = executable.iter().collect();
    let mut remaining: HashMap<IssueId, usize> = executable
        .iter()
        .map(|id| (id.clone(), dependencies[id].len()))
        .collect();

    let mut ready: VecDeque<IssueId> = executable
        .iter()
        .filter(|id| remaining[*id] == 0)
        .cloned()
        .collect();
    let mut order = Vec::with_capacity(executable.len());

    while let Some(id) = ready.pop_front() {
        for dependent in &dependents[&id] {
            if !in_set.contains(dependent) {
                continue;
            }
            let count = remaining.get_mut(dependent).expect("seeded");
            *count -= 1;
            if *count == 0 {
                ready.push_back(dependent.clone());
            }
        }
        order.push(id);
    }

    order
}

#[derive(PartialEq, Eq)]
struct ReadyKey {
    score: i64,
    effort_millis: i64,
    id: IssueId,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: descending score, then descending effort, then
        // ascending id.
        self.score
            .cmp(&other.score)
            .then(self.effort_millis.cmp(&other.effort_millis))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Kahn's algorithm where the ready set is always consumed in descending
/// priority-score order.
fn scored_topo_order(
    executable: &[IssueId],
    nodes: &HashMap<IssueId, IssueNode>,
    dependencies: &HashMap<IssueId, Vec<IssueId>>,
    dependents: &HashMap<IssueId, Vec<IssueId>>,
    scores: &HashMap<IssueId, i64>,
) -> Vec<IssueId> {
    let in_set: HashSet<&IssueId> = executable.iter().collect();
    let mut remaining: HashMap<IssueId, usize> = executable
        .iter()
        .map(|id| (id.clone(), dependencies[id].len()))
        .collect();

    let key = |id: &IssueId| ReadyKey {
        score: scores[id],
        effort_millis: (nodes[id].effort * 1000.0).round() as i64,
        id: id.clone(),
    };

    let mut ready: BinaryHeap<ReadyKey> = executable
        .iter()
        .filter(|id| remaining[*id] == 0)
        .map(key)
        .collect();
    let mut order = Vec::with_capacity(executable.len());

    while let Some(ReadyKey { id, .. }) = ready.pop() {
        for dependent in &dependents[&id] {
            if !in_set.contains(dependent) {
                continue;
            }
            let count = remaining.get_mut(dependent).expect("seeded");
            *count -= 1;
            if *count == 0 {
                ready.push(key(dependent));
            }
        }
        order.push(id);
    }

    order
}

/// Longest effort-weighted root-to-leaf path, ties broken by lexicographic
/// id so the result is stable across runs.
fn compute_critical_path(
    topo: &[IssueId],
    nodes: &HashMap<IssueId, IssueNode>,
    dependencies: &HashMap<IssueId, Vec<IssueId>>,
    dependents: &HashMap<IssueId, Vec<IssueId>>,
) -> (CriticalPath, HashSet<IssueId>) {
    let in_topo: HashSet<&IssueId> = topo.iter().collect();
    let mut longest_to_leaf: HashMap<IssueId, f64> = HashMap::new();
    let mut next: HashMap<IssueId, IssueId> = HashMap::new();

    for id in topo.iter().rev() {
        let mut best: Option<(&IssueId, f64)> = None;
        for dependent in &dependents[id] {
            if !in_topo.contains(dependent) {
                continue;
            }
            let candidate = longest_to_leaf[dependent];
            best = match best {
                None => Some((dependent, candidate)),
                Some((_, current)) if candidate > current => Some((dependent, candidate)),
                Some((current_id, current))
                    if candidate == current && dependent < current_id =>
                {
                    Some((dependent, candidate))
                }
                other => other,
            };
        }

        let tail = best.map(|(_, v)| v).unwrap_or(0.0);
        if let Some((chosen, _)) = best {
            next.insert(id.clone(), chosen.clone());
        }
        longest_to_leaf.insert(id.clone(), nodes[id].effort + tail);
    }

    let start = topo
        .iter()
        .filter(|id| dependencies[*id].is_empty())
        .max_by(|a, b| {
            longest_to_leaf[*a]
                .partial_cmp(&longest_to_leaf[*b])
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.cmp(a))
        });

    let mut path = Vec::new();
    if let Some(start) = start {
        let mut cursor = start.clone();
        path.push(cursor.clone());
        while let Some(succ) = next.get(&cursor) {
            path.push(succ.clone());
            cursor = succ.clone();
        }
    }

    let total_effort = path.iter().map(|id| nodes[id].effort).sum();
    let members: HashSet<IssueId> = path.iter().cloned().collect();

    (CriticalPath { path, total_effort }, members)
}

/// Every node reachable through the dependency relation, excluding `id`.
fn transitive_dependencies(
    id: &IssueId,
    dependencies: &HashMap<IssueId, Vec<IssueId>>,
) -> BTreeSet<IssueId> {
    let mut seen: BTreeSet<IssueId> = BTreeSet::new();
    let mut frontier: VecDeque<&IssueId> = dependencies[id].iter().collect();

    while let Some(dep) = frontier.pop_front() {
        if dep == id || !seen.insert(dep.clone()) {
            continue;
        }
        frontier.extend(dependencies[dep].iter());
    }

    seen
}
