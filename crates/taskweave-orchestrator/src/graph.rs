use crate::types::Subtask;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use taskweave_core::{TaskweaveError, TaskweaveResult};
use tracing::warn;

/// An edge dropped by cycle-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedEdge {
    /// The subtask that lost a dependency.
    pub dependent: String,
    /// The dependency that was dropped.
    pub dependency: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// The DAG of subtasks for one task execution.
///
/// Subtasks are kept in decomposition order; that order is the tie-break for
/// every algorithm here, so identical input always yields identical output.
///
/// Outside this crate subtasks are read-only, so ids cannot drift from the
/// lookup index:
///
/// ```compile_fail
/// use taskweave_orchestrator::DependencyGraph;
///
/// let mut graph = DependencyGraph::empty();
/// if let Some(task) = graph.get_mut("extract") {
///     task.id = "renamed".to_string();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    subtasks: Vec<Subtask>,
    index: HashMap<String, usize>,
    removed_edges: Vec<RemovedEdge>,
}

impl DependencyGraph {
    /// Build a graph, rejecting duplicate ids and dangling dependencies.
    pub fn new(subtasks: Vec<Subtask>) -> TaskweaveResult<Self> {
        let mut index = HashMap::with_capacity(subtasks.len());
        for (i, task) in subtasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(TaskweaveError::MalformedGraph(format!(
                    "Duplicate subtask id '{}'",
                    task.id
                )));
            }
        }

        for task in &subtasks {
            for dep in task.depends_on() {
                if !index.contains_key(dep) {
                    return Err(TaskweaveError::MalformedGraph(format!(
                        "Subtask '{}' depends on unknown subtask '{dep}'",
                        task.id
                    )));
                }
            }
        }

        Ok(Self {
            subtasks,
            index,
            removed_edges: Vec::new(),
        })
    }

    /// Graph with no subtasks.
    pub fn empty() -> Self {
        Self {
            subtasks: Vec::new(),
            index: HashMap::new(),
            removed_edges: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.index.get(id).map(|&i| &self.subtasks[i])
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.index.get(id).map(|&i| &mut self.subtasks[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Subtasks in decomposition order.
    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn into_subtasks(self) -> Vec<Subtask> {
        self.subtasks
    }

    /// Ids in decomposition order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.subtasks.iter().map(|t| t.id.as_str())
    }

    /// Every edge removed so far by [`Self::break_cycles`].
    pub fn removed_edges(&self) -> &[RemovedEdge] {
        &self.removed_edges
    }

    /// Find one cycle with a white/gray/black depth-first traversal.
    ///
    /// Returns the cycle as a path `[n0, n1, .., nk]` where each node depends
    /// on the next and `nk` depends on `n0`.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let edges: Vec<Vec<usize>> = self
            .subtasks
            .iter()
            .map(|t| {
                t.depends_on()
                    .iter()
                    .filter_map(|dep| self.index.get(dep).copied())
                    .collect()
            })
            .collect();
        let mut colors = vec![Color::White; self.subtasks.len()];

        for start in 0..self.subtasks.len() {
            if colors[start] == Color::White {
                if let Some(cycle) = dfs_cycle(&edges, start, &mut colors) {
                    return Some(
                        cycle
                            .into_iter()
                            .map(|i| self.subtasks[i].id.clone())
                            .collect(),
                    );
                }
            }
        }
        None
    }

    /// Remove edges until the graph is acyclic.
    ///
    /// For each detected cycle the node with the highest decomposition index
    /// loses its edge to its successor in the cycle, i.e. the edge that was
    /// added last. Returns the edges removed by this call.
    pub fn break_cycles(&mut self) -> Vec<RemovedEdge> {
        let mut removed = Vec::new();

        while let Some(cycle) = self.detect_cycle() {
            let (pos, _) = cycle
                .iter()
                .enumerate()
                .max_by_key(|(_, id)| self.index.get(id.as_str()).copied().unwrap_or(0))
                .unwrap_or((0, &cycle[0]));
            let dependent = cycle[pos].clone();
            let dependency = cycle[(pos + 1) % cycle.len()].clone();

            warn!(
                dependent = %dependent,
                dependency = %dependency,
                cycle = %cycle.join(" -> "),
                "Breaking dependency cycle"
            );

            if let Some(task) = self.get_mut(&dependent) {
                task.sever(&dependency);
            }
            let edge = RemovedEdge {
                dependent,
                dependency,
            };
            self.removed_edges.push(edge.clone());
            removed.push(edge);
        }

        removed
    }

    /// The next generation given the set of already-settled subtasks.
    ///
    /// Remaining in-degree is recomputed here on every call, counting only
    /// dependencies that are not yet settled. Ids come back in decomposition
    /// order.
    pub fn next_generation(&self, settled: &HashSet<String>) -> Vec<String> {
        self.subtasks
            .iter()
            .filter(|t| !settled.contains(&t.id))
            .filter(|t| {
                t.depends_on()
                    .iter()
                    .filter(|dep| !settled.contains(*dep))
                    .count()
                    == 0
            })
            .map(|t| t.id.clone())
            .collect()
    }

    /// Layer the whole graph into generations.
    ///
    /// Fails with [`TaskweaveError::InternalInvariantViolation`] if nodes
    /// remain but none is free, which cycle-breaking must have ruled out.
    pub fn generations(&self) -> TaskweaveResult<Vec<Vec<String>>> {
        let mut settled = HashSet::with_capacity(self.subtasks.len());
        let mut generations = Vec::new();

        while settled.len() < self.subtasks.len() {
            let generation = self.next_generation(&settled);
            if generation.is_empty() {
                let stuck: Vec<&str> = self
                    .ids()
                    .filter(|id| !settled.contains(*id))
                    .collect();
                return Err(TaskweaveError::InternalInvariantViolation(format!(
                    "Layering stalled with {} unscheduled subtasks: {}",
                    stuck.len(),
                    stuck.join(", ")
                )));
            }
            settled.extend(generation.iter().cloned());
            generations.push(generation);
        }

        Ok(generations)
    }

    /// Whether `ancestor` is a transitive dependency of `of`.
    pub fn is_ancestor(&self, ancestor: &str, of: &str) -> bool {
        let Some(start) = self.get(of) else {
            return false;
        };
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = start.depends_on().iter().map(String::as_str).collect();

        while let Some(id) = stack.pop() {
            if id == ancestor {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(task) = self.get(id) {
                stack.extend(task.depends_on().iter().map(String::as_str));
            }
        }
        false
    }

    /// Subtasks that directly depend on `id`, in decomposition order.
    pub fn dependents(&self, id: &str) -> Vec<String> {
        self.subtasks
            .iter()
            .filter(|t| t.depends_on().contains(id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Every transitive dependent of `id`, in breadth-first order.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<String> = self.dependents(id).into();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            queue.extend(self.dependents(&next));
            order.push(next);
        }
        order
    }
}

/// Depth-first walk from `start` over `edges` with an explicit stack of
/// `(node, next edge index)` frames. The gray path is the stack itself.
fn dfs_cycle(edges: &[Vec<usize>], start: usize, colors: &mut [Color]) -> Option<Vec<usize>> {
    let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
    colors[start] = Color::Gray;

    while let Some(frame) = stack.last_mut() {
        let (node, cursor) = *frame;
        let Some(&next) = edges[node].get(cursor) else {
            colors[node] = Color::Black;
            stack.pop();
            continue;
        };
        frame.1 += 1;

        match colors[next] {
            Color::Gray => {
                let pos = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                return Some(stack[pos..].iter().map(|&(n, _)| n).collect());
            }
            Color::White => {
                colors[next] = Color::Gray;
                stack.push((next, 0));
            }
            Color::Black => {}
        }
    }
    None
}
