use crate::graph::{DependencyGraph, RemovedEdge};
use crate::types::{InputValue, Subtask};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use taskweave_core::{TaskweaveError, TaskweaveResult};
use tracing::{debug, info};

/// One step of a task description, before ids and edges are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Defaults to a position-based id chosen by the shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub capability: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
    /// Ordering edges. Only accepted in the explicit `graph` shape.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl StepSpec {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            id: None,
            capability: capability.into(),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }
}

/// A task request, tagged by its shape.
///
/// ```json
/// {"shape": "pipeline", "steps": [{"id": "extract", "capability": "read"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum TaskDescription {
    /// A single operation; the graph has one node.
    Atomic(StepSpec),
    /// Each step depends on the one before it.
    Pipeline {
        #[serde(default)]
        steps: Vec<StepSpec>,
    },
    /// One source feeds independent branches, joined by a final step.
    FanOut {
        source: StepSpec,
        #[serde(default)]
        branches: Vec<StepSpec>,
        join: StepSpec,
    },
    /// Caller-supplied subtasks with explicit `depends_on` lists.
    Graph {
        #[serde(default)]
        subtasks: Vec<StepSpec>,
    },
}

impl TaskDescription {
    /// Parse a JSON task description. Unknown shapes are malformed.
    pub fn from_json_str(source: &str) -> TaskweaveResult<Self> {
        serde_json::from_str(source).map_err(|e| {
            TaskweaveError::MalformedGraph(format!("Unsupported task description: {e}"))
        })
    }

    /// Short name of the shape, for logs.
    pub fn shape(&self) -> &'static str {
        match self {
            TaskDescription::Atomic(_) => "atomic",
            TaskDescription::Pipeline { .. } => "pipeline",
            TaskDescription::FanOut { .. } => "fan_out",
            TaskDescription::Graph { .. } => "graph",
        }
    }
}

/// What an execution would do, computed without dispatching anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub subtask_count: usize,
    pub generations: Vec<Vec<String>>,
    pub removed_edges: Vec<RemovedEdge>,
}

/// Decomposition cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct DecompositionCache {
    capacity: usize,
    graphs: HashMap<String, DependencyGraph>,
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

impl DecompositionCache {
    fn get(&mut self, key: &str) -> Option<DependencyGraph> {
        match self.graphs.get(key) {
            Some(graph) => {
                self.hits += 1;
                Some(graph.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: String, graph: DependencyGraph) {
        if self.capacity == 0 || self.graphs.contains_key(&key) {
            return;
        }
        while self.graphs.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.graphs.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.graphs.insert(key, graph);
    }
}

/// Turns task descriptions into dependency graphs.
///
/// Decomposition is a pure function of the description. Results are cached
/// by a SHA-256 of the description's JSON; a hit returns the same graph a
/// fresh decomposition would.
pub struct Decomposer {
    cache: Mutex<DecompositionCache>,
}

impl Decomposer {
    /// Create a decomposer caching up to `cache_capacity` graphs.
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: Mutex::new(DecompositionCache {
                capacity: cache_capacity,
                graphs: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Build the dependency graph for `description`.
    ///
    /// The graph may still contain cycles; they are broken when it is
    /// scheduled or planned.
    pub fn decompose(&self, description: &TaskDescription) -> TaskweaveResult<DependencyGraph> {
        let key = cache_key(description)?;
        if let Some(graph) = self.cache.lock().get(&key) {
            debug!(key = %key, "Decomposition cache hit");
            return Ok(graph);
        }

        let graph = build_graph(description)?;
        info!(
            shape = description.shape(),
            subtasks = graph.len(),
            "Decomposed task"
        );
        self.cache.lock().insert(key, graph.clone());
        Ok(graph)
    }

    /// Decompose, break cycles and layer, without executing.
    pub fn plan(&self, description: &TaskDescription) -> TaskweaveResult<ExecutionPlan> {
        let mut graph = self.decompose(description)?;
        graph.break_cycles();
        let generations = graph.generations()?;
        Ok(ExecutionPlan {
            subtask_count: graph.len(),
            generations,
            removed_edges: graph.removed_edges().to_vec(),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            entries: cache.graphs.len(),
            hits: cache.hits,
            misses: cache.misses,
        }
    }
}

impl Default for Decomposer {
    fn default() -> Self {
        Self::new(64)
    }
}

fn cache_key(description: &TaskDescription) -> TaskweaveResult<String> {
    let bytes = serde_json::to_vec(description)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn build_graph(description: &TaskDescription) -> TaskweaveResult<DependencyGraph> {
    let subtasks = match description {
        TaskDescription::Atomic(step) => {
            reject_ordering(step, "atomic")?;
            vec![to_subtask(step, step.capability.replace('.', "-"))?]
        }
        TaskDescription::Pipeline { steps } => {
            let mut subtasks: Vec<Subtask> = Vec::with_capacity(steps.len());
            for (i, step) in steps.iter().enumerate() {
                reject_ordering(step, "pipeline")?;
                let mut subtask = to_subtask(step, format!("step-{i}"))?;
                if let Some(previous) = subtasks.last() {
                    subtask = subtask.after(previous.id.clone());
                }
                subtasks.push(subtask);
            }
            subtasks
        }
        TaskDescription::FanOut {
            source,
            branches,
            join,
        } => {
            reject_ordering(source, "fan_out")?;
            let source = to_subtask(source, "source".to_string())?;
            let mut subtasks = Vec::with_capacity(branches.len() + 2);

            let mut branch_ids = Vec::with_capacity(branches.len());
            for (i, step) in branches.iter().enumerate() {
                reject_ordering(step, "fan_out")?;
                let branch = to_subtask(step, format!("branch-{i}"))?.after(source.id.clone());
                if let Some(other) = branch.references().find(|r| r.producer() != source.id) {
                    return Err(TaskweaveError::MalformedGraph(format!(
                        "Fan-out branch '{}' may only reference the source, not '{}'",
                        branch.id,
                        other.producer()
                    )));
                }
                branch_ids.push(branch.id.clone());
                subtasks.push(branch);
            }

            reject_ordering(join, "fan_out")?;
            let mut join = to_subtask(join, "join".to_string())?;
            if branch_ids.is_empty() {
                join = join.after(source.id.clone());
            }
            for id in branch_ids {
                join = join.after(id);
            }

            subtasks.insert(0, source);
            subtasks.push(join);
            subtasks
        }
        TaskDescription::Graph { subtasks: steps } => steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let subtask = to_subtask(step, format!("node-{i}"))?;
                Ok(step
                    .depends_on
                    .iter()
                    .fold(subtask, |task, dep| task.after(dep.clone())))
            })
            .collect::<TaskweaveResult<Vec<_>>>()?,
    };

    DependencyGraph::new(subtasks)
}

fn to_subtask(step: &StepSpec, default_id: String) -> TaskweaveResult<Subtask> {
    if step.capability.trim().is_empty() {
        return Err(TaskweaveError::MalformedGraph(
            "Step has an empty capability".to_string(),
        ));
    }
    let id = step.id.clone().unwrap_or(default_id);
    if id.is_empty() || id.contains('.') {
        return Err(TaskweaveError::MalformedGraph(format!(
            "Invalid subtask id '{id}': must be non-empty and contain no '.'"
        )));
    }
    Ok(Subtask::new(id, step.capability.clone()).with_inputs(step.inputs.clone()))
}

fn reject_ordering(step: &StepSpec, shape: &str) -> TaskweaveResult<()> {
    if step.depends_on.is_empty() {
        Ok(())
    } else {
        Err(TaskweaveError::MalformedGraph(format!(
            "Explicit depends_on is only supported in the graph shape, not {shape}"
        )))
    }
}
