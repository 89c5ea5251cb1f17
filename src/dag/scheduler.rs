// src/dag/scheduler.rs

//! Topological, dependency-respecting parallel dispatch of step tasks.
//!
//! The scheduler knows nothing about steps or policies: it runs named
//! fallible tasks such that a vertex starts only after every predecessor
//! has returned. Whether a dependent should actually do anything after a
//! failed predecessor is policy, decided inside the task itself.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use anyhow::anyhow;
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tokio::task::JoinSet;
use tracing::debug;

use crate::errors::{Accumulator, DagrunError, Result};

/// The body of a vertex: a boxed future resolving to the task's result.
pub type VertexFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct Vertex {
    name: String,
    task: VertexFuture,
}

/// A one-shot parallel DAG runner.
///
/// Guarantees:
/// - a vertex's task begins only after every predecessor's task has
///   returned (errors and panics count as returned);
/// - independent vertices run concurrently, unbounded;
/// - `run` returns only after every scheduled task has returned;
/// - graph validation happens before any task runs.
#[derive(Default)]
pub struct DagScheduler {
    vertices: Vec<Vertex>,
    index: HashMap<String, usize>,
    edges: Vec<(String, String)>,
}

impl DagScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named vertex. Re-adding a name replaces its task.
    pub fn add_vertex(&mut self, name: impl Into<String>, task: VertexFuture) {
        let name = name.into();
        match self.index.get(&name) {
            Some(&i) => self.vertices[i].task = task,
            None => {
                self.index.insert(name.clone(), self.vertices.len());
                self.vertices.push(Vertex { name, task });
            }
        }
    }

    /// Add an edge: `from` must return before `to` may start.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.edges.push((from.into(), to.into()));
    }

    fn validate(&self) -> Result<()> {
        for (from, to) in &self.edges {
            for name in [from, to] {
                if !self.index.contains_key(name) {
                    return Err(DagrunError::MissingVertex(name.clone()));
                }
            }
        }

        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..self.vertices.len() {
            graph.add_node(i);
        }
        for (from, to) in &self.edges {
            graph.add_edge(self.index[from], self.index[to], ());
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(DagrunError::DependencyCycle(
                self.vertices[cycle.node_id()].name.clone(),
            )),
        }
    }

    /// Validate the graph, then run every task, releasing dependents as
    /// their predecessors return. Task errors are aggregated.
    pub async fn run(self) -> Result<()> {
        self.validate()?;

        let vertex_count = self.vertices.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); vertex_count];
        let mut indegree: Vec<usize> = vec![0; vertex_count];
        let mut unique = HashSet::new();
        for (from, to) in &self.edges {
            let (f, t) = (self.index[from], self.index[to]);
            if unique.insert((f, t)) {
                dependents[f].push(t);
                indegree[t] += 1;
            }
        }

        let mut names = Vec::with_capacity(vertex_count);
        let mut tasks: Vec<Option<VertexFuture>> = Vec::with_capacity(vertex_count);
        for vertex in self.vertices {
            names.push(vertex.name);
            tasks.push(Some(vertex.task));
        }

        let mut join_set: JoinSet<(usize, Result<()>)> = JoinSet::new();
        let mut by_task_id: HashMap<tokio::task::Id, usize> = HashMap::new();

        let spawn = |i: usize,
                         tasks: &mut Vec<Option<VertexFuture>>,
                         join_set: &mut JoinSet<(usize, Result<()>)>,
                         by_task_id: &mut HashMap<tokio::task::Id, usize>| {
            if let Some(task) = tasks[i].take() {
                debug!(step = %names[i], "dispatching vertex");
                let handle = join_set.spawn(async move { (i, task.await) });
                by_task_id.insert(handle.id(), i);
            }
        };

        for i in 0..vertex_count {
            if indegree[i] == 0 {
                spawn(i, &mut tasks, &mut join_set, &mut by_task_id);
            }
        }

        let mut acc = Accumulator::new();
        while let Some(joined) = join_set.join_next_with_id().await {
            let (done, result) = match joined {
                Ok((_id, (i, res))) => (i, res),
                Err(err) => {
                    let Some(&i) = by_task_id.get(&err.id()) else {
                        continue;
                    };
                    (i, Err(DagrunError::Other(anyhow!("step task panicked: {err}"))))
                }
            };
            acc.record(result);

            // Dependents are released even when the predecessor errored:
            // step-level skipping is policy, not scheduling.
            for i in 0..dependents[done].len() {
                let dep = dependents[done][i];
                indegree[dep] -= 1;
                if indegree[dep] == 0 {
                    spawn(dep, &mut tasks, &mut join_set, &mut by_task_id);
                }
            }
        }

        acc.into_result()
    }
}
