//! Dependency graph over plan steps.
//!
//! Steps stay in the plan's flat array and every edge is a plain index into
//! it. Edges point from a step to the steps it depends on; array order says
//! nothing about execution order, so cycles are searched on the raw graph.

use crate::internal::plan::ir::Plan;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    // step -> steps it waits for
    dependencies: Vec<Vec<usize>>,
    // step -> steps waiting for it
    dependents: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl DependencyGraph {
    /// Builds the graph and rejects out-of-range indices and cycles.
    pub fn build(plan: &Plan) -> Result<Self, GraphError> {
        let graph = Self::from_plan(plan)?;
        if let Some(cycle) = graph.find_cycle() {
            return Err(GraphError::CircularDependency { cycle });
        }
        Ok(graph)
    }

    /// Builds the graph checking index bounds only.
    pub fn from_plan(plan: &Plan) -> Result<Self, GraphError> {
        let len = plan.steps.len();
        let mut dependencies = Vec::with_capacity(len);
        let mut dependents = vec![Vec::new(); len];

        for (step, definition) in plan.steps.iter().enumerate() {
            let mut deps: Vec<usize> = Vec::new();
            for &index in definition.dependencies() {
                if index >= len {
                    return Err(GraphError::InvalidDependency { step, index, len });
                }
                if !deps.contains(&index) {
                    deps.push(index);
                    dependents[index].push(step);
                }
            }
            dependencies.push(deps);
        }

        Ok(Self {
            dependencies,
            dependents,
        })
    }

    /// Accept/reject verdict for a plan without keeping the graph around.
    pub fn check(plan: &Plan) -> Result<(), GraphError> {
        Self::build(plan).map(|_| ())
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn dependencies(&self, step: usize) -> &[usize] {
        self.dependencies.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, step: usize) -> &[usize] {
        self.dependents.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Steps without dependencies.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&step| self.dependencies[step].is_empty())
            .collect()
    }

    /// True when every dependency of `step` has been attempted.
    pub fn is_ready(&self, step: usize, attempted: impl Fn(usize) -> bool) -> bool {
        self.dependencies(step).iter().all(|&dep| attempted(dep))
    }

    /// Three-colour depth-first search. Returns the closed path, first node
    /// repeated at the end, e.g. `[0, 2, 1, 0]`.
    pub fn find_cycle(&self) -> Option<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut path: Vec<usize> = Vec::new();

        for start in 0..self.len() {
            if marks[start] != Mark::Unvisited {
                continue;
            }

            marks[start] = Mark::InProgress;
            path.push(start);
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                let next = self.dependencies[node].get(frame.1).copied();
                frame.1 += 1;

                match next {
                    Some(next) => match marks[next] {
                        Mark::Unvisited => {
                            marks[next] = Mark::InProgress;
                            path.push(next);
                            stack.push((next, 0));
                        }
                        Mark::InProgress => {
                            let from = path.iter().position(|&n| n == next).unwrap_or(0);
                            let mut cycle = path[from..].to_vec();
                            cycle.push(next);
                            return Some(cycle);
                        }
                        Mark::Done => {}
                    },
                    None => {
                        marks[node] = Mark::Done;
                        path.pop();
                        stack.pop();
                    }
                }
            }
        }

        None
    }
}

fn format_cycle(cycle: &[usize]) -> String {
    cycle
        .iter()
        .map(|step| format!("step {}", step))
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Invalid dependency index {index} in step {step} (plan has {len} steps)")]
    InvalidDependency { step: usize, index: usize, len: usize },
    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    CircularDependency { cycle: Vec<usize> },
}
