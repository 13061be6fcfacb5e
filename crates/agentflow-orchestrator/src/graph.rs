use crate::workflow::Workflow;
use agentflow_core::{AgentflowError, AgentflowResult, RunContext};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

/// Step dependency graph of one workflow, resolved against an initial
/// context.
///
/// Edges come from explicit `depends_on` entries and from input keys
/// produced by another step. A key produced by a step always binds to that
/// step, even when the initial context also carries it. Building the graph
/// is the whole pre-flight check: a graph that builds is acyclic and every
/// input has a source.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// Step index → indices of the steps it waits for.
    dependencies: Vec<Vec<usize>>,
    /// Step index → indices of the steps waiting for it.
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Resolve and validate the graph of `workflow`.
    pub fn build(workflow: &Workflow, initial: &RunContext) -> AgentflowResult<Self> {
        let names: Vec<String> = workflow.steps.iter().map(|s| s.name.clone()).collect();
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut producers: HashMap<&str, usize> = HashMap::new();
        for (i, step) in workflow.steps.iter().enumerate() {
            for key in &step.outputs {
                if let Some(&other) = producers.get(key.as_str()) {
                    if other != i {
                        return Err(AgentflowError::Workflow(format!(
                            "output '{key}' is produced by both '{}' and '{}'",
                            names[other], step.name
                        )));
                    }
                }
                producers.insert(key.as_str(), i);
            }
        }

        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        for (i, step) in workflow.steps.iter().enumerate() {
            for dep in &step.depends_on {
                let Some(&d) = index.get(dep) else {
                    return Err(AgentflowError::Graph(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.name
                    )));
                };
                dependencies[i].push(d);
            }

            for key in &step.inputs {
                match producers.get(key.as_str()) {
                    Some(&p) => dependencies[i].push(p),
                    None if initial.contains(key) => {}
                    None => {
                        return Err(AgentflowError::Graph(format!(
                            "input '{key}' of step '{}' is neither in the initial context nor produced by any step",
                            step.name
                        )))
                    }
                }
            }

            // A condition on a produced key must wait for its producer.
            if let Some(&p) = step
                .condition
                .as_ref()
                .and_then(|c| producers.get(c.key.as_str()))
            {
                dependencies[i].push(p);
            }

            dependencies[i].sort_unstable();
            dependencies[i].dedup();
        }

        if let Some(cycle) = find_cycle(&dependencies) {
            let path: Vec<&str> = cycle.iter().map(|&i| names[i].as_str()).collect();
            return Err(AgentflowError::Graph(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); names.len()];
        for (i, deps) in dependencies.iter().enumerate() {
            for &d in deps {
                dependents[d].push(i);
            }
        }

        let order = topological_sort(&dependencies, &dependents);

        Ok(Self {
            names,
            index,
            dependencies,
            dependents,
            order,
        })
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no steps.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Step names in an order that respects every edge. Ties keep
    /// declaration order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Direct prerequisites of `step`. Empty for unknown steps.
    pub fn dependencies_of(&self, step: &str) -> Vec<&str> {
        self.index
            .get(step)
            .map(|&i| self.names_of(&self.dependencies[i]))
            .unwrap_or_default()
    }

    /// Steps that directly wait for `step`.
    pub fn dependents_of(&self, step: &str) -> Vec<&str> {
        self.index
            .get(step)
            .map(|&i| self.names_of(&self.dependents[i]))
            .unwrap_or_default()
    }

    /// Every step that depends on `step`, directly or not, in declaration order.
    pub fn transitive_dependents(&self, step: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(step) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::from([start]);
        while let Some(i) = queue.pop_front() {
            for &d in &self.dependents[i] {
                if !seen[d] {
                    seen[d] = true;
                    queue.push_back(d);
                }
            }
        }
        (0..self.len())
            .filter(|&i| seen[i])
            .map(|i| self.names[i].as_str())
            .collect()
    }

    pub(crate) fn dependency_indices(&self, i: usize) -> &[usize] {
        &self.dependencies[i]
    }

    pub(crate) fn dependent_indices(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }

    fn names_of(&self, indices: &[usize]) -> Vec<&str> {
        indices.iter().map(|&i| self.names[i].as_str()).collect()
    }
}

/// Depth-first search with three colours. Returns the first cycle found as
/// a closed path, e.g. `[a, b, a]`.
fn find_cycle(dependencies: &[Vec<usize>]) -> Option<Vec<usize>> {
    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;

    fn visit(
        node: usize,
        dependencies: &[Vec<usize>],
        color: &mut [u8],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        color[node] = GRAY;
        path.push(node);
        for &next in &dependencies[node] {
            match color[next] {
                GRAY => {
                    // back edge
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
                WHITE => {
                    if let Some(cycle) = visit(next, dependencies, color, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }
        path.pop();
        color[node] = BLACK;
        None
    }

    let mut color = vec![WHITE; dependencies.len()];
    let mut path = Vec::new();
    for node in 0..dependencies.len() {
        if color[node] == WHITE {
            if let Some(cycle) = visit(node, dependencies, &mut color, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Kahn's algorithm, lowest index first among ready nodes.
fn topological_sort(dependencies: &[Vec<usize>], dependents: &[Vec<usize>]) -> Vec<usize> {
    let mut remaining: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = remaining
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &d in &dependents[i] {
            remaining[d] -= 1;
            if remaining[d] == 0 {
                ready.push(Reverse(d));
            }
        }
    }
    order
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStep;

    fn workflow(steps: Vec<WorkflowStep>) -> Workflow {
        let mut builder = Workflow::builder("test");
        for step in steps {
            builder = builder.step(step);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_edges_from_inputs_and_explicit_deps() {
        let wf = workflow(vec![
            WorkflowStep::new("deploy", "ops").input("report").depends_on("build"),
            WorkflowStep::new("build", "coder").output("artifact"),
            WorkflowStep::new("test", "tester").input("artifact").output("report"),
        ]);
        let graph = DependencyGraph::build(&wf, &RunContext::new()).unwrap();
        assert_eq!(graph.topological_order(), vec!["build", "test", "deploy"]);
        assert_eq!(graph.dependencies_of("deploy"), vec!["build", "test"]);
        assert_eq!(graph.dependents_of("build"), vec!["deploy", "test"]);
        assert_eq!(graph.transitive_dependents("build"), vec!["deploy", "test"]);
        assert!(graph.dependencies_of("missing").is_empty());
    }

    #[test]
    fn test_independent_steps_keep_declaration_order() {
        let wf = workflow(vec![
            WorkflowStep::new("c", "x"),
            WorkflowStep::new("a", "x"),
            WorkflowStep::new("b", "x"),
        ]);
        let graph = DependencyGraph::build(&wf, &RunContext::new()).unwrap();
        assert_eq!(graph.topological_order(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_is_named() {
        let wf = workflow(vec![
            WorkflowStep::new("a", "x").input("from_b").output("from_a"),
            WorkflowStep::new("b", "x").input("from_a").output("from_b"),
        ]);
        let err = DependencyGraph::build(&wf, &RunContext::new()).unwrap_err();
        match err {
            AgentflowError::Graph(msg) => assert!(msg.contains("a -> b -> a"), "{msg}"),
            other => panic!("expected graph error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let wf = workflow(vec![WorkflowStep::new("loop", "x").depends_on("loop")]);
        let err = DependencyGraph::build(&wf, &RunContext::new()).unwrap_err();
        assert!(matches!(err, AgentflowError::Graph(ref m) if m.contains("loop -> loop")));
    }

    #[test]
    fn test_produced_key_binds_to_producer_over_context() {
        let wf = workflow(vec![
            WorkflowStep::new("refine", "x").input("draft").output("draft"),
        ]);
        let mut ctx = RunContext::new();
        ctx.insert("draft", "v0");
        let err = DependencyGraph::build(&wf, &ctx).unwrap_err();
        assert!(matches!(err, AgentflowError::Graph(_)));
    }

    #[test]
    fn test_missing_input_and_unknown_dependency() {
        let wf = workflow(vec![WorkflowStep::new("a", "x").input("nowhere")]);
        let err = DependencyGraph::build(&wf, &RunContext::new()).unwrap_err();
        assert!(matches!(err, AgentflowError::Graph(ref m) if m.contains("nowhere")));

        let mut ctx = RunContext::new();
        ctx.insert("nowhere", 1);
        assert!(DependencyGraph::build(&wf, &ctx).is_ok());

        let wf = workflow(vec![WorkflowStep::new("a", "x").depends_on("ghost")]);
        let err = DependencyGraph::build(&wf, &RunContext::new()).unwrap_err();
        assert!(matches!(err, AgentflowError::Graph(ref m) if m.contains("ghost")));
    }

    #[test]
    fn test_duplicate_producer_is_a_workflow_error() {
        let wf = workflow(vec![
            WorkflowStep::new("a", "x").output("report"),
            WorkflowStep::new("b", "x").output("report"),
        ]);
        let err = DependencyGraph::build(&wf, &RunContext::new()).unwrap_err();
        assert!(matches!(err, AgentflowError::Workflow(_)));
    }

    #[test]
    fn test_condition_key_orders_after_producer() {
        let wf = workflow(vec![
            WorkflowStep::new("ship", "ops").when("approved", true),
            WorkflowStep::new("review", "reviewer").output("approved"),
        ]);
        let graph = DependencyGraph::build(&wf, &RunContext::new()).unwrap();
        assert_eq!(graph.dependencies_of("ship"), vec!["review"]);
    }
}
