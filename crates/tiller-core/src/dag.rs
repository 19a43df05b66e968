// DAG validation and layered topological sort
//
// Pure functions: no I/O, no clocks. The output layer order is significant;
// the order of names inside one layer is not, and callers must not rely on it.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{EngineError, Result};
use crate::model::Task;

/// Compute parallel execution layers for a set of sibling tasks.
///
/// Each returned layer contains task names whose dependencies are all
/// satisfied by earlier layers; tasks within one layer are mutually
/// independent and may run concurrently.
///
/// Errors with `UnknownDependency` when a dependency names no sibling,
/// `DuplicateTask` when two siblings share a name, and `DependencyCycle`
/// when the graph is not acyclic.
pub fn execution_layers(tasks: &[Task]) -> Result<Vec<Vec<String>>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::with_capacity(tasks.len());
    let mut names: HashSet<&str> = HashSet::with_capacity(tasks.len());

    for task in tasks {
        if !names.insert(task.name.as_str()) {
            return Err(EngineError::DuplicateTask(task.name.clone()));
        }
        in_degree.entry(task.name.as_str()).or_insert(0);
        adjacency.entry(task.name.as_str()).or_default();
    }

    for task in tasks {
        for dep in &task.dependencies {
            if !names.contains(dep.as_str()) {
                return Err(EngineError::UnknownDependency {
                    task: task.name.clone(),
                    dependency: dep.clone(),
                });
            }
            if let Some(dependents) = adjacency.get_mut(dep.as_str()) {
                dependents.push(task.name.as_str());
            }
            if let Some(degree) = in_degree.get_mut(task.name.as_str()) {
                *degree += 1;
            }
        }
    }

    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut processed = 0usize;

    while !ready.is_empty() {
        let layer: Vec<&str> = ready.drain(..).collect();
        processed += layer.len();

        for name in &layer {
            for dependent in &adjacency[name] {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(*dependent);
                    }
                }
            }
        }

        layers.push(layer.into_iter().map(String::from).collect());
    }

    if processed != tasks.len() {
        return Err(EngineError::DependencyCycle);
    }

    Ok(layers)
}

/// Validate that the task graph is a well-formed DAG
pub fn validate(tasks: &[Task]) -> Result<()> {
    execution_layers(tasks).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn task(name: &str, deps: &[&str]) -> Task {
        Task::new(Uuid::nil(), name, "noop", json!({}))
            .with_dependencies(deps.iter().map(|d| d.to_string()).collect())
    }

    #[test]
    fn test_linear_chain() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        let layers = execution_layers(&tasks).unwrap();
        assert_eq!(layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_diamond() {
        let tasks = vec![
            task("fetch", &[]),
            task("p1", &["fetch"]),
            task("p2", &["fetch"]),
            task("merge", &["p1", "p2"]),
        ];
        let layers = execution_layers(&tasks).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec!["fetch"]);
        let mut middle = layers[1].clone();
        middle.sort();
        assert_eq!(middle, vec!["p1", "p2"]);
        assert_eq!(layers[2], vec!["merge"]);
    }

    #[test]
    fn test_independent_tasks_share_a_layer() {
        let tasks = vec![task("x", &[]), task("y", &[]), task("z", &[])];
        let layers = execution_layers(&tasks).unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 3);
    }

    #[test]
    fn test_cycle_rejected() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(matches!(
            execution_layers(&tasks),
            Err(EngineError::DependencyCycle)
        ));
    }

    #[test]
    fn test_self_cycle_rejected() {
        let tasks = vec![task("a", &["a"])];
        assert!(matches!(
            execution_layers(&tasks),
            Err(EngineError::DependencyCycle)
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let tasks = vec![task("a", &["ghost"])];
        match execution_layers(&tasks) {
            Err(EngineError::UnknownDependency { task, dependency }) => {
                assert_eq!(task, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let tasks = vec![task("a", &[]), task("a", &[])];
        assert!(matches!(
            execution_layers(&tasks),
            Err(EngineError::DuplicateTask(name)) if name == "a"
        ));
    }

    #[test]
    fn test_empty_graph_yields_no_layers() {
        assert!(execution_layers(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_dependencies_always_in_earlier_layers() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
            task("e", &["a", "d"]),
        ];
        let layers = execution_layers(&tasks).unwrap();
        let position: HashMap<&str, usize> = layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| layer.iter().map(move |name| (name.as_str(), i)))
            .collect();
        for t in &tasks {
            for dep in &t.dependencies {
                assert!(
                    position[dep.as_str()] < position[t.name.as_str()],
                    "dependency {dep} not before {}",
                    t.name
                );
            }
        }
    }
}
