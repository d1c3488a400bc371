/// Pre-flight pipeline validation
///
/// Builds a petgraph DAG from the declared steps and rejects broken
/// pipelines before any backend is touched: duplicate ids, dependencies on
/// unknown steps, dependency cycles, and sequential-mode templates that
/// address steps by name. Cycles are reported as the deadlock they would
/// become at runtime, naming every step that can never become runnable.

use crate::error::OrchestratorError;
use crate::job::types::{effective_ids, is_dag_mode, Step};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Validate a pipeline definition, returning the effective step ids in
/// declaration order
pub fn validate_pipeline(steps: &[Step]) -> Result<Vec<String>, OrchestratorError> {
    if steps.is_empty() {
        return Err(OrchestratorError::Validation(
            "pipeline has no steps".to_string(),
        ));
    }

    let ids = effective_ids(steps);

    let mut seen = HashSet::new();
    for id in &ids {
        if !seen.insert(id.as_str()) {
            return Err(OrchestratorError::Validation(format!(
                "duplicate step id: '{id}'"
            )));
        }
    }

    let id_set: HashSet<&str> = ids.iter().map(String::as_str).collect();
    for (step, id) in steps.iter().zip(&ids) {
        for dep in &step.depends_on {
            if !id_set.contains(dep.as_str()) {
                return Err(OrchestratorError::Validation(format!(
                    "step '{id}' depends on unknown step '{dep}'"
                )));
            }
            if dep == id {
                return Err(OrchestratorError::Validation(format!(
                    "step '{id}' depends on itself"
                )));
            }
        }
    }

    if is_dag_mode(steps) {
        check_acyclic(steps, &ids)?;
    } else {
        check_sequential_references(steps)?;
    }

    Ok(ids)
}

/// Build the dependency graph and verify it has a topological order
///
/// On a cycle the error lists the steps that would deadlock: everything
/// left after repeatedly peeling nodes whose dependencies are all peeled.
fn check_acyclic(steps: &[Step], ids: &[String]) -> Result<(), OrchestratorError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for id in ids {
        let idx = graph.add_node(id.as_str());
        indices.insert(id.as_str(), idx);
    }
    for (step, id) in steps.iter().zip(ids) {
        for dep in &step.depends_on {
            graph.add_edge(indices[dep.as_str()], indices[id.as_str()], ());
        }
    }

    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    // Kahn-style peel: whatever cannot be removed participates in (or sits
    // behind) a cycle
    let mut remaining: HashSet<NodeIndex> = graph.node_indices().collect();
    loop {
        let peelable: Vec<NodeIndex> = remaining
            .iter()
            .copied()
            .filter(|&n| {
                graph
                    .neighbors_directed(n, petgraph::Direction::Incoming)
                    .all(|dep| !remaining.contains(&dep))
            })
            .collect();
        if peelable.is_empty() {
            break;
        }
        for n in peelable {
            remaining.remove(&n);
        }
    }

    let mut stuck: Vec<String> = ids
        .iter()
        .filter(|id| remaining.contains(&indices[id.as_str()]))
        .cloned()
        .collect();
    stuck.sort();
    Err(OrchestratorError::Deadlock(stuck))
}

/// Sequential pipelines expose results by index only; reject templates that
/// address steps by a name that can never exist
fn check_sequential_references(steps: &[Step]) -> Result<(), OrchestratorError> {
    for (i, step) in steps.iter().enumerate() {
        for value in step.input.values() {
            check_value_references(value, i)?;
        }
        if let Some(template) = &step.for_each {
            check_string_references(template, i)?;
        }
    }
    Ok(())
}

fn check_value_references(value: &Value, step_index: usize) -> Result<(), OrchestratorError> {
    match value {
        Value::String(s) => check_string_references(s, step_index),
        Value::Array(items) => items
            .iter()
            .try_for_each(|v| check_value_references(v, step_index)),
        Value::Object(map) => map
            .values()
            .try_for_each(|v| check_value_references(v, step_index)),
        _ => Ok(()),
    }
}

fn check_string_references(s: &str, step_index: usize) -> Result<(), OrchestratorError> {
    let mut rest = s;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else { break };
        let path = after[..close].trim();

        if let Some(key) = path.strip_prefix("steps.") {
            let segment = key.split('.').next().unwrap_or("");
            let by_index = segment.parse::<usize>().is_ok();
            let by_alias = segment
                .strip_prefix("step_")
                .is_some_and(|n| n.parse::<usize>().is_ok());
            if !by_index && !by_alias {
                return Err(OrchestratorError::Validation(format!(
                    "step {step_index} references '{path}': sequential pipelines expose step results by index only (use steps.<n> or name your steps to enable DAG mode)"
                )));
            }
        }
        rest = &after[close + 2..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: Option<&str>, deps: &[&str]) -> Step {
        serde_json::from_value(json!({
            "task": "t",
            "id": id,
            "dependsOn": deps,
        }))
        .unwrap()
    }

    #[test]
    fn accepts_valid_dag() {
        let steps = vec![
            step(Some("a"), &[]),
            step(Some("b"), &["a"]),
            step(Some("c"), &["a", "b"]),
        ];
        let ids = validate_pipeline(&steps).unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn synthesizes_missing_ids() {
        let steps = vec![step(Some("a"), &[]), step(None, &["a"])];
        let ids = validate_pipeline(&steps).unwrap();
        assert_eq!(ids, vec!["a", "step_1"]);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let steps = vec![step(Some("a"), &[]), step(Some("a"), &[])];
        let err = validate_pipeline(&steps).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let steps = vec![step(Some("a"), &["ghost"])];
        let err = validate_pipeline(&steps).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn cycle_reports_deadlock_with_both_steps() {
        let steps = vec![step(Some("a"), &["b"]), step(Some("b"), &["a"])];
        match validate_pipeline(&steps).unwrap_err() {
            OrchestratorError::Deadlock(stuck) => {
                assert_eq!(stuck, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected deadlock, got {other:?}"),
        }
    }

    #[test]
    fn cycle_peel_excludes_independent_steps() {
        let steps = vec![
            step(Some("free"), &[]),
            step(Some("x"), &["y"]),
            step(Some("y"), &["x"]),
        ];
        match validate_pipeline(&steps).unwrap_err() {
            OrchestratorError::Deadlock(stuck) => {
                assert_eq!(stuck, vec!["x".to_string(), "y".to_string()]);
            }
            other => panic!("expected deadlock, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_pipeline() {
        assert!(validate_pipeline(&[]).is_err());
    }

    #[test]
    fn sequential_mode_rejects_named_step_references() {
        let steps: Vec<Step> = serde_json::from_value(json!([
            {"task": "t"},
            {"task": "u", "input": {"prev": "{{steps.extract.out}}"}}
        ]))
        .unwrap();
        let err = validate_pipeline(&steps).unwrap_err();
        assert!(err.to_string().contains("steps.extract.out"));
    }

    #[test]
    fn sequential_mode_accepts_index_references() {
        let steps: Vec<Step> = serde_json::from_value(json!([
            {"task": "t"},
            {"task": "u", "input": {"prev": "{{steps.0.out}}", "alias": "{{steps.step_0.out}}"}}
        ]))
        .unwrap();
        assert!(validate_pipeline(&steps).is_ok());
    }
}
