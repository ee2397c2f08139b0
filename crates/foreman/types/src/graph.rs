//! Dependency graph traversal: readiness, validation, and derived status
//!
//! # Key Concepts
//!
//! - Dependencies on composite tasks are expanded to their atomic
//!   descendants before any readiness or cycle decision
//! - A leaf inherits every ancestor's dependencies; the inherited set is
//!   computed by walking `parent_id` chains, never written back to tasks
//! - Composite status is derived bottom-up from leaves; composites are
//!   never scheduled and never sit in `Ready` or `Running`

use crate::{Task, TaskId, TaskStatus, Workflow, WorkflowError, WorkflowResult};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

// ── Validation ───────────────────────────────────────────────────────

/// Validate graph structure: referenced ids exist, no self-dependencies,
/// and the leaf-expanded dependency graph is acyclic
pub fn validate(workflow: &Workflow) -> WorkflowResult<()> {
    for task in workflow.tasks.values() {
        for dep_id in &task.dependency_task_ids {
            if *dep_id == task.id {
                return Err(WorkflowError::SelfDependency(task.id.clone()));
            }
            if !workflow.tasks.contains_key(dep_id) {
                return Err(WorkflowError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep_id.clone(),
                });
            }
        }
        for child_id in &task.subtask_ids {
            if !workflow.tasks.contains_key(child_id) {
                return Err(WorkflowError::ValidationError(format!(
                    "task {} references missing subtask {}",
                    task.id, child_id
                )));
            }
        }
        if let Some(parent_id) = &task.parent_id {
            if !workflow.tasks.contains_key(parent_id) {
                return Err(WorkflowError::ValidationError(format!(
                    "task {} references missing parent {}",
                    task.id, parent_id
                )));
            }
        }
    }
    check_acyclic(workflow)
}

/// Kahn's algorithm over the leaf-expanded graph of atomic tasks
fn check_acyclic(workflow: &Workflow) -> WorkflowResult<()> {
    let mut in_degree: BTreeMap<TaskId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<TaskId, Vec<TaskId>> = BTreeMap::new();

    for task in workflow.tasks.values().filter(|t| t.is_atomic()) {
        in_degree.entry(task.id.clone()).or_insert(0);
        for dep_id in effective_dependencies(workflow, &task.id) {
            if !workflow.tasks.contains_key(&dep_id) {
                continue;
            }
            *in_degree.entry(task.id.clone()).or_insert(0) += 1;
            dependents.entry(dep_id).or_default().push(task.id.clone());
        }
    }

    let mut queue: VecDeque<TaskId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut visited = 0usize;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(next) = dependents.get(&id) {
            for dependent in next {
                let deg = in_degree.entry(dependent.clone()).or_insert(0);
                *deg = deg.saturating_sub(1);
                if *deg == 0 {
                    queue.push_back(dependent.clone());
                }
            }
        }
    }

    if visited < in_degree.len() {
        let mut cycle: Vec<TaskId> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id)
            .collect();
        cycle.sort();
        return Err(WorkflowError::DependencyCycle(cycle));
    }
    Ok(())
}

// ── Expansion ────────────────────────────────────────────────────────

/// Atomic descendant ids of a task: the task itself when atomic,
/// otherwise every leaf reachable through its subtask tree
pub fn leaf_descendants(workflow: &Workflow, id: &TaskId) -> Vec<TaskId> {
    let mut leaves = Vec::new();
    let mut seen = HashSet::new();
    collect_leaves(workflow, id, &mut seen, &mut leaves);
    leaves.sort();
    leaves
}

fn collect_leaves(
    workflow: &Workflow,
    id: &TaskId,
    seen: &mut HashSet<TaskId>,
    out: &mut Vec<TaskId>,
) {
    if !seen.insert(id.clone()) {
        return;
    }
    let Some(task) = workflow.tasks.get(id) else {
        return;
    };
    if task.is_atomic() {
        out.push(task.id.clone());
    } else {
        for child in &task.subtask_ids {
            collect_leaves(workflow, child, seen, out);
        }
    }
}

/// Leaf-expanded dependencies a task must wait for: its own dependency
/// list plus every ancestor's, with composite entries replaced by their
/// atomic descendants. Unknown ids survive expansion so they can never
/// be satisfied.
pub fn effective_dependencies(workflow: &Workflow, id: &TaskId) -> BTreeSet<TaskId> {
    let mut raw: BTreeSet<TaskId> = BTreeSet::new();
    let mut cursor = Some(id.clone());
    let mut seen = HashSet::new();
    while let Some(current) = cursor {
        if !seen.insert(current.clone()) {
            break;
        }
        match workflow.tasks.get(&current) {
            Some(task) => {
                raw.extend(task.dependency_task_ids.iter().cloned());
                cursor = task.parent_id.clone();
            }
            None => break,
        }
    }

    let mut expanded = BTreeSet::new();
    for dep_id in raw {
        match workflow.tasks.get(&dep_id) {
            Some(dep) if dep.is_composite() => {
                expanded.extend(leaf_descendants(workflow, &dep.id));
            }
            _ => {
                expanded.insert(dep_id);
            }
        }
    }
    expanded.remove(id);
    expanded
}

// ── Readiness ────────────────────────────────────────────────────────

/// Mark every startable atomic task `Ready` and return their ids.
///
/// A task is startable when it is atomic, its status is `Pending` or
/// `Ready`, and every effective dependency is `Completed`. A failed
/// dependency never counts as satisfied. The first time a task becomes
/// ready its `deps_ready_at` is stamped with `now`.
pub fn compute_ready(workflow: &mut Workflow, now: DateTime<Utc>) -> Vec<TaskId> {
    let completed: HashSet<TaskId> = workflow
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id.clone())
        .collect();

    let mut ready = Vec::new();
    let candidates: Vec<TaskId> = workflow
        .tasks
        .values()
        .filter(|t| {
            t.is_atomic() && matches!(t.status, TaskStatus::Pending | TaskStatus::Ready)
        })
        .map(|t| t.id.clone())
        .collect();

    for id in candidates {
        let satisfied = effective_dependencies(workflow, &id)
            .iter()
            .all(|dep| completed.contains(dep));
        if satisfied {
            if let Some(task) = workflow.tasks.get_mut(&id) {
                task.status = TaskStatus::Ready;
                if task.deps_ready_at.is_none() {
                    task.deps_ready_at = Some(now);
                }
                ready.push(id);
            }
        }
    }
    ready.sort();
    ready
}

// ── Derived Status ───────────────────────────────────────────────────

/// Propagate completion into composites: a composite becomes `Completed`
/// exactly when every atomic descendant is `Completed`. Runs to a
/// fixpoint so nested composites complete bottom-up in one call.
pub fn propagate_completion(workflow: &mut Workflow, now: DateTime<Utc>) {
    loop {
        let mut newly_completed = Vec::new();
        for task in workflow.tasks.values() {
            if task.is_atomic() || task.status == TaskStatus::Completed {
                continue;
            }
            let leaves = leaf_descendants(workflow, &task.id);
            if !leaves.is_empty()
                && leaves.iter().all(|leaf| {
                    workflow
                        .tasks
                        .get(leaf)
                        .map(|t| t.status == TaskStatus::Completed)
                        .unwrap_or(false)
                })
            {
                newly_completed.push(task.id.clone());
            }
        }
        if newly_completed.is_empty() {
            break;
        }
        for id in newly_completed {
            if let Some(task) = workflow.tasks.get_mut(&id) {
                task.status = TaskStatus::Completed;
                if task.completed_at.is_none() {
                    task.completed_at = Some(now);
                }
            }
        }
    }
}

/// Recompute `effective_status` on every task and normalize composite
/// `status` values that drifted into `Ready`/`Running`
pub fn refresh_effective_status(workflow: &mut Workflow) {
    let ids: Vec<TaskId> = workflow.tasks.keys().cloned().collect();
    for id in &ids {
        let derived = derive_status(workflow, id);
        if let Some(task) = workflow.tasks.get_mut(id) {
            if task.is_composite()
                && matches!(task.status, TaskStatus::Ready | TaskStatus::Running)
            {
                task.status = TaskStatus::Pending;
            }
            task.effective_status = derived;
        }
    }
}

fn derive_status(workflow: &Workflow, id: &TaskId) -> TaskStatus {
    let Some(task) = workflow.tasks.get(id) else {
        return TaskStatus::Pending;
    };
    if task.is_atomic() {
        return task.status;
    }
    let leaves = leaf_descendants(workflow, id);
    let statuses: Vec<TaskStatus> = leaves
        .iter()
        .filter_map(|leaf| workflow.tasks.get(leaf).map(|t| t.status))
        .collect();
    if !statuses.is_empty() && statuses.iter().all(|s| *s == TaskStatus::Completed) {
        TaskStatus::Completed
    } else if statuses.iter().any(|s| *s == TaskStatus::Running) {
        TaskStatus::Running
    } else if statuses.iter().any(|s| *s == TaskStatus::Ready) {
        TaskStatus::Ready
    } else {
        TaskStatus::Pending
    }
}

/// Convenience wrapper: propagate completion then refresh derived status
pub fn refresh_derived_state(workflow: &mut Workflow, now: DateTime<Utc>) {
    propagate_completion(workflow, now);
    refresh_effective_status(workflow);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_workflow() -> Workflow {
        Workflow::new("graph tests", "exercise traversal")
    }

    fn add_task(wf: &mut Workflow, id: &str, deps: &[&str]) {
        let task = Task::new(id, "")
            .with_id(TaskId::new(id))
            .with_dependencies(deps.iter().map(|d| TaskId::new(*d)).collect());
        wf.add_task(task).unwrap();
    }

    fn add_composite(wf: &mut Workflow, id: &str, children: &[&str]) {
        let mut task = Task::new(id, "").with_id(TaskId::new(id));
        task.subtask_ids = children.iter().map(|c| TaskId::new(*c)).collect();
        wf.add_task(task).unwrap();
        for child in children {
            wf.tasks.get_mut(&TaskId::new(*child)).unwrap().parent_id = Some(TaskId::new(id));
        }
    }

    fn complete(wf: &mut Workflow, id: &str) {
        wf.tasks.get_mut(&TaskId::new(id)).unwrap().status = TaskStatus::Completed;
    }

    #[test]
    fn test_chain_readiness_progresses_one_at_a_time() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &[]);
        add_task(&mut wf, "b", &["a"]);
        add_task(&mut wf, "c", &["b"]);

        let ready = compute_ready(&mut wf, Utc::now());
        assert_eq!(ready, vec![TaskId::new("a")]);

        complete(&mut wf, "a");
        let ready = compute_ready(&mut wf, Utc::now());
        assert_eq!(ready, vec![TaskId::new("b")]);

        complete(&mut wf, "b");
        let ready = compute_ready(&mut wf, Utc::now());
        assert_eq!(ready, vec![TaskId::new("c")]);
    }

    #[test]
    fn test_composite_dependency_expands_to_all_leaves() {
        let mut wf = make_workflow();
        add_task(&mut wf, "p1", &[]);
        add_task(&mut wf, "p2", &[]);
        add_composite(&mut wf, "phase", &["p1", "p2"]);
        add_task(&mut wf, "after", &["phase"]);

        let deps = effective_dependencies(&wf, &TaskId::new("after"));
        assert!(deps.contains(&TaskId::new("p1")));
        assert!(deps.contains(&TaskId::new("p2")));
        assert!(!deps.contains(&TaskId::new("phase")));

        complete(&mut wf, "p1");
        let ready = compute_ready(&mut wf, Utc::now());
        assert!(!ready.contains(&TaskId::new("after")));

        complete(&mut wf, "p2");
        let ready = compute_ready(&mut wf, Utc::now());
        assert!(ready.contains(&TaskId::new("after")));
    }

    #[test]
    fn test_leaf_inherits_ancestor_dependencies() {
        let mut wf = make_workflow();
        add_task(&mut wf, "setup", &[]);
        add_task(&mut wf, "child", &[]);
        add_composite(&mut wf, "phase", &["child"]);
        wf.tasks
            .get_mut(&TaskId::new("phase"))
            .unwrap()
            .dependency_task_ids = vec![TaskId::new("setup")];

        let ready = compute_ready(&mut wf, Utc::now());
        assert!(ready.contains(&TaskId::new("setup")));
        assert!(!ready.contains(&TaskId::new("child")));

        complete(&mut wf, "setup");
        let ready = compute_ready(&mut wf, Utc::now());
        assert!(ready.contains(&TaskId::new("child")));
    }

    #[test]
    fn test_composite_never_marked_ready() {
        let mut wf = make_workflow();
        add_task(&mut wf, "p1", &[]);
        add_composite(&mut wf, "phase", &["p1"]);

        let ready = compute_ready(&mut wf, Utc::now());
        assert_eq!(ready, vec![TaskId::new("p1")]);
        assert_eq!(
            wf.task(&TaskId::new("phase")).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[test]
    fn test_failed_dependency_blocks_readiness() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &[]);
        add_task(&mut wf, "b", &["a"]);
        wf.tasks.get_mut(&TaskId::new("a")).unwrap().status = TaskStatus::Failed;

        let ready = compute_ready(&mut wf, Utc::now());
        assert!(ready.is_empty());
    }

    #[test]
    fn test_deps_ready_at_stamped_once() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &[]);

        let first = Utc::now();
        compute_ready(&mut wf, first);
        let stamp = wf.task(&TaskId::new("a")).unwrap().deps_ready_at;
        assert_eq!(stamp, Some(first));

        compute_ready(&mut wf, first + chrono::Duration::seconds(30));
        assert_eq!(wf.task(&TaskId::new("a")).unwrap().deps_ready_at, stamp);
    }

    #[test]
    fn test_cycle_detected() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &["c"]);
        add_task(&mut wf, "b", &["a"]);
        add_task(&mut wf, "c", &["b"]);

        let result = validate(&wf);
        assert!(matches!(result, Err(WorkflowError::DependencyCycle(_))));
        if let Err(WorkflowError::DependencyCycle(cycle)) = result {
            assert_eq!(cycle.len(), 3);
        }
    }

    #[test]
    fn test_acyclic_graph_validates() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &[]);
        add_task(&mut wf, "b", &["a"]);
        add_task(&mut wf, "c", &["a", "b"]);
        assert!(validate(&wf).is_ok());
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &["ghost"]);
        let result = validate(&wf);
        assert!(matches!(
            result,
            Err(WorkflowError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &["a"]);
        assert!(matches!(
            validate(&wf),
            Err(WorkflowError::SelfDependency(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_never_satisfied() {
        let mut wf = make_workflow();
        add_task(&mut wf, "a", &["ghost"]);
        let ready = compute_ready(&mut wf, Utc::now());
        assert!(ready.is_empty());
    }

    #[test]
    fn test_nested_composite_completion_propagates_bottom_up() {
        let mut wf = make_workflow();
        add_task(&mut wf, "ga", &[]);
        add_task(&mut wf, "gb", &["ga"]);
        add_composite(&mut wf, "inner", &["ga", "gb"]);
        add_task(&mut wf, "hb1", &[]);
        add_composite(&mut wf, "outer", &["inner", "hb1"]);

        complete(&mut wf, "ga");
        complete(&mut wf, "gb");
        propagate_completion(&mut wf, Utc::now());
        assert_eq!(
            wf.task(&TaskId::new("inner")).unwrap().status,
            TaskStatus::Completed
        );
        assert_eq!(
            wf.task(&TaskId::new("outer")).unwrap().status,
            TaskStatus::Pending
        );

        complete(&mut wf, "hb1");
        propagate_completion(&mut wf, Utc::now());
        let outer = wf.task(&TaskId::new("outer")).unwrap();
        assert_eq!(outer.status, TaskStatus::Completed);
        assert!(outer.completed_at.is_some());
    }

    #[test]
    fn test_effective_status_rules() {
        let mut wf = make_workflow();
        add_task(&mut wf, "x", &[]);
        add_task(&mut wf, "y", &[]);
        add_composite(&mut wf, "phase", &["x", "y"]);

        refresh_effective_status(&mut wf);
        assert_eq!(
            wf.task(&TaskId::new("phase")).unwrap().effective_status,
            TaskStatus::Pending
        );

        wf.tasks.get_mut(&TaskId::new("x")).unwrap().status = TaskStatus::Ready;
        refresh_effective_status(&mut wf);
        assert_eq!(
            wf.task(&TaskId::new("phase")).unwrap().effective_status,
            TaskStatus::Ready
        );

        wf.tasks.get_mut(&TaskId::new("y")).unwrap().status = TaskStatus::Running;
        refresh_effective_status(&mut wf);
        assert_eq!(
            wf.task(&TaskId::new("phase")).unwrap().effective_status,
            TaskStatus::Running
        );

        complete(&mut wf, "x");
        complete(&mut wf, "y");
        refresh_effective_status(&mut wf);
        assert_eq!(
            wf.task(&TaskId::new("phase")).unwrap().effective_status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn test_composite_status_normalized_from_running() {
        let mut wf = make_workflow();
        add_task(&mut wf, "x", &[]);
        add_composite(&mut wf, "phase", &["x"]);
        wf.tasks.get_mut(&TaskId::new("phase")).unwrap().status = TaskStatus::Running;

        refresh_effective_status(&mut wf);
        assert_eq!(
            wf.task(&TaskId::new("phase")).unwrap().status,
            TaskStatus::Pending
        );
    }
}
