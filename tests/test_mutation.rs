//! Branch resolution, loop and replicate splices on live graphs

mod common;

use jobgraph::{
    Branch, BranchResolution, FlowScript, GraphError, JobDefinition, JobGraph, JobKind, LoopSplice,
    ReplicateSplice, Task, TaskDefinition, TaskId, TaskSet, TaskStatus,
};
use pretty_assertions::assert_eq;
use std::collections::HashSet;

fn run(job: &JobGraph, id: TaskId) {
    assert!(job.dispatch(id).unwrap(), "task {} not eligible", id);
    job.terminate(id, false).unwrap();
}

// X -IF-> Y | Z with join J; Y -> Q; Z -> Zb
fn branch_job() -> JobGraph {
    let definition = JobDefinition::new("branch", JobKind::TaskFlow)
        .task(TaskDefinition::new("X").with_flow(FlowScript::if_else("Y", "Z", Some("J".into()))))
        .task(TaskDefinition::new("Y"))
        .task(TaskDefinition::new("Q").depends_on(["Y"]))
        .task(TaskDefinition::new("Z"))
        .task(TaskDefinition::new("Zb").depends_on(["Z"]))
        .task(TaskDefinition::new("J"));
    JobGraph::from_definition(&definition, common::config()).unwrap()
}

#[test]
fn test_if_with_join() -> anyhow::Result<()> {
    let job = branch_job();
    let (x, y, q, z, zb, j) = (TaskId(0), TaskId(1), TaskId(2), TaskId(3), TaskId(4), TaskId(5));
    let y_children = job.node(y).unwrap().children;

    job.dispatch(x)?;
    let resolution = job.branch_resolution(x, Branch::If, y)?;
    assert_eq!(resolution.not_taken, Some(z));
    job.resolve_branch(&resolution)?;
    job.terminate(x, false)?;

    // the else side never shows up again
    for id in [z, zb] {
        assert_eq!(job.locate(id), None);
        assert_eq!(job.node(id).unwrap().remaining_parents, 0);
    }
    assert!(job.branch_pending().is_empty());
    assert_eq!(job.eligible(), vec![y]);

    assert_eq!(job.node(y).unwrap().children, vec![j]);
    assert_eq!(job.node(j).unwrap().children, y_children);
    assert_eq!(job.node(q).unwrap().parents, vec![j]);

    run(&job, y);
    assert_eq!(job.eligible(), vec![j]);
    run(&job, j);
    assert_eq!(job.eligible(), vec![q]);
    run(&job, q);
    for set in TaskSet::ALL {
        assert!(job.sets().is_empty(set));
    }
    Ok(())
}

#[test]
fn test_not_taken_branch_drops_nested_if() -> anyhow::Result<()> {
    // X -IF-> Y | Z with join J; Z -> Z2; Z2 -IF-> P | Q
    let definition = JobDefinition::new("nested", JobKind::TaskFlow)
        .task(TaskDefinition::new("X").with_flow(FlowScript::if_else("Y", "Z", Some("J".into()))))
        .task(TaskDefinition::new("Y"))
        .task(TaskDefinition::new("Z"))
        .task(TaskDefinition::new("Z2").depends_on(["Z"]).with_flow(FlowScript::if_else("P", "Q", None)))
        .task(TaskDefinition::new("P"))
        .task(TaskDefinition::new("Q"))
        .task(TaskDefinition::new("J"));
    let job = JobGraph::from_definition(&definition, common::config())?;
    let (x, y, j) = (TaskId(0), TaskId(1), TaskId(6));
    assert_eq!(job.branch_pending(), vec![y, TaskId(2), TaskId(4), TaskId(5), j]);

    job.dispatch(x)?;
    job.resolve_branch(&job.branch_resolution(x, Branch::If, y)?)?;
    job.terminate(x, false)?;
    run(&job, y);
    run(&job, j);

    for id in [TaskId(2), TaskId(3), TaskId(4), TaskId(5)] {
        assert_eq!(job.locate(id), None);
        assert_eq!(job.node(id).unwrap().remaining_parents, 0);
    }
    for set in TaskSet::ALL {
        assert!(job.sets().is_empty(set));
    }
    Ok(())
}

#[test]
fn test_else_without_join() {
    let definition = JobDefinition::new("else", JobKind::TaskFlow)
        .task(TaskDefinition::new("X").with_flow(FlowScript::if_else("Y", "Z", None)))
        .task(TaskDefinition::new("Y"))
        .task(TaskDefinition::new("Z"));
    let job = JobGraph::from_definition(&definition, common::config()).unwrap();

    job.dispatch(TaskId(0)).unwrap();
    let resolution = job.branch_resolution(TaskId(0), Branch::Else, TaskId(2)).unwrap();
    job.resolve_branch(&resolution).unwrap();
    job.terminate(TaskId(0), false).unwrap();

    assert_eq!(job.eligible(), vec![TaskId(2)]);
    assert_eq!(job.locate(TaskId(1)), None);
}

#[test]
fn test_branch_needs_running_initiator() {
    let job = branch_job();
    let resolution = job.branch_resolution(TaskId(0), Branch::If, TaskId(1)).unwrap();
    job.dispatch(TaskId(0)).unwrap();
    job.terminate(TaskId(0), false).unwrap();

    let err = job.resolve_branch(&resolution).unwrap_err();
    assert!(matches!(err, GraphError::Structural { .. }));
    assert_eq!(job.branch_pending(), vec![TaskId(1), TaskId(3), TaskId(5)]);
}

/// Unroll one more iteration of the body `A -> B`, B looping back to A
fn next_iteration(job: &JobGraph) -> LoopSplice {
    let a = job.allocate_task_id();
    let b = job.allocate_task_id();
    LoopSplice {
        tree: vec![
            Task::new(a, "A"),
            Task::new(b, "B")
                .with_dependencies([a])
                .with_flow(FlowScript::looping("A")),
        ],
        start: a,
        end: b,
    }
}

#[test]
fn test_loop_keeps_one_live_end() {
    // A -> B (loops to A) -> C
    let job = common::flow_job(vec![
        Task::new(TaskId(0), "A"),
        Task::new(TaskId(1), "B")
            .with_dependencies([TaskId(0)])
            .with_flow(FlowScript::looping("A")),
        Task::new(TaskId(2), "C").with_dependencies([TaskId(1)]),
    ]);
    let c = TaskId(2);

    let mut start = TaskId(0);
    let mut end = TaskId(1);
    let mut previous_ends = Vec::new();
    for _ in 0..5 {
        run(&job, start);
        assert!(job.dispatch(end).unwrap());
        let splice = next_iteration(&job);
        let (next_start, next_end) = (splice.start, splice.end);
        job.splice_loop(end, splice).unwrap();

        assert_eq!(job.eligible(), vec![next_start]);
        assert!(job.running().is_empty());
        previous_ends.push(end);
        start = next_start;
        end = next_end;
    }

    let ends_with_c: Vec<TaskId> = job
        .sets()
        .node_ids()
        .into_iter()
        .filter(|id| job.node(*id).unwrap().children.contains(&c))
        .collect();
    assert_eq!(ends_with_c, vec![end]);
    for old in previous_ends {
        assert!(job.node(old).unwrap().children.is_empty());
    }
    assert_eq!(job.node(c).unwrap().remaining_parents, 1);

    run(&job, start);
    run(&job, end);
    assert_eq!(job.eligible(), vec![c]);
}

#[test]
fn test_loop_in_paused_job() {
    let job = common::flow_job(vec![
        Task::new(TaskId(0), "A"),
        Task::new(TaskId(1), "B")
            .with_dependencies([TaskId(0)])
            .with_flow(FlowScript::looping("A")),
    ]);
    run(&job, TaskId(0));
    job.dispatch(TaskId(1)).unwrap();
    job.set_status(jobgraph::JobStatus::Paused);
    let splice = next_iteration(&job);
    let start = splice.start;
    job.splice_loop(TaskId(1), splice).unwrap();

    assert_eq!(job.paused(), vec![start]);
    assert_eq!(job.task(start).unwrap().status(), jobgraph::TaskStatus::Paused);
}

#[test]
fn test_loop_rejects_foreign_dependency() {
    let job = common::flow_job(vec![
        Task::new(TaskId(0), "A").with_flow(FlowScript::looping("A")),
        Task::new(TaskId(1), "other"),
    ]);
    job.dispatch(TaskId(0)).unwrap();
    let (a, b) = (job.allocate_task_id(), job.allocate_task_id());
    let splice = LoopSplice {
        tree: vec![Task::new(a, "A"), Task::new(b, "B").with_dependencies([TaskId(1)])],
        start: a,
        end: b,
    };
    let nodes = job.sets().node_count();
    assert!(job.splice_loop(TaskId(0), splice).is_err());
    assert_eq!(job.sets().node_count(), nodes);
    assert_eq!(job.running(), vec![TaskId(0)]);
}

// R -> S -> E -> M, R replicates the block S..E
fn replicate_job() -> JobGraph {
    common::flow_job(vec![
        Task::new(TaskId(0), "R").with_flow(FlowScript::replicate()),
        Task::new(TaskId(1), "S").with_dependencies([TaskId(0)]),
        Task::new(TaskId(2), "E").with_dependencies([TaskId(1)]),
        Task::new(TaskId(3), "M").with_dependencies([TaskId(2)]),
    ])
}

#[test]
fn test_replicate_shares_successors() {
    let job = replicate_job();
    let before: HashSet<TaskId> = job.sets().node_ids().into_iter().collect();
    let m = TaskId(3);

    job.dispatch(TaskId(0)).unwrap();
    let (s, e) = (job.allocate_task_id(), job.allocate_task_id());
    let splice = ReplicateSplice {
        tree: vec![Task::new(s, "S*1"), Task::new(e, "E*1").with_dependencies([s])],
        start: s,
        original_end: TaskId(2),
        new_end: e,
    };
    job.splice_replicate(TaskId(0), splice).unwrap();
    job.terminate(TaskId(0), false).unwrap();

    assert!(!before.contains(&s) && !before.contains(&e));
    assert_eq!(job.eligible(), vec![TaskId(1), s]);
    assert_eq!(job.node(TaskId(2)).unwrap().children, job.node(e).unwrap().children);
    assert_eq!(job.node(m).unwrap().remaining_parents, 2);
    assert_eq!(job.task_id_by_name("E*1").unwrap(), e);

    run(&job, TaskId(1));
    run(&job, TaskId(2));
    assert_eq!(job.eligible(), vec![s]);
    run(&job, s);
    run(&job, e);
    assert_eq!(job.eligible(), vec![m]);
}

#[test]
fn test_replicate_finds_end_behind_branch() {
    // R -> S, S -IF-> T | U, T -> V; the block end T is only reachable
    // through the unresolved IF
    let job = common::flow_job(vec![
        Task::new(TaskId(0), "R").with_flow(FlowScript::replicate()),
        Task::new(TaskId(1), "S")
            .with_dependencies([TaskId(0)])
            .with_flow(FlowScript::if_else("T", "U", None)),
        Task::new(TaskId(2), "T").with_weak_parent(TaskId(1)),
        Task::new(TaskId(3), "U").with_weak_parent(TaskId(1)),
        Task::new(TaskId(4), "V").with_dependencies([TaskId(2)]),
    ]);
    job.dispatch(TaskId(0)).unwrap();

    let (s, t, u) = (job.allocate_task_id(), job.allocate_task_id(), job.allocate_task_id());
    let splice = ReplicateSplice {
        tree: vec![
            Task::new(s, "S*1").with_flow(FlowScript::if_else("T*1", "U*1", None)),
            Task::new(t, "T*1").with_weak_parent(s),
            Task::new(u, "U*1").with_weak_parent(s),
        ],
        start: s,
        original_end: TaskId(2),
        new_end: t,
    };
    job.splice_replicate(TaskId(0), splice).unwrap();

    assert_eq!(job.branch_pending(), vec![TaskId(2), TaskId(3), t, u]);
    assert_eq!(job.node(t).unwrap().children, vec![TaskId(4)]);
    assert_eq!(job.node(TaskId(4)).unwrap().remaining_parents, 2);

    job.terminate(TaskId(0), false).unwrap();
    assert_eq!(job.eligible(), vec![TaskId(1), s]);
    let copy = job.branch_resolution(s, Branch::If, t).unwrap();
    assert_eq!(copy.start, t);
    assert_eq!(copy.not_taken, Some(u));
}

#[test]
fn test_replicate_missing_end_is_structural() {
    let job = replicate_job();
    job.dispatch(TaskId(0)).unwrap();
    let s = job.allocate_task_id();
    let splice = ReplicateSplice {
        tree: vec![Task::new(s, "S*1")],
        start: s,
        original_end: TaskId(42),
        new_end: s,
    };
    let before = job.snapshot();
    let err = job.splice_replicate(TaskId(0), splice).unwrap_err();
    assert_eq!(err.category(), "structural");
    assert!(!err.is_recoverable());
    assert_eq!(job.snapshot(), before);
    assert!(!job.sets().contains_node(s));
}

// X -IF-> Y | Z with join J, J loops back to X
fn looping_branch_job() -> JobGraph {
    let definition = JobDefinition::new("loop-if", JobKind::TaskFlow)
        .task(TaskDefinition::new("X").with_flow(FlowScript::if_else("Y", "Z", Some("J".into()))))
        .task(TaskDefinition::new("Y"))
        .task(TaskDefinition::new("Z"))
        .task(TaskDefinition::new("J").with_flow(FlowScript::looping("X")));
    JobGraph::from_definition(&definition, common::config()).unwrap()
}

/// Run the first pass through the IF towards Y and unroll one more
/// iteration after J; returns the new (X, Y, Z, J)
fn second_iteration(job: &JobGraph) -> (TaskId, TaskId, TaskId, TaskId) {
    let (x, y, j) = (TaskId(0), TaskId(1), TaskId(3));
    job.dispatch(x).unwrap();
    job.resolve_branch(&job.branch_resolution(x, Branch::If, y).unwrap())
        .unwrap();
    job.terminate(x, false).unwrap();
    run(job, y);
    assert!(job.dispatch(j).unwrap());

    let ids: Vec<TaskId> = (0..4).map(|_| job.allocate_task_id()).collect();
    let (x2, y2, z2, j2) = (ids[0], ids[1], ids[2], ids[3]);
    let splice = LoopSplice {
        tree: vec![
            Task::new(x2, "X").with_flow(FlowScript::if_else("Y", "Z", Some("J".into()))),
            Task::new(y2, "Y").with_weak_parent(x2),
            Task::new(z2, "Z").with_weak_parent(x2),
            Task::new(j2, "J")
                .with_weak_parent(x2)
                .with_flow(FlowScript::looping("X")),
        ],
        start: x2,
        end: j2,
    };
    job.splice_loop(j, splice).unwrap();
    (x2, y2, z2, j2)
}

#[test]
fn test_if_inside_loop_copy_resolves_its_own_targets() {
    let job = looping_branch_job();
    let (x, y, z, j) = second_iteration(&job);
    assert_eq!(job.eligible(), vec![x]);
    assert_eq!(job.branch_pending(), vec![y, z, j]);

    job.dispatch(x).unwrap();
    let resolution = job.branch_resolution(x, Branch::If, y).unwrap();
    assert_eq!(
        resolution,
        BranchResolution {
            initiator: x,
            start: y,
            end: y,
            join: Some(j),
            not_taken: Some(z),
        }
    );
    assert_eq!(job.children_with_if_branches(x), vec![y, z, j]);

    job.resolve_branch(&resolution).unwrap();
    job.terminate(x, false).unwrap();
    assert_eq!(job.eligible(), vec![y]);
    assert!(job.branch_pending().is_empty());
    assert_eq!(job.locate(z), None);

    run(&job, y);
    assert_eq!(job.eligible(), vec![j]);
    assert_eq!(job.task_id_by_name("J").unwrap(), j);
}

#[test]
fn test_skipped_if_in_loop_copy_skips_its_own_targets() {
    let job = looping_branch_job();
    let (x, y, z, j) = second_iteration(&job);

    job.task(x).unwrap().set_status(TaskStatus::Skipped);
    job.dispatch(x).unwrap();
    job.terminate(x, false).unwrap();

    for id in [y, z, j] {
        assert_eq!(job.locate(id), None);
    }
    for set in TaskSet::ALL {
        assert!(job.sets().is_empty(set));
    }
}
