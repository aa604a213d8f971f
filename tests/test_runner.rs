mod common;

use std::path::Path;
use std::time::Duration;

use common::*;
use mutest::class::ClassDef;
use mutest::engine::Mutater;
use mutest::exit_code::ExitCode;
use mutest::history::{FileHistoryStore, HistoryStore};
use mutest::instruction::{BranchCond, CallKind, Instruction};
use mutest::mutants::{
    DetectionStatus, Location, MutationDetails, MutationIdentifier, MutationResult,
    MutationStatusTestPair,
};
use mutest::operators;
use mutest::runner::{self, RunnerError, WorkerCommand, WorkerExit};
use mutest::suite::Project;
use mutest::vm::Value;
use tempfile::TempDir;

// --- generate_diff ---

#[test]
fn generate_diff_shows_changes() {
    let diff = runner::generate_diff("a\nb\nc\n", "a\nB\nc\n");
    assert!(diff.contains("- b"));
    assert!(diff.contains("+ B"));
    assert!(!diff.contains("a"));
}

#[test]
fn generate_diff_identical_is_empty() {
    assert!(runner::generate_diff("same\n", "same\n").is_empty());
}

#[test]
fn listing_diff_shows_the_removed_call() {
    let original = vec![
        load(0),
        load(1),
        invoke(CallKind::Virtual, "Testee", "add", "(I)Z"),
        Instruction::pop(),
        Instruction::Return(None),
    ];
    let mutated = vec![
        load(0),
        load(1),
        Instruction::pop(),
        Instruction::pop(),
        Instruction::Return(None),
    ];
    let diff = runner::listing_diff(&original, &mutated);
    assert!(diff.contains("-     invokevirtual Testee.add(I)Z"));
    assert_eq!(diff.matches("+     pop").count(), 1);
}

// --- status_for_exit ---

#[test]
fn worker_exits_map_to_verdicts() {
    assert_eq!(runner::status_for_exit(WorkerExit::Killed), DetectionStatus::TimedOut);
    assert_eq!(
        runner::status_for_exit(WorkerExit::Exited(ExitCode::Timeout)),
        DetectionStatus::TimedOut
    );
    assert_eq!(
        runner::status_for_exit(WorkerExit::Exited(ExitCode::OutOfMemory)),
        DetectionStatus::MemoryError
    );
    for other in [ExitCode::Ok, ExitCode::ForcedExit, ExitCode::UnknownError] {
        assert_eq!(
            runner::status_for_exit(WorkerExit::Exited(other)),
            DetectionStatus::RunError
        );
    }
}

// --- reuse_history ---

fn details(index: usize) -> MutationDetails {
    MutationDetails {
        id: MutationIdentifier {
            operator: "EXPERIMENTAL_REMOVE_NON_VOID_CALLS".into(),
            location: Location {
                class: "Testee".into(),
                method: "doStuff".into(),
                descriptor: "(I)V".into(),
            },
            index,
            description: "removed call to method Testee.add".into(),
        },
        line: None,
        in_static_initializer: false,
        tests_in_order: vec!["call_runs".into()],
        class_hash: "h".into(),
    }
}

#[test]
fn reuse_history_splits_known_from_pending() {
    let mut store = FileHistoryStore::in_memory();
    store.record_result(&MutationResult {
        details: details(2),
        status: MutationStatusTestPair::killed_by(1, "call_runs"),
    });

    let (known, pending) = runner::reuse_history(vec![details(1), details(2), details(3)], &store);
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].details.id.index, 2);
    assert_eq!(known[0].status.killing_test.as_deref(), Some("call_runs"));
    let pending: Vec<_> = pending.iter().map(|d| d.id.index).collect();
    assert_eq!(pending, vec![1, 3]);
}

// --- run_candidates ---

fn write_project(dir: &Path, project: &Project) -> std::path::PathBuf {
    let path = dir.join("project.json");
    std::fs::write(&path, serde_json::to_string(project).unwrap()).unwrap();
    path
}

fn candidates_for(project: &Project, class: &str) -> Vec<MutationDetails> {
    let engine = Mutater::new(project.classes.clone(), operators::all());
    let mut candidates = engine.find_mutations(class).unwrap();
    project.assign_coverage(&mut candidates);
    candidates
}

#[test]
fn worker_processes_report_every_candidate() {
    let dir = TempDir::new().unwrap();
    let project = testee_project();
    let path = write_project(dir.path(), &project);
    let mut candidates = candidates_for(&project, "Registry");
    candidates.extend(candidates_for(&project, "Testee"));
    assert_eq!(candidates.len(), 2);

    let worker = WorkerCommand::new(env!("CARGO_BIN_EXE_mutest"), &path);
    let results =
        runner::run_candidates(&worker, candidates.clone(), Duration::from_secs(30)).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].details.id, candidates[0].id, "input order kept");
    assert_eq!(
        results[0].status,
        MutationStatusTestPair::killed_by(1, "registry_seeded_once")
    );
    assert_eq!(
        results[1].status,
        MutationStatusTestPair::killed_by(2, "call_counts_one_add")
    );
}

/// `Tally.run` counts one `inc()` call; `Quiet.value` discards a call with
/// no effect. `tally_is_one` exercises both classes.
fn two_class_project() -> Project {
    let tally = ClassDef {
        name: "Tally".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![int_field("count", true)],
        methods: vec![
            static_method(
                "inc",
                "()I",
                vec![
                    get_static("Tally", "count"),
                    Instruction::PushInt(1),
                    iadd(),
                    Instruction::Dup,
                    put_static("Tally", "count"),
                    ireturn(),
                ],
            ),
            static_method(
                "run",
                "()I",
                vec![
                    invoke(CallKind::Static, "Tally", "inc", "()I"),
                    Instruction::pop(),
                    invoke(CallKind::Static, "Quiet", "value", "()I"),
                    Instruction::pop(),
                    get_static("Tally", "count"),
                    ireturn(),
                ],
            ),
        ],
    };
    let quiet = ClassDef {
        name: "Quiet".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![],
        methods: vec![
            static_method("noise", "()I", vec![Instruction::PushInt(0), ireturn()]),
            static_method(
                "value",
                "()I",
                vec![
                    invoke(CallKind::Static, "Quiet", "noise", "()I"),
                    Instruction::pop(),
                    Instruction::PushInt(5),
                    ireturn(),
                ],
            ),
        ],
    };
    Project {
        classes: vec![tally, quiet],
        tests: vec![
            test_case("tally_is_one", "Tally", "run", Some(Value::Int(1)), &["Tally", "Quiet"]),
            test_case("quiet_is_five", "Quiet", "value", Some(Value::Int(5)), &["Quiet"]),
        ],
    }
}

#[test]
fn candidates_are_grouped_by_class_in_first_seen_order() {
    let project = two_class_project();
    let tally = candidates_for(&project, "Tally");
    let quiet = candidates_for(&project, "Quiet");
    let mixed = vec![tally[0].clone(), quiet[0].clone(), tally[1].clone()];

    let groups = runner::group_by_class(&mixed);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len(), 2);
    assert!(groups[0].iter().all(|d| d.id.class_name() == "Tally"));
    assert_eq!(groups[1][0].id, quiet[0].id);
}

#[test]
fn one_class_mutant_does_not_leak_into_another_class_verdict() {
    let dir = TempDir::new().unwrap();
    let project = two_class_project();
    assert!(project.run_baseline().unwrap().is_empty());
    let path = write_project(dir.path(), &project);
    let tally = candidates_for(&project, "Tally");
    let quiet = candidates_for(&project, "Quiet");
    assert_eq!(tally.len(), 2);
    assert_eq!(quiet.len(), 1);

    let worker = WorkerCommand::new(env!("CARGO_BIN_EXE_mutest"), &path);
    let alone =
        runner::run_candidates(&worker, quiet.clone(), Duration::from_secs(30)).unwrap();
    assert_eq!(
        alone[0].status,
        MutationStatusTestPair::new(2, DetectionStatus::Survived)
    );

    let mut mixed = tally.clone();
    mixed.extend(quiet.clone());
    let results = runner::run_candidates(&worker, mixed, Duration::from_secs(30)).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].status,
        MutationStatusTestPair::killed_by(1, "tally_is_one")
    );
    assert_eq!(results[2].details.id, quiet[0].id);
    assert_eq!(results[2].status, alone[0].status);
}

/// `countToThree` loops until `tick()` has run three times; without the
/// call it never finishes.
fn counter_class() -> ClassDef {
    ClassDef {
        name: "Counter".into(),
        super_name: "Object".into(),
        is_abstract: false,
        fields: vec![int_field("ticks", true)],
        methods: vec![
            static_method(
                "tick",
                "()I",
                vec![
                    get_static("Counter", "ticks"),
                    Instruction::PushInt(1),
                    iadd(),
                    Instruction::Dup,
                    put_static("Counter", "ticks"),
                    ireturn(),
                ],
            ),
            static_method(
                "countToThree",
                "()I",
                vec![
                    Instruction::Label(0),
                    invoke(CallKind::Static, "Counter", "tick", "()I"),
                    Instruction::pop(),
                    get_static("Counter", "ticks"),
                    Instruction::PushInt(3),
                    Instruction::Branch {
                        cond: BranchCond::IfLt,
                        target: 0,
                    },
                    get_static("Counter", "ticks"),
                    ireturn(),
                ],
            ),
        ],
    }
}

#[test]
fn exhausted_step_budget_becomes_timed_out() {
    let dir = TempDir::new().unwrap();
    let project = Project {
        classes: vec![counter_class()],
        tests: vec![test_case(
            "counts_to_three",
            "Counter",
            "countToThree",
            Some(Value::Int(3)),
            &["Counter"],
        )],
    };
    assert!(project.run_baseline().unwrap().is_empty());
    let path = write_project(dir.path(), &project);
    let candidates = candidates_for(&project, "Counter");
    assert_eq!(candidates.len(), 1);

    let worker = WorkerCommand {
        step_limit: Some(10_000),
        ..WorkerCommand::new(env!("CARGO_BIN_EXE_mutest"), &path)
    };
    let results = runner::run_candidates(&worker, candidates, Duration::from_secs(30)).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status.status, DetectionStatus::TimedOut);
}

#[cfg(unix)]
#[test]
fn silent_worker_marks_everything_run_error() {
    let worker = WorkerCommand::new("true", "unused.json");
    let results =
        runner::run_candidates(&worker, vec![details(1), details(2)], Duration::from_secs(10))
            .unwrap();
    assert_eq!(results.len(), 2);
    assert!(
        results
            .iter()
            .all(|r| r.status == MutationStatusTestPair::new(0, DetectionStatus::RunError))
    );
}

#[test]
fn missing_worker_program_is_a_spawn_error() {
    let dir = TempDir::new().unwrap();
    let worker = WorkerCommand::new(dir.path().join("no-such-binary"), "unused.json");
    assert!(matches!(
        runner::run_candidates(&worker, vec![details(1)], Duration::from_secs(1)),
        Err(RunnerError::Spawn { .. })
    ));
}
