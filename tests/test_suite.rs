mod common;

use std::sync::{Arc, Mutex};

use common::*;
use mutest::instruction::{BranchCond, Instruction};
use mutest::suite::{Project, SuiteError, TimeoutDecoratedSource};
use mutest::testapi::{FailureKind, TestSource, TestUnit, run_early_exit};
use mutest::vm::{Limits, Value};
use tempfile::TempDir;

#[test]
fn project_round_trips_through_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("project.json");
    let project = testee_project();
    std::fs::write(&path, serde_json::to_string_pretty(&project).unwrap()).unwrap();

    let loaded = Project::load(&path).unwrap();
    assert_eq!(loaded, project);
}

#[test]
fn hand_written_project_parses_with_defaults() {
    let json = r#"{
      "classes": [{
        "name": "Answer",
        "methods": [{
          "name": "get", "descriptor": "()I", "is_static": true,
          "code": [{"push_int": 42}, {"return": "single"}]
        }]
      }],
      "tests": [{"name": "answer", "class": "Answer", "method": "get",
                 "expect": {"int": 42}, "covers": ["Answer"]}]
    }"#;
    let project = Project::from_json(json).unwrap();
    assert_eq!(project.classes[0].super_name, "Object");
    assert!(project.run_baseline().unwrap().is_empty());
}

#[test]
fn missing_project_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Project::load(&dir.path().join("absent.json")),
        Err(SuiteError::Io { .. })
    ));
}

#[test]
fn validation_rejects_bad_references() {
    let mut dup_class = testee_project();
    dup_class.classes.push(bag_class());
    let json = serde_json::to_string(&dup_class).unwrap();
    assert!(matches!(
        Project::from_json(&json),
        Err(SuiteError::DuplicateClass(name)) if name == "Bag"
    ));

    let mut dup_test = testee_project();
    dup_test.tests.push(test_case("call_runs", "Testee", "call", None, &[]));
    let json = serde_json::to_string(&dup_test).unwrap();
    assert!(matches!(
        Project::from_json(&json),
        Err(SuiteError::DuplicateTest(_))
    ));

    let mut bad_class = testee_project();
    bad_class.tests.push(test_case("ghost", "Ghost", "call", None, &[]));
    let json = serde_json::to_string(&bad_class).unwrap();
    assert!(matches!(
        Project::from_json(&json),
        Err(SuiteError::UnknownClass { .. })
    ));

    let mut bad_method = testee_project();
    bad_method.tests.push(test_case("nope", "Testee", "nope", None, &[]));
    let json = serde_json::to_string(&bad_method).unwrap();
    assert!(matches!(
        Project::from_json(&json),
        Err(SuiteError::UnknownMethod { .. })
    ));

    assert!(matches!(
        Project::from_json("{\"classes\": 3}"),
        Err(SuiteError::Json(_))
    ));
}

#[test]
fn covering_tests_keep_file_order() {
    let project = testee_project();
    assert_eq!(
        project.covering_tests("Testee"),
        vec!["call_runs", "call_counts_one_add"]
    );
    assert_eq!(project.covering_tests("Registry"), vec!["registry_seeded_once"]);
    assert!(project.covering_tests("Nobody").is_empty());
}

#[test]
fn suite_translates_known_names_in_order() {
    let project = testee_project();
    let suite = project.suite().unwrap();
    let tests = suite.translate_tests(&[
        "call_counts_one_add".to_string(),
        "missing".to_string(),
        "call_runs".to_string(),
    ]);
    let names: Vec<_> = tests.iter().map(|t| t.name().to_string()).collect();
    assert_eq!(names, vec!["call_counts_one_add", "call_runs"]);
}

#[test]
fn suite_tests_compare_against_expectations() {
    let mut project = testee_project();
    project.tests.push(test_case(
        "call_counts_two",
        "Testee",
        "call",
        Some(Value::Int(2)),
        &["Testee"],
    ));
    let suite = project.suite().unwrap();
    let tests = suite.translate_tests(&[
        "call_counts_one_add".to_string(),
        "call_counts_two".to_string(),
    ]);
    let mut space = project.class_space();
    assert!(tests[0].execute(&mut space).is_ok());
    let failure = tests[1].execute(&mut space).unwrap_err();
    assert_eq!(failure.kind, FailureKind::Assertion);
    assert_eq!(failure.message, "expected 2, got 1");

    let outcome = run_early_exit(&tests, &mut space);
    assert_eq!(outcome.tests_run, 2);
    assert_eq!(outcome.first_failure.as_deref(), Some("call_counts_two"));
}

#[test]
fn baseline_reports_failing_tests() {
    let mut project = testee_project();
    project.tests.push(test_case(
        "wrong",
        "Testee",
        "call",
        Some(Value::Int(5)),
        &[],
    ));
    let failures = project.run_baseline().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "wrong");
}

fn looping_project() -> Project {
    let mut looper = bag_class();
    looper.name = "Looper".into();
    looper.fields.clear();
    looper.methods = vec![
        default_constructor("Object"),
        method(
            "spin",
            "()V",
            vec![
                Instruction::Label(0),
                Instruction::Branch {
                    cond: BranchCond::Always,
                    target: 0,
                },
            ],
        ),
    ];
    Project {
        classes: vec![looper],
        tests: vec![test_case("spins", "Looper", "spin", None, &["Looper"])],
    }
}

#[test]
fn exhausted_step_budget_is_a_timeout_failure() {
    let project = looping_project();
    let suite = project.suite().unwrap();
    let tests = suite.translate_tests(&["spins".to_string()]);
    let mut space = project.class_space().with_limits(Limits {
        step_budget: 1_000,
        ..Limits::default()
    });
    let failure = tests[0].execute(&mut space).unwrap_err();
    assert_eq!(failure.kind, FailureKind::Timeout);
}

#[test]
fn timeout_decorator_reports_exhaustion_to_its_hook() {
    let project = looping_project();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = Arc::clone(&seen);
    let source = TimeoutDecoratedSource::new(project.suite().unwrap(), move |kind| {
        hook_seen.lock().unwrap().push(kind);
    });

    let tests = source.translate_tests(&["spins".to_string()]);
    assert_eq!(tests[0].name(), "spins");
    let mut space = project.class_space().with_limits(Limits {
        step_budget: 1_000,
        ..Limits::default()
    });
    let outcome = run_early_exit(&tests, &mut space);
    assert_eq!(outcome.first_failure.as_deref(), Some("spins"));
    assert_eq!(*seen.lock().unwrap(), vec![FailureKind::Timeout]);
}

#[test]
fn timeout_decorator_ignores_ordinary_failures() {
    let mut project = testee_project();
    project.tests.push(test_case("wrong", "Testee", "call", Some(Value::Int(5)), &[]));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let hook_seen = Arc::clone(&seen);
    let source = TimeoutDecoratedSource::new(project.suite().unwrap(), move |kind| {
        hook_seen.lock().unwrap().push(kind);
    });
    let tests = source.translate_tests(&["wrong".to_string()]);
    let mut space = project.class_space();
    assert!(tests[0].execute(&mut space).is_err());
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn abstract_fixture_is_an_error_failure() {
    let mut shape = bag_class();
    shape.name = "Shape".into();
    shape.is_abstract = true;
    let project = Project {
        classes: vec![shape],
        tests: vec![test_case("size", "Shape", "size", None, &["Shape"])],
    };
    let failures = project.run_baseline().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].1.kind, FailureKind::Error);
    assert!(failures[0].1.message.contains("abstract"));
}
