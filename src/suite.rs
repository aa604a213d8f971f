use crate::class::ClassDef;
use crate::instruction::STATIC_INITIALIZER;
use crate::mutants::MutationDetails;
use crate::testapi::{FailureKind, TestFailure, TestSource, TestUnit};
use crate::vm::{ClassSpace, ConstructionError, Value, VmError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid project file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate class `{0}`")]
    DuplicateClass(String),
    #[error("duplicate test `{0}`")]
    DuplicateTest(String),
    #[error("test `{test}` refers to unknown class `{class}`")]
    UnknownClass { test: String, class: String },
    #[error("test `{test}` refers to unknown method {class}.{method}")]
    UnknownMethod {
        test: String,
        class: String,
        method: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Fixture class; instance methods run on an object built by its
    /// no-argument constructor.
    pub class: String,
    pub method: String,
    /// Needed only when `method` is overloaded.
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub expect: Option<Value>,
    /// Classes this test exercises.
    #[serde(default)]
    pub covers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub classes: Vec<ClassDef>,
    #[serde(default)]
    pub tests: Vec<TestCase>,
}

impl Project {
    pub fn load(path: &Path) -> Result<Self, SuiteError> {
        let data = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, SuiteError> {
        let project: Project = serde_json::from_str(data)?;
        project.validate()?;
        Ok(project)
    }

    fn validate(&self) -> Result<(), SuiteError> {
        let mut classes = HashSet::new();
        for class in &self.classes {
            if !classes.insert(class.name.as_str()) {
                return Err(SuiteError::DuplicateClass(class.name.clone()));
            }
        }
        let mut names = HashSet::new();
        for test in &self.tests {
            if !names.insert(test.name.as_str()) {
                return Err(SuiteError::DuplicateTest(test.name.clone()));
            }
            self.resolve(test)?;
        }
        Ok(())
    }

    /// The descriptor and staticness of the method a test invokes.
    fn resolve(&self, test: &TestCase) -> Result<(String, bool), SuiteError> {
        let class = self
            .classes
            .iter()
            .find(|c| c.name == test.class)
            .ok_or_else(|| SuiteError::UnknownClass {
                test: test.name.clone(),
                class: test.class.clone(),
            })?;
        class
            .methods
            .iter()
            .filter(|m| m.name == test.method && m.name != STATIC_INITIALIZER)
            .find(|m| {
                test.descriptor
                    .as_ref()
                    .is_none_or(|d| *d == m.descriptor.to_string())
            })
            .map(|m| (m.descriptor.to_string(), m.is_static))
            .ok_or_else(|| SuiteError::UnknownMethod {
                test: test.name.clone(),
                class: test.class.clone(),
                method: test.method.clone(),
            })
    }

    /// Names of the tests covering `class`, in file order.
    pub fn covering_tests(&self, class: &str) -> Vec<String> {
        self.tests
            .iter()
            .filter(|t| t.covers.iter().any(|c| c == class))
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn assign_coverage(&self, candidates: &mut [MutationDetails]) {
        for details in candidates {
            details.tests_in_order = self.covering_tests(details.id.class_name());
        }
    }

    pub fn class_space(&self) -> ClassSpace {
        ClassSpace::new(self.classes.clone())
    }

    pub fn suite(&self) -> Result<Suite, SuiteError> {
        let mut tests = HashMap::new();
        for case in &self.tests {
            let (descriptor, is_static) = self.resolve(case)?;
            tests.insert(
                case.name.clone(),
                Arc::new(SuiteTest {
                    case: case.clone(),
                    descriptor,
                    is_static,
                }),
            );
        }
        Ok(Suite { tests })
    }

    /// Run every test once, each in its own unmutated space, and collect
    /// the ones that fail.
    pub fn run_baseline(&self) -> Result<Vec<(String, TestFailure)>, SuiteError> {
        let suite = self.suite()?;
        let names: Vec<String> = self.tests.iter().map(|t| t.name.clone()).collect();
        let mut failures = Vec::new();
        for test in suite.translate_tests(&names) {
            let mut space = self.class_space();
            if let Err(failure) = test.execute(&mut space) {
                failures.push((test.name().to_string(), failure));
            }
        }
        Ok(failures)
    }
}

pub struct SuiteTest {
    case: TestCase,
    descriptor: String,
    is_static: bool,
}

fn vm_failure(error: VmError) -> TestFailure {
    let kind = match error {
        VmError::StepBudgetExhausted(_) => FailureKind::Timeout,
        VmError::HeapExhausted(_) => FailureKind::OutOfMemory,
        _ => FailureKind::Error,
    };
    TestFailure {
        kind,
        message: error.to_string(),
    }
}

fn construction_failure(error: ConstructionError) -> TestFailure {
    match error {
        ConstructionError::Failed { source, .. } => vm_failure(source),
        other => TestFailure::error(other.to_string()),
    }
}

impl TestUnit<ClassSpace> for SuiteTest {
    fn name(&self) -> &str {
        &self.case.name
    }

    fn execute(&self, space: &mut ClassSpace) -> Result<(), TestFailure> {
        let case = &self.case;
        let result = if self.is_static {
            space
                .invoke_static(&case.class, &case.method, &self.descriptor, Vec::new())
                .map_err(vm_failure)?
        } else {
            let fixture = space
                .instantiate(&case.class)
                .map_err(construction_failure)?;
            space
                .invoke_virtual(fixture, &case.method, &self.descriptor, Vec::new())
                .map_err(vm_failure)?
        };
        match case.expect {
            Some(expected) if result != Some(expected) => Err(TestFailure::assertion(format!(
                "expected {}, got {}",
                expected,
                result.map_or_else(|| "nothing".to_string(), |v| v.to_string())
            ))),
            _ => Ok(()),
        }
    }
}

pub struct Suite {
    tests: HashMap<String, Arc<SuiteTest>>,
}

impl TestSource<ClassSpace> for Suite {
    fn translate_tests(&self, tests: &[String]) -> Vec<Box<dyn TestUnit<ClassSpace>>> {
        tests
            .iter()
            .filter_map(|name| match self.tests.get(name) {
                Some(test) => Some(Box::new(Arc::clone(test)) as Box<dyn TestUnit<ClassSpace>>),
                None => {
                    warn!(test = %name, "unknown test");
                    None
                }
            })
            .collect()
    }
}

type ExhaustionHook = Arc<dyn Fn(FailureKind) + Send + Sync>;

/// Wraps a test source so that a test running out of time or memory is
/// reported to `on_exhausted` instead of counting as an ordinary failure.
/// The worker binary exits the process from that hook.
pub struct TimeoutDecoratedSource<S> {
    inner: S,
    on_exhausted: ExhaustionHook,
}

impl<S> TimeoutDecoratedSource<S> {
    pub fn new(inner: S, on_exhausted: impl Fn(FailureKind) + Send + Sync + 'static) -> Self {
        Self {
            inner,
            on_exhausted: Arc::new(on_exhausted),
        }
    }
}

struct TimeoutDecorated<B> {
    inner: Box<dyn TestUnit<B>>,
    on_exhausted: ExhaustionHook,
}

impl<B> TestUnit<B> for TimeoutDecorated<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn execute(&self, boundary: &mut B) -> Result<(), TestFailure> {
        let result = self.inner.execute(boundary);
        if let Err(failure) = &result {
            if matches!(failure.kind, FailureKind::Timeout | FailureKind::OutOfMemory) {
                (self.on_exhausted)(failure.kind);
            }
        }
        result
    }
}

impl<B: 'static, S: TestSource<B>> TestSource<B> for TimeoutDecoratedSource<S> {
    fn translate_tests(&self, tests: &[String]) -> Vec<Box<dyn TestUnit<B>>> {
        self.inner
            .translate_tests(tests)
            .into_iter()
            .map(|inner| {
                Box::new(TimeoutDecorated {
                    inner,
                    on_exhausted: Arc::clone(&self.on_exhausted),
                }) as Box<dyn TestUnit<B>>
            })
            .collect()
    }
}
