use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The test ran to completion and its expectation did not hold.
    Assertion,
    /// The code under test faulted.
    Error,
    /// The code under test ran out of its instruction budget.
    Timeout,
    /// The code under test exhausted its heap.
    OutOfMemory,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TestFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TestFailure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Assertion,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
        }
    }
}

/// One runnable test against a boundary of type `B`.
pub trait TestUnit<B> {
    fn name(&self) -> &str;
    fn execute(&self, boundary: &mut B) -> Result<(), TestFailure>;
}

impl<B, T: TestUnit<B> + ?Sized> TestUnit<B> for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&self, boundary: &mut B) -> Result<(), TestFailure> {
        (**self).execute(boundary)
    }
}

/// Resolves covering-test names into executable handles, keeping order.
/// Names it does not know are dropped.
pub trait TestSource<B> {
    fn translate_tests(&self, tests: &[String]) -> Vec<Box<dyn TestUnit<B>>>;
}

/// A test backed by a closure.
pub struct TestFn<F> {
    name: String,
    body: F,
}

impl<F> TestFn<F> {
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

impl<B, F> TestUnit<B> for TestFn<F>
where
    F: Fn(&mut B) -> Result<(), TestFailure>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, boundary: &mut B) -> Result<(), TestFailure> {
        (self.body)(boundary)
    }
}

/// Named tests held in memory.
pub struct TestRegistry<B> {
    tests: HashMap<String, Arc<dyn TestUnit<B>>>,
}

impl<B> Default for TestRegistry<B> {
    fn default() -> Self {
        Self {
            tests: HashMap::new(),
        }
    }
}

impl<B: 'static> TestRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, test: impl TestUnit<B> + 'static) {
        self.tests.insert(test.name().to_string(), Arc::new(test));
    }
}

impl<B: 'static> TestSource<B> for TestRegistry<B> {
    fn translate_tests(&self, tests: &[String]) -> Vec<Box<dyn TestUnit<B>>> {
        tests
            .iter()
            .filter_map(|name| self.tests.get(name))
            .map(|test| Box::new(Arc::clone(test)) as Box<dyn TestUnit<B>>)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOutcome {
    /// Tests executed, including the one that failed.
    pub tests_run: usize,
    pub first_failure: Option<String>,
}

/// Run `tests` in order and stop at the first failure.
pub fn run_early_exit<B>(tests: &[Box<dyn TestUnit<B>>], boundary: &mut B) -> GroupOutcome {
    let mut outcome = GroupOutcome::default();
    for test in tests {
        outcome.tests_run += 1;
        if let Err(failure) = test.execute(boundary) {
            tracing::debug!(test = test.name(), %failure, "test failed");
            outcome.first_failure = Some(test.name().to_string());
            break;
        }
    }
    outcome
}
