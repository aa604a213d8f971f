use crate::boundary::IsolationBoundary;
use crate::engine::{EngineError, MutationEngine};
use crate::mutants::{DetectionStatus, Mutant, MutationDetails, MutationStatusTestPair};
use crate::reporter::Reporter;
use crate::testapi::{TestSource, TestUnit, run_early_exit};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Hot-swaps mutants into a shared boundary. Strictly sequential: the
/// boundary's live classes are mutated in place between candidates.
pub struct MutationTestWorker<'a, B: IsolationBoundary> {
    engine: &'a dyn MutationEngine,
    boundary: B,
    tests: &'a dyn TestSource<B>,
}

impl<'a, B: IsolationBoundary> MutationTestWorker<'a, B> {
    pub fn new(engine: &'a dyn MutationEngine, boundary: B, tests: &'a dyn TestSource<B>) -> Self {
        Self {
            engine,
            boundary,
            tests,
        }
    }

    pub fn boundary(&self) -> &B {
        &self.boundary
    }

    pub fn into_boundary(self) -> B {
        self.boundary
    }

    /// Process `candidates` in order, reporting each one. Only a failure to
    /// materialize a mutant aborts the batch.
    pub fn run(
        &mut self,
        candidates: &[MutationDetails],
        reporter: &mut dyn Reporter,
    ) -> Result<(), WorkerError> {
        for details in candidates {
            debug!(mutation = %details.id, "running mutation");
            let started = Instant::now();
            self.process_mutation(details, reporter)?;
            debug!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "processed mutation"
            );
        }
        Ok(())
    }

    fn process_mutation(
        &mut self,
        details: &MutationDetails,
        reporter: &mut dyn Reporter,
    ) -> Result<(), WorkerError> {
        let id = &details.id;
        let mutant = self.engine.get_mutation(id)?;
        debug!(
            class = %id.location.class,
            method = %id.location.method,
            "mutating method"
        );

        let relevant = self.tests.translate_tests(&details.tests_in_order);

        reporter.describe(id);
        let result = self.handle_mutation(&mutant, &relevant);
        reporter.report(id, &result);

        debug!(mutation = %id, status = %result.status, "mutation detected");
        Ok(())
    }

    fn handle_mutation(
        &mut self,
        mutant: &Mutant,
        relevant: &[Box<dyn TestUnit<B>>],
    ) -> MutationStatusTestPair {
        if relevant.is_empty() {
            info!(
                mutation = %mutant.details.id,
                method = %mutant.details.id.location.method,
                "no test coverage for mutation"
            );
            return MutationStatusTestPair::new(0, DetectionStatus::RunError);
        }
        self.handle_covered_mutation(mutant, relevant)
    }

    fn handle_covered_mutation(
        &mut self,
        mutant: &Mutant,
        relevant: &[Box<dyn TestUnit<B>>],
    ) -> MutationStatusTestPair {
        debug!(tests = relevant.len(), "relevant tests for mutation");

        // A static initializer only runs once per boundary, so its mutant
        // needs a boundary where the class has not been initialized yet.
        let mut fresh;
        let boundary = if mutant.details.in_static_initializer {
            debug!("creating fresh boundary for static initializer");
            fresh = self.boundary.fresh();
            &mut fresh
        } else {
            &mut self.boundary
        };

        let started = Instant::now();
        if !boundary.replace(mutant.details.id.class_name(), &mutant.bytes) {
            warn!(mutation = %mutant.details.id, "mutation was not viable");
            return MutationStatusTestPair::new(0, DetectionStatus::NonViable);
        }
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "replaced class with mutant"
        );

        let outcome = run_early_exit(relevant, boundary);
        match outcome.first_failure {
            Some(test) => MutationStatusTestPair::killed_by(outcome.tests_run, test),
            None => MutationStatusTestPair::new(outcome.tests_run, DetectionStatus::Survived),
        }
    }
}
