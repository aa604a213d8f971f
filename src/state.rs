use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::mutants::{DetectionStatus, MutationDetails, MutationResult};

pub const STATE_FILE: &str = ".mutest-state.json";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub project: String,
    /// Detected over viable mutants.
    pub score: f64,
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timed_out: usize,
    pub memory_error: usize,
    pub non_viable: usize,
    pub run_error: usize,
    /// Verdicts taken from history instead of being run.
    pub reused: usize,
    pub duration_ms: u64,
    pub survived_mutants: Vec<SurvivedMutant>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SurvivedMutant {
    pub ref_id: String,
    pub class: String,
    pub method: String,
    pub descriptor: String,
    pub index: usize,
    pub line: Option<u32>,
    pub operator: String,
    pub description: String,
    pub tests_run: usize,
    pub diff: String,
}

impl RunResult {
    /// Tally `results` and number the survivors `m1`, `m2`, ... in order.
    pub fn summarize(
        project: &str,
        results: &[MutationResult],
        reused: usize,
        duration_ms: u64,
        diff_for: impl Fn(&MutationDetails) -> String,
    ) -> Self {
        let mut run = RunResult {
            project: project.to_string(),
            total: results.len(),
            reused,
            duration_ms,
            ..Default::default()
        };
        for result in results {
            match result.status.status {
                DetectionStatus::Killed => run.killed += 1,
                DetectionStatus::Survived => {
                    run.survived += 1;
                    let id = &result.details.id;
                    run.survived_mutants.push(SurvivedMutant {
                        ref_id: format!("m{}", run.survived),
                        class: id.location.class.clone(),
                        method: id.location.method.clone(),
                        descriptor: id.location.descriptor.clone(),
                        index: id.index,
                        line: result.details.line,
                        operator: id.operator.clone(),
                        description: id.description.clone(),
                        tests_run: result.status.tests_run,
                        diff: diff_for(&result.details),
                    });
                }
                DetectionStatus::TimedOut => run.timed_out += 1,
                DetectionStatus::MemoryError => run.memory_error += 1,
                DetectionStatus::NonViable => run.non_viable += 1,
                DetectionStatus::RunError => run.run_error += 1,
            }
        }
        let viable = run.total - run.non_viable;
        let detected = results
            .iter()
            .filter(|r| r.status.status.is_detected())
            .count();
        run.score = if viable == 0 {
            1.0
        } else {
            detected as f64 / viable as f64
        };
        run
    }

    pub fn survivor(&self, ref_id: &str) -> Option<&SurvivedMutant> {
        let ref_id = ref_id.trim_start_matches('@');
        self.survived_mutants.iter().find(|m| m.ref_id == ref_id)
    }
}

fn state_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(STATE_FILE)
}

pub fn save_last_run(result: &RunResult) {
    save_to_path(result, &state_path());
}

pub fn load_last_run() -> Option<RunResult> {
    load_from_path(&state_path())
}

pub fn save_to_path(result: &RunResult, path: &Path) {
    match serde_json::to_string(result) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!(path = %path.display(), error = %e, "failed to save run state");
            } else {
                debug!(path = %path.display(), "saved run state");
            }
        }
        Err(e) => warn!(error = %e, "failed to encode run state"),
    }
}

pub fn load_from_path(path: &Path) -> Option<RunResult> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
