use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::exit_code::ExitCode;
use crate::history::HistoryStore;
use crate::instruction::{Instruction, listing};
use crate::mutants::{DetectionStatus, MutationDetails, MutationResult, MutationStatusTestPair};
use crate::reporter::{WorkerEvent, WorkerOutcome, parse_event};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start worker {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to hand candidates to worker: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode candidates: {0}")]
    Json(#[from] serde_json::Error),
}

/// How to launch `mutest worker` for a project.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub project: PathBuf,
    pub step_limit: Option<u64>,
    pub heap_limit: Option<usize>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, project: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            project: project.into(),
            step_limit: None,
            heap_limit: None,
        }
    }

    fn command(&self, candidates: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("worker")
            .arg(&self.project)
            .arg("--candidates")
            .arg(candidates);
        if let Some(steps) = self.step_limit {
            cmd.arg("--step-limit").arg(steps.to_string());
        }
        if let Some(heap) = self.heap_limit {
            cmd.arg("--heap-limit").arg(heap.to_string());
        }
        cmd
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Exited(ExitCode),
    /// Killed by us after a candidate ran past its timeout.
    Killed,
}

#[derive(Debug)]
pub struct WorkerRun {
    pub outcome: WorkerOutcome,
    pub exit: WorkerExit,
}

/// Verdict for the candidate a worker was running when it died.
pub fn status_for_exit(exit: WorkerExit) -> DetectionStatus {
    match exit {
        WorkerExit::Killed | WorkerExit::Exited(ExitCode::Timeout) => DetectionStatus::TimedOut,
        WorkerExit::Exited(ExitCode::OutOfMemory) => DetectionStatus::MemoryError,
        WorkerExit::Exited(_) => DetectionStatus::RunError,
    }
}

/// Split candidates into those whose verdict history already holds and
/// those that still have to run.
pub fn reuse_history(
    candidates: Vec<MutationDetails>,
    history: &dyn HistoryStore,
) -> (Vec<MutationResult>, Vec<MutationDetails>) {
    let mut known = Vec::new();
    let mut pending = Vec::new();
    for details in candidates {
        match history.previous_result(&details) {
            Some(status) => {
                debug!(mutation = %details.id, status = %status.status, "reusing verdict");
                known.push(MutationResult {
                    status: status.clone(),
                    details,
                });
            }
            None => pending.push(details),
        }
    }
    (known, pending)
}

/// Run every candidate through worker processes, one process at a time and
/// one class per process. Mutants are swapped into the worker's shared
/// space and never swapped back, so candidates of different classes must
/// not share a worker. Results come back in input order.
pub fn run_candidates(
    worker: &WorkerCommand,
    candidates: Vec<MutationDetails>,
    timeout: Duration,
) -> Result<Vec<MutationResult>, RunnerError> {
    let mut results = Vec::with_capacity(candidates.len());
    for group in group_by_class(&candidates) {
        debug!(
            class = group[0].id.class_name(),
            candidates = group.len(),
            "running class"
        );
        results.extend(run_class_group(worker, group, timeout)?);
    }

    results.sort_by_key(|r| {
        candidates
            .iter()
            .position(|d| d.id == r.details.id)
            .unwrap_or(usize::MAX)
    });
    Ok(results)
}

/// Candidates split by mutated class, classes in order of first appearance.
pub fn group_by_class(candidates: &[MutationDetails]) -> Vec<Vec<MutationDetails>> {
    let mut groups: Vec<Vec<MutationDetails>> = Vec::new();
    for details in candidates {
        match groups
            .iter_mut()
            .find(|g| g[0].id.class_name() == details.id.class_name())
        {
            Some(group) => group.push(details.clone()),
            None => groups.push(vec![details.clone()]),
        }
    }
    groups
}

/// A worker that dies takes its in-flight candidate with it; everything it
/// never described goes to the next worker.
fn run_class_group(
    worker: &WorkerCommand,
    mut remaining: Vec<MutationDetails>,
    timeout: Duration,
) -> Result<Vec<MutationResult>, RunnerError> {
    let mut results: Vec<MutationResult> = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let run = run_worker_process(worker, &remaining, timeout)?;
        let before = results.len();
        let mut done = HashSet::new();

        for (id, status) in run.outcome.reported {
            if let Some(details) = remaining.iter().find(|d| d.id == id) {
                done.insert(id);
                results.push(MutationResult {
                    details: details.clone(),
                    status,
                });
            }
        }
        if let Some(id) = run.outcome.in_flight {
            if let Some(details) = remaining.iter().find(|d| d.id == id) {
                let status = status_for_exit(run.exit);
                info!(
                    mutation = %id,
                    status = %status,
                    exit = ?run.exit,
                    "worker ended mid-mutation"
                );
                done.insert(id);
                results.push(MutationResult {
                    details: details.clone(),
                    status: MutationStatusTestPair::new(0, status),
                });
            }
        }
        remaining.retain(|d| !done.contains(&d.id));

        if results.len() == before && !remaining.is_empty() {
            warn!(
                remaining = remaining.len(),
                exit = ?run.exit,
                "worker made no progress"
            );
            results.extend(remaining.drain(..).map(|details| MutationResult {
                details,
                status: MutationStatusTestPair::new(0, DetectionStatus::RunError),
            }));
        } else if !remaining.is_empty() {
            debug!(remaining = remaining.len(), "rescheduling candidates");
        }
    }
    Ok(results)
}

/// Start one worker on `candidates` and follow its event stream. The
/// timeout restarts whenever the worker describes a new candidate.
pub fn run_worker_process(
    worker: &WorkerCommand,
    candidates: &[MutationDetails],
    timeout: Duration,
) -> Result<WorkerRun, RunnerError> {
    let mut handoff = tempfile::Builder::new()
        .prefix("mutest-candidates-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut handoff, candidates)?;

    let mut child = worker
        .command(handoff.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: worker.program.clone(),
            source,
        })?;
    debug!(pid = child.id(), candidates = candidates.len(), "started worker");

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }

    let mut outcome = WorkerOutcome::default();
    let mut deadline = Instant::now() + timeout;
    loop {
        let wait = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(line) => {
                if let Some(event) = parse_event(&line) {
                    if matches!(event, WorkerEvent::Describe { .. }) {
                        deadline = Instant::now() + timeout;
                    }
                    outcome.apply(event);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "worker timed out, killing it"
                );
                kill(&mut child);
                return Ok(WorkerRun {
                    outcome,
                    exit: WorkerExit::Killed,
                });
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = child.wait()?;
    let exit = ExitCode::from_code(status.code().unwrap_or(ExitCode::UnknownError.code()));
    debug!(exit = ?exit, "worker finished");
    Ok(WorkerRun {
        outcome,
        exit: WorkerExit::Exited(exit),
    })
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "worker already gone");
    }
    let _ = child.wait();
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    use similar::TextDiff;
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            similar::ChangeTag::Delete => {
                output.push_str(&format!("- {}", change));
            }
            similar::ChangeTag::Insert => {
                output.push_str(&format!("+ {}", change));
            }
            _ => {}
        }
    }
    output
}

/// Diff of two instruction streams, one instruction per line.
pub fn listing_diff(original: &[Instruction], mutated: &[Instruction]) -> String {
    generate_diff(&listing(original), &listing(mutated))
}
