use mutest::engine::{MutationEngine, Mutater};
use mutest::exit_code::ExitCode;
use mutest::history::{FileHistoryStore, HistoryListener};
use mutest::mutants::{MutationDetails, MutationIdentifier};
use mutest::operators;
use mutest::output;
use mutest::reporter::JsonLinesReporter;
use mutest::runner::{self, WorkerCommand};
use mutest::state;
use mutest::suite::{Project, TimeoutDecoratedSource};
use mutest::testapi::FailureKind;
use mutest::vm::Limits;
use mutest::worker::MutationTestWorker;

use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mutest", version, about = "Mutation testing by removing discarded calls")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List mutation candidates in a project
    Scan {
        /// Project file (classes and tests)
        project: PathBuf,
        /// Only scan this class
        #[arg(short, long)]
        class: Option<String>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Run mutation testing on a project
    Run {
        /// Project file (classes and tests)
        project: PathBuf,
        /// Only mutate this class
        #[arg(short, long)]
        class: Option<String>,
        /// Output JSON instead of human-readable text
        #[arg(long)]
        json: bool,
        /// Exit code only, no output
        #[arg(short, long)]
        quiet: bool,
        /// Wall-clock limit per mutant, in milliseconds
        #[arg(long, env = "MUTEST_TIMEOUT_MS", default_value = "10000")]
        timeout_ms: u64,
        /// Reuse and record verdicts in this history file
        #[arg(long, env = "MUTEST_HISTORY")]
        history: Option<PathBuf>,
        /// Instructions one test invocation may execute
        #[arg(long, env = "MUTEST_STEP_LIMIT")]
        step_limit: Option<u64>,
        /// Objects one test may allocate
        #[arg(long, env = "MUTEST_HEAP_LIMIT")]
        heap_limit: Option<usize>,
    },
    /// Run candidates in this process and stream verdicts as JSON lines
    #[command(hide = true)]
    Worker {
        /// Project file (classes and tests)
        project: PathBuf,
        /// JSON file holding the candidates to run, in order
        #[arg(long)]
        candidates: PathBuf,
        #[arg(long)]
        step_limit: Option<u64>,
        #[arg(long)]
        heap_limit: Option<usize>,
    },
    /// Show details for a survived mutant by ref
    Show {
        /// Mutant ref (e.g. @m1 or m1)
        #[arg(name = "ref")]
        mutant_ref: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Summary of last run
    Status {
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let exit_code = match cli.command {
        Commands::Scan {
            project,
            class,
            json,
        } => cmd_scan(&project, class, json),
        Commands::Run {
            project,
            class,
            json,
            quiet,
            timeout_ms,
            history,
            step_limit,
            heap_limit,
        } => cmd_run(
            &project,
            class,
            json,
            quiet,
            Duration::from_millis(timeout_ms),
            history,
            step_limit,
            heap_limit,
        ),
        Commands::Worker {
            project,
            candidates,
            step_limit,
            heap_limit,
        } => cmd_worker(&project, &candidates, step_limit, heap_limit),
        Commands::Show { mutant_ref, json } => cmd_show(mutant_ref, json),
        Commands::Status { json } => cmd_status(json),
    };

    process::exit(exit_code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("MUTEST_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_project(path: &Path) -> Result<Project, i32> {
    if !path.exists() {
        output::print_error(&format!(
            "Project file not found: {}. Check the path and try again.",
            path.display()
        ));
        return Err(2);
    }
    Project::load(path).map_err(|e| {
        output::print_error(&format!("Failed to load project: {}", e));
        3
    })
}

/// Candidates for `class`, or for every class, with covering tests attached.
fn collect_candidates(
    project: &Project,
    engine: &Mutater,
    class: Option<String>,
) -> Result<Vec<MutationDetails>, i32> {
    let classes = match class {
        Some(c) => {
            if engine.class(&c).is_none() {
                output::print_error(&format!(
                    "Class '{}' not found. Available: {}",
                    c,
                    engine.class_names().join(", ")
                ));
                return Err(2);
            }
            vec![c]
        }
        None => engine.class_names(),
    };

    let mut candidates = Vec::new();
    for name in &classes {
        match engine.find_mutations(name) {
            Ok(found) => candidates.extend(found),
            Err(e) => {
                output::print_error(&format!("Failed to scan {}: {}", name, e));
                return Err(3);
            }
        }
    }
    project.assign_coverage(&mut candidates);
    Ok(candidates)
}

fn print_json(value: &impl serde::Serialize) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => output::print_error(&format!("Failed to encode output: {}", e)),
    }
}

fn cmd_scan(project_path: &Path, class: Option<String>, json_mode: bool) -> i32 {
    let project = match load_project(project_path) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let engine = Mutater::new(project.classes.clone(), operators::all());
    let candidates = match collect_candidates(&project, &engine, class) {
        Ok(c) => c,
        Err(code) => return code,
    };
    if json_mode {
        print_json(&candidates);
    } else {
        output::print_candidates(&candidates);
    }
    0
}

#[allow(clippy::too_many_arguments)]
fn cmd_run(
    project_path: &Path,
    class: Option<String>,
    json_mode: bool,
    quiet: bool,
    timeout: Duration,
    history: Option<PathBuf>,
    step_limit: Option<u64>,
    heap_limit: Option<usize>,
) -> i32 {
    let start = Instant::now();
    let project = match load_project(project_path) {
        Ok(p) => p,
        Err(code) => return code,
    };

    match project.run_baseline() {
        Ok(failures) if failures.is_empty() => {}
        Ok(failures) => {
            let detail: Vec<String> = failures
                .iter()
                .map(|(name, failure)| format!("  {}: {}", name, failure))
                .collect();
            output::print_error(&format!(
                "Tests fail before mutation. Fix failing tests first.\n{}",
                detail.join("\n")
            ));
            return 3;
        }
        Err(e) => {
            output::print_error(&format!("Failed to build test suite: {}", e));
            return 3;
        }
    }

    let engine = Mutater::new(project.classes.clone(), operators::all());
    let candidates = match collect_candidates(&project, &engine, class) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let display = project_path.display().to_string();

    if candidates.is_empty() {
        if !quiet {
            if json_mode {
                print_json(&state::RunResult::summarize(&display, &[], 0, 0, |_| String::new()));
            } else {
                output::print_success("No mutation candidates found.");
            }
        }
        return 0;
    }

    let mut store = match &history {
        Some(path) => match FileHistoryStore::open(path) {
            Ok(store) => store,
            Err(e) => {
                output::print_error(&format!("Failed to open history: {}", e));
                return 3;
            }
        },
        None => FileHistoryStore::in_memory(),
    };

    let order: Vec<MutationIdentifier> = candidates.iter().map(|d| d.id.clone()).collect();
    let (mut results, pending) = runner::reuse_history(candidates, &store);
    let reused = results.len();

    if !pending.is_empty() {
        let program = match std::env::current_exe() {
            Ok(p) => p,
            Err(e) => {
                output::print_error(&format!("Cannot locate the mutest binary: {}", e));
                return 3;
            }
        };
        let worker = WorkerCommand {
            step_limit,
            heap_limit,
            ..WorkerCommand::new(program, project_path)
        };
        match runner::run_candidates(&worker, pending, timeout) {
            Ok(ran) => results.extend(ran),
            Err(e) => {
                output::print_error(&format!("Failed to run mutants: {}", e));
                return 3;
            }
        }
    }
    results.sort_by_key(|r| order.iter().position(|id| *id == r.details.id));

    HistoryListener::new(&mut store).handle_mutation_results(&results);
    if let Err(e) = store.save() {
        warn!(error = %e, "failed to save history");
    }

    let run_result = state::RunResult::summarize(
        &display,
        &results,
        reused,
        start.elapsed().as_millis() as u64,
        |details| mutated_diff(&engine, details),
    );
    state::save_last_run(&run_result);

    if quiet {
        return if run_result.survived > 0 { 1 } else { 0 };
    }

    if json_mode {
        print_json(&run_result);
    } else {
        output::print_run_result(&run_result);
    }

    if run_result.survived > 0 { 1 } else { 0 }
}

/// Listing diff of the mutated method against the original.
fn mutated_diff(engine: &Mutater, details: &MutationDetails) -> String {
    let location = &details.id.location;
    let Some(original) = engine.class(&location.class) else {
        return String::new();
    };
    let mutant = match engine.get_mutation(&details.id) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "cannot rebuild mutant for diff");
            return String::new();
        }
    };
    let code_of = |class: &mutest::class::ClassDef| {
        class
            .methods
            .iter()
            .find(|m| m.name == location.method && m.descriptor.to_string() == location.descriptor)
            .map(|m| m.code.clone())
    };
    match (code_of(original), code_of(&mutant.class)) {
        (Some(before), Some(after)) => runner::listing_diff(&before, &after),
        _ => String::new(),
    }
}

fn cmd_worker(
    project_path: &Path,
    candidates_path: &Path,
    step_limit: Option<u64>,
    heap_limit: Option<usize>,
) -> i32 {
    let project = match Project::load(project_path) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "worker cannot load project");
            return ExitCode::UnknownError.code();
        }
    };
    let candidates: Vec<MutationDetails> = match std::fs::read_to_string(candidates_path)
        .map_err(|e| e.to_string())
        .and_then(|data| serde_json::from_str(&data).map_err(|e| e.to_string()))
    {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = %candidates_path.display(), "worker cannot read candidates");
            return ExitCode::UnknownError.code();
        }
    };
    let suite = match project.suite() {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "worker cannot build test suite");
            return ExitCode::UnknownError.code();
        }
    };

    let tests = TimeoutDecoratedSource::new(suite, |kind| {
        let code = match kind {
            FailureKind::OutOfMemory => ExitCode::OutOfMemory,
            _ => ExitCode::Timeout,
        };
        warn!(?kind, "test exhausted its limits, exiting worker");
        process::exit(code.code());
    });

    let mut limits = Limits::default();
    if let Some(steps) = step_limit {
        limits.step_budget = steps;
    }
    if let Some(heap) = heap_limit {
        limits.heap_limit = heap;
    }
    let boundary = project.class_space().with_limits(limits);
    let engine = Mutater::new(project.classes.clone(), operators::all());

    let stdout = std::io::stdout();
    let mut reporter = JsonLinesReporter::new(stdout.lock());
    let mut worker = MutationTestWorker::new(&engine, boundary, &tests);
    match worker.run(&candidates, &mut reporter) {
        Ok(()) => ExitCode::Ok.code(),
        Err(e) => {
            error!(error = %e, "worker aborted");
            ExitCode::UnknownError.code()
        }
    }
}

fn cmd_show(mutant_ref: String, json_mode: bool) -> i32 {
    let last_run = match state::load_last_run() {
        Some(r) => r,
        None => {
            output::print_error("No previous run found. Run `mutest run` first.");
            return 2;
        }
    };

    match last_run.survivor(&mutant_ref) {
        Some(m) => {
            if json_mode {
                print_json(m);
            } else {
                output::print_mutant_detail(m);
            }
            0
        }
        None => {
            let valid: Vec<_> = last_run
                .survived_mutants
                .iter()
                .map(|m| format!("@{}", m.ref_id))
                .collect();
            output::print_error(&format!(
                "Mutant @{} not found. Valid refs: {}",
                mutant_ref.trim_start_matches('@'),
                valid.join(", ")
            ));
            2
        }
    }
}

fn cmd_status(json_mode: bool) -> i32 {
    match state::load_last_run() {
        Some(result) => {
            if json_mode {
                print_json(&result);
            } else {
                output::print_status(&result);
            }
            0
        }
        None => {
            output::print_error("No previous run found. Run `mutest run` first.");
            2
        }
    }
}
