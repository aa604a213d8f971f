use console::Style;
use crate::mutants::MutationDetails;
use crate::state::{RunResult, SurvivedMutant};

pub fn print_error(msg: &str) {
    let style = Style::new().red().bold();
    eprintln!("{} {}", style.apply_to("✗"), msg);
}

pub fn print_success(msg: &str) {
    let style = Style::new().green().bold();
    println!("{} {}", style.apply_to("✓"), msg);
}

fn location(class: &str, method: &str, line: Option<u32>) -> String {
    match line {
        Some(line) => format!("{}.{}:{}", class, method, line),
        None => format!("{}.{}", class, method),
    }
}

pub fn print_candidates(candidates: &[MutationDetails]) {
    let dim = Style::new().dim();
    let op_style = Style::new().magenta();
    for details in candidates {
        let id = &details.id;
        println!(
            "  {} {} {}",
            location(&id.location.class, &id.location.method, details.line),
            dim.apply_to(format!("#{}", id.index)),
            op_style.apply_to(&id.description),
        );
    }
    println!("{} candidates", candidates.len());
}

pub fn print_run_result(result: &RunResult) {
    let score_pct = result.score * 100.0;
    let viable = result.total - result.non_viable;

    if result.survived == 0 {
        let style = Style::new().green().bold();
        println!(
            "{} {}: {} mutants, none survived ({:.1}% detected) in {:.1}s",
            style.apply_to("✓"),
            result.project,
            viable,
            score_pct,
            result.duration_ms as f64 / 1000.0,
        );
    } else {
        let style = Style::new().yellow().bold();
        println!(
            "{} {}: {} survived / {} viable ({:.1}% detected) in {:.1}s",
            style.apply_to("!"),
            result.project,
            result.survived,
            viable,
            score_pct,
            result.duration_ms as f64 / 1000.0,
        );
    }

    let dim = Style::new().dim();
    let notes = [
        (result.non_viable, "non-viable mutants skipped"),
        (result.timed_out, "mutants timed out"),
        (result.memory_error, "mutants exhausted memory"),
        (result.run_error, "mutants could not be run"),
        (result.reused, "verdicts reused from history"),
    ];
    for (count, note) in notes {
        if count > 0 {
            println!("  {} {} {}", dim.apply_to("·"), count, note);
        }
    }

    if result.survived_mutants.is_empty() {
        return;
    }
    println!();
    for m in &result.survived_mutants {
        print_survivor_line(m);
    }
}

fn print_survivor_line(m: &SurvivedMutant) {
    let ref_style = Style::new().cyan().bold();
    let op_style = Style::new().magenta();
    println!(
        "  {} {} {}",
        ref_style.apply_to(format!("@{}", m.ref_id)),
        location(&m.class, &m.method, m.line),
        op_style.apply_to(&m.description),
    );
}

pub fn print_mutant_detail(m: &SurvivedMutant) {
    let ref_style = Style::new().cyan().bold();
    let dim = Style::new().dim();

    println!(
        "{} {}{} [{}]",
        ref_style.apply_to(format!("@{}", m.ref_id)),
        location(&m.class, &m.method, m.line),
        m.descriptor,
        m.operator,
    );
    println!(
        "  {}",
        dim.apply_to(format!(
            "{} at instruction {}, survived {} tests",
            m.description, m.index, m.tests_run
        ))
    );
    println!();

    for line in m.diff.lines() {
        if line.starts_with('-') {
            let del_style = Style::new().red();
            println!("  {}", del_style.apply_to(line));
        } else if line.starts_with('+') {
            let add_style = Style::new().green();
            println!("  {}", add_style.apply_to(line));
        }
    }
}

pub fn print_status(result: &RunResult) {
    let score_pct = result.score * 100.0;
    let viable = result.total - result.non_viable;

    println!(
        "Last run on {}: {} mutants, {} killed, {} survived ({:.1}% score)",
        result.project, viable, result.killed, result.survived, score_pct,
    );

    if result.survived > 0 {
        println!();
        for m in &result.survived_mutants {
            print_survivor_line(m);
        }
        println!();
        println!("Use `mutest show @m1` for details on a specific mutant.");
    }
}
