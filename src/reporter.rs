use crate::mutants::{MutationIdentifier, MutationStatusTestPair};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::{debug, warn};

/// Receives progress from a worker. `describe` fires before any test runs
/// so an abrupt exit still leaves a record of the attempted mutation.
pub trait Reporter {
    fn describe(&mut self, id: &MutationIdentifier);
    fn report(&mut self, id: &MutationIdentifier, result: &MutationStatusTestPair);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Describe {
        id: MutationIdentifier,
    },
    Report {
        id: MutationIdentifier,
        result: MutationStatusTestPair,
    },
}

#[derive(Debug, Default)]
pub struct CollectingReporter {
    pub events: Vec<WorkerEvent>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<(MutationIdentifier, MutationStatusTestPair)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::Report { id, result } => Some((id.clone(), result.clone())),
                WorkerEvent::Describe { .. } => None,
            })
            .collect()
    }
}

impl Reporter for CollectingReporter {
    fn describe(&mut self, id: &MutationIdentifier) {
        self.events.push(WorkerEvent::Describe { id: id.clone() });
    }

    fn report(&mut self, id: &MutationIdentifier, result: &MutationStatusTestPair) {
        self.events.push(WorkerEvent::Report {
            id: id.clone(),
            result: result.clone(),
        });
    }
}

/// Writes one JSON event per line and flushes after each, so the reader
/// sees every describe before the worker starts running tests.
pub struct JsonLinesReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: &WorkerEvent) {
        let written = serde_json::to_string(event)
            .map_err(std::io::Error::from)
            .and_then(|line| {
                writeln!(self.out, "{}", line)?;
                self.out.flush()
            });
        if let Err(e) = written {
            warn!(error = %e, "failed to write worker event");
        }
    }
}

impl<W: Write> Reporter for JsonLinesReporter<W> {
    fn describe(&mut self, id: &MutationIdentifier) {
        self.emit(&WorkerEvent::Describe { id: id.clone() });
    }

    fn report(&mut self, id: &MutationIdentifier, result: &MutationStatusTestPair) {
        self.emit(&WorkerEvent::Report {
            id: id.clone(),
            result: result.clone(),
        });
    }
}

/// What the reader of a worker's event stream learned.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub reported: Vec<(MutationIdentifier, MutationStatusTestPair)>,
    /// Described but never reported: not verified.
    pub in_flight: Option<MutationIdentifier>,
}

impl WorkerOutcome {
    pub fn apply(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Describe { id } => {
                if let Some(previous) = self.in_flight.replace(id) {
                    warn!(mutation = %previous, "described mutation was never reported");
                }
            }
            WorkerEvent::Report { id, result } => {
                if self.in_flight.as_ref() == Some(&id) {
                    self.in_flight = None;
                } else {
                    warn!(mutation = %id, "report without matching describe");
                }
                self.reported.push((id, result));
            }
        }
    }
}

pub fn parse_event(line: &str) -> Option<WorkerEvent> {
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, line, "ignoring unparseable worker output");
            None
        }
    }
}

/// Read a whole event stream. A truncated last line is ignored.
pub fn read_worker_events(reader: impl BufRead) -> WorkerOutcome {
    let mut outcome = WorkerOutcome::default();
    for line in reader.lines() {
        let Ok(line) = line else { break };
        if let Some(event) = parse_event(&line) {
            outcome.apply(event);
        }
    }
    outcome
}
