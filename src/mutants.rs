use crate::class::ClassDef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The method a mutation lives in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub class: String,
    pub method: String,
    pub descriptor: String,
}

/// Stable name for one candidate mutation within a scan. `index` is the
/// position of the mutated instruction in the original method stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationIdentifier {
    pub operator: String,
    pub location: Location,
    pub index: usize,
    pub description: String,
}

impl MutationIdentifier {
    pub fn class_name(&self) -> &str {
        &self.location.class
    }
}

impl fmt::Display for MutationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}{}#{} [{}] {}",
            self.location.class,
            self.location.method,
            self.location.descriptor,
            self.index,
            self.operator,
            self.description
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationDetails {
    pub id: MutationIdentifier,
    pub line: Option<u32>,
    pub in_static_initializer: bool,
    /// Covering tests, in the order they should run.
    #[serde(default)]
    pub tests_in_order: Vec<String>,
    pub class_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionStatus {
    Killed,
    Survived,
    #[serde(rename = "TIMEOUT")]
    TimedOut,
    NonViable,
    MemoryError,
    RunError,
}

impl DetectionStatus {
    pub fn is_detected(self) -> bool {
        matches!(
            self,
            DetectionStatus::Killed | DetectionStatus::TimedOut | DetectionStatus::MemoryError
        )
    }
}

impl fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectionStatus::Killed => "KILLED",
            DetectionStatus::Survived => "SURVIVED",
            DetectionStatus::TimedOut => "TIMEOUT",
            DetectionStatus::NonViable => "NON_VIABLE",
            DetectionStatus::MemoryError => "MEMORY_ERROR",
            DetectionStatus::RunError => "RUN_ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationStatusTestPair {
    pub tests_run: usize,
    pub status: DetectionStatus,
    pub killing_test: Option<String>,
}

impl MutationStatusTestPair {
    pub fn new(tests_run: usize, status: DetectionStatus) -> Self {
        Self {
            tests_run,
            status,
            killing_test: None,
        }
    }

    pub fn killed_by(tests_run: usize, test: impl Into<String>) -> Self {
        Self {
            tests_run,
            status: DetectionStatus::Killed,
            killing_test: Some(test.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    pub details: MutationDetails,
    pub status: MutationStatusTestPair,
}

/// A class rewritten with exactly one mutation applied.
#[derive(Debug, Clone)]
pub struct Mutant {
    pub details: MutationDetails,
    pub class: ClassDef,
    pub bytes: Vec<u8>,
}
