/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCode {
    Ok,
    OutOfMemory,
    ForcedExit,
    UnknownError,
    Timeout,
}

impl ExitCode {
    pub const ALL: [ExitCode; 5] = [
        ExitCode::Ok,
        ExitCode::OutOfMemory,
        ExitCode::ForcedExit,
        ExitCode::UnknownError,
        ExitCode::Timeout,
    ];

    pub fn code(self) -> i32 {
        match self {
            ExitCode::Ok => 0,
            ExitCode::OutOfMemory => 11,
            ExitCode::ForcedExit => 12,
            ExitCode::UnknownError => 13,
            ExitCode::Timeout => 14,
        }
    }

    /// Codes outside the known set are `UnknownError`.
    pub fn from_code(code: i32) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .unwrap_or(ExitCode::UnknownError)
    }

    pub fn is_ok(self) -> bool {
        self == ExitCode::Ok
    }

    pub fn is_handled_error(self) -> bool {
        matches!(
            self,
            ExitCode::OutOfMemory | ExitCode::ForcedExit | ExitCode::Timeout
        )
    }

    pub fn is_unhandled_error(self) -> bool {
        self == ExitCode::UnknownError
    }
}
