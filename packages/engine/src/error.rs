#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidStep,
    UnknownTarget,
    TypeMismatch,
    Execution,
    Config,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidStep => "STITCH_ERROR_INVALID_STEP",
            Self::UnknownTarget => "STITCH_ERROR_UNKNOWN_TARGET",
            Self::TypeMismatch => "STITCH_ERROR_TYPE_MISMATCH",
            Self::Execution => "STITCH_ERROR_EXECUTION",
            Self::Config => "STITCH_ERROR_CONFIG",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::InvalidStep,
            Self::UnknownTarget,
            Self::TypeMismatch,
            Self::Execution,
            Self::Config,
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchError {
    pub code: &'static str,
    pub message: String,
}

impl StitchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str(),
            message: message.into(),
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}

impl std::fmt::Display for StitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StitchError {}

pub(crate) fn invalid_step_error(message: impl Into<String>) -> StitchError {
    StitchError::new(ErrorCode::InvalidStep, message)
}

pub(crate) fn unknown_target_error(target: &str) -> StitchError {
    StitchError::new(
        ErrorCode::UnknownTarget,
        format!("no pending step produces table `{target}`"),
    )
}

pub(crate) fn type_mismatch_error(message: impl Into<String>) -> StitchError {
    StitchError::new(ErrorCode::TypeMismatch, message)
}

pub(crate) fn execution_error(message: impl Into<String>) -> StitchError {
    StitchError::new(ErrorCode::Execution, message)
}

pub(crate) fn config_error(message: impl Into<String>) -> StitchError {
    StitchError::new(ErrorCode::Config, message)
}
