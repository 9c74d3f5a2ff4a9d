use thiserror::Error;

/// Failures a semester form can run into. All of them are handled by the
/// form itself; none are fatal to the program.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GpaError {
    /// A course row is missing a code, grade or valid credit hours.
    #[error("course row {row}: {reason}")]
    InvalidCourseInput { row: usize, reason: String },

    /// The retake lookup failed or timed out.
    #[error("retake check unavailable: {0}")]
    RetakeCheckUnavailable(String),

    /// The authoritative save was rejected.
    #[error("{0}")]
    SubmissionFailed(String),
}

impl GpaError {
    pub fn invalid(row: usize, reason: impl Into<String>) -> Self {
        GpaError::InvalidCourseInput {
            row,
            reason: reason.into(),
        }
    }
}
