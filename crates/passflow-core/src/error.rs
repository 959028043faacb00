//! Error types for pass scheduling and execution.

use thiserror::Error;

use crate::equivalence::MismatchReport;

/// Boxed error raised by an external collaborator: a pass, an invariant
/// check, or the artifact's `finalize` / `evaluate` hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PassError {
    #[error(
        "pass schedule constraint violated: expected {before} before {after} but found \
         {before} at index {before_index} and {after} at index {after_index} in pass list"
    )]
    ScheduleViolation {
        before: String,
        after: String,
        before_index: usize,
        after_index: usize,
    },

    #[error("circular dependency detected within the constraints and steps was set to {steps}")]
    CyclicSchedule { steps: usize },

    #[error("invalid pass manager configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    CorrectnessMismatch(MismatchReport),

    /// An error raised by a pass or by an artifact hook, propagated as-is.
    #[error(transparent)]
    External(#[from] BoxError),
}

impl PassError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        PassError::Configuration(message.into())
    }
}
