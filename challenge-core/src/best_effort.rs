//! Side effects whose failure is recorded but never aborts the surrounding flow.

use tracing::warn;

use crate::error::ClientError;

/// Outcome of a best-effort step.
///
/// Hard failures are plain `Result::Err` and propagate with `?`. A step wrapped
/// in `StepOutcome` can only fail softly: the flow continues and the error is
/// kept for diagnostics.
#[derive(Debug, Clone)]
#[must_use]
pub enum StepOutcome<T> {
    Done(T),
    SoftFailure {
        step: &'static str,
        error: ClientError,
    },
}

impl<T> StepOutcome<T> {
    /// Wrap the result of `step`, logging a soft failure.
    pub fn capture(step: &'static str, result: Result<T, ClientError>) -> Self {
        match result {
            Ok(value) => Self::Done(value),
            Err(error) => {
                warn!("Best-effort step '{}' failed: {}", step, error);
                Self::SoftFailure { step, error }
            }
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::SoftFailure { .. } => None,
        }
    }
}
