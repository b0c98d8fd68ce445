//! Control-flow signals a status unit can raise instead of returning a status.

use std::fmt;

use crate::error::UnitError;

/// Why a status unit stopped without producing a next status.
///
/// Only [`Halt::Failed`] is an error.  The other variants are deliberate
/// exits that the reactor handles without logging a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// Stop this callback; the state slot has already been moved (for example
    /// to CLOSE or ALIVE) and must not be overwritten.
    Abort,
    /// The peer answered our close request with the expected code.  The
    /// connection is shut down cleanly.
    RequestedClose,
    /// The peer closed with a code we did not ask for.  Emergency callback,
    /// then shutdown.
    ForcedClose,
    /// A real failure.  Emergency callback, then shutdown.
    Failed(UnitError),
}

impl From<UnitError> for Halt {
    fn from(e: UnitError) -> Self {
        Halt::Failed(e)
    }
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::Abort => write!(f, "unit aborted"),
            Halt::RequestedClose => write!(f, "requested close completed"),
            Halt::ForcedClose => write!(f, "forced close by peer"),
            Halt::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// Return type of every status unit.
pub type UnitResult<T> = Result<T, Halt>;
