use std::fmt;
use std::fmt::{Display, Formatter};

/// Errors raised by the fragmentation tree core.
///
/// Infeasibility is not an error: an empty decomposition result or an
/// infeasible solve is reported through empty collections and
/// `ReturnStatus::Infeasible` respectively, since "no candidates" is an
/// expected scientific outcome.
#[derive(Clone, Debug, PartialEq)]
pub enum FtError {
    /// Malformed input (unknown element, negative tolerance, inverted bounds,
    /// a graph without a root). Rejected before any search begins.
    InvalidInput(String),
    /// The solver produced an inconsistent result or ran into an internal
    /// failure. Never retried silently: a deterministic solve on the same
    /// input cannot change its outcome.
    SolverFailure(String),
    /// A caller-triggered abort, distinguishable from infeasibility so the
    /// caller can decide whether to retry with a larger time budget.
    Canceled,
}

impl Display for FtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FtError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            FtError::SolverFailure(msg) => write!(f, "solver failure: {}", msg),
            FtError::Canceled => write!(f, "computation canceled"),
        }
    }
}

impl std::error::Error for FtError {}
