//! Module containing the typed error taxonomy for the control stack.

use thiserror::Error;

/// Fatal conditions raised by parameter construction or the fixed-point
/// solver.  Everything else propagates as plain [`anyhow::Error`].
#[derive(Debug, Error)]
pub enum PlatoonError {
    /// The supplied parameter set cannot be completed into a consistent
    /// fundamental diagram.  Raised at construction, never retried.
    #[error("inconsistent parameter set: {0}")]
    Configuration(String),

    /// The fixed-point residual exceeded the divergence threshold.  Fatal to
    /// the current solve; the caller may retry with adjusted damping.
    #[error("costate sweep diverged: residual {residual:.4e} at iteration {iterations}")]
    Divergence { residual: f64, iterations: usize },

    /// The hard iteration ceiling was reached without convergence.  Distinct
    /// from the soft iteration-budget stop, which returns a best-effort
    /// control instead of failing.
    #[error("iteration ceiling {ceiling} reached without convergence (residual {residual:.4e})")]
    IterationCeiling { ceiling: usize, residual: f64 },
}
