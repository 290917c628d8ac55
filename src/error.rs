use thiserror::Error;

#[derive(Error, Debug)]
pub enum FemError {
    /// Degenerate elements or malformed domain description
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Conjugate gradient did not reach the requested residual
    #[error("Convergence error: {0}")]
    Convergence(String),

    /// Parameter outside of its physical domain
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unreadable or malformed study / mesh files
    #[error("Input error: {0}")]
    Input(String),

    #[error("Output error: {0}")]
    Output(String),
}
