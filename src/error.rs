//! Error types shared by the graph engine
//!
//! Stale node references in the interactive controller are logged and
//! ignored, so they never surface as errors.

use thiserror::Error;

/// Failures reported by the sparse linear solver
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// A diagonal entry is zero, negative or not finite
    #[error("unable to factorize matrix: row {row} has diagonal {value}")]
    Factorization { row: usize, value: f64 },

    /// The matrix and right-hand side disagree in size
    #[error("dimension mismatch: matrix is {rows}x{rows}, right-hand side has {rhs} entries")]
    Dimension { rows: usize, rhs: usize },

    /// Conjugate gradient ran out of iterations
    #[error("conjugate gradient did not converge after {iterations} iterations (residual {residual:e})")]
    NotConverged { iterations: usize, residual: f64 },
}

/// Errors that can occur while building, clustering or laying out a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// The input graph or parameters cannot be processed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A restriction area has inverted or non-finite bounds
    #[error(
        "invalid restriction area: left={left}, right={right}, lower={lower}, upper={upper}"
    )]
    InvalidArea {
        left: f64,
        right: f64,
        lower: f64,
        upper: f64,
    },

    /// The centering solve failed for this layout pass
    #[error("numerical failure: {0}")]
    Solver(#[from] SolverError),

    /// A strict lookup referenced a node that does not exist
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// The document format is not supported
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The file extension could not be determined
    #[error("could not determine file format from path: {0}")]
    UnknownExtension(String),

    /// An I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be parsed or serialized
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type for graph engine operations
pub type Result<T> = std::result::Result<T, GraphError>;
