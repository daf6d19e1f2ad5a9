use thiserror::Error;

/// Errors surfaced by the layout engine.
///
/// Routing failures inside the multi-start loop are handled internally;
/// only a full exhaustion of all tries becomes `NoEmbeddingFound`.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// The input line graph violates a structural invariant.
    #[error("invalid input: {what} (at {entity} {idx})")]
    InvalidInput {
        what: String,
        entity: &'static str,
        idx: usize,
    },

    /// All routing attempts failed; no octilinear embedding was found.
    #[error("no embedding found after exhausting all tries")]
    NoEmbeddingFound,

    /// No candidate grid cells remained for a combinatorial node, even
    /// after expanding the search radius.
    #[error("no grid candidates for combinatorial node {node}")]
    NoCandidates { node: usize },

    /// The integer program is infeasible, unbounded or undefined.
    #[error("integer program is infeasible")]
    IlpInfeasible,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("interchange format error: {0}")]
    Format(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LayoutError>;
