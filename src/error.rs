//! Public error type for structural-tag conversion.

use thiserror::Error;

/// Error returned by [`structural_tag_to_grammar`](crate::structural_tag_to_grammar).
///
/// `InvalidJson` covers failures to parse the input as JSON at all;
/// `InvalidStructuralTag` covers every structural or semantic problem
/// after that, including wrapped failures from the grammar, regex and
/// schema converters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralTagError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid structural tag: {0}")]
    InvalidStructuralTag(String),
}

impl StructuralTagError {
    /// The human-readable message without the error-family prefix.
    pub fn message(&self) -> &str {
        match self {
            StructuralTagError::InvalidJson(msg) => msg,
            StructuralTagError::InvalidStructuralTag(msg) => msg,
        }
    }
}
