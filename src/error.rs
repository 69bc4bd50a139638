//! Configuration-error taxonomy.
//!
//! Only configuration problems surface as `Result`s: they are detected at
//! layer construction and are never retried. Caller contract violations
//! (mismatched tensor shapes between paired arguments) are assertions at the
//! point of use, since they indicate a bug in the caller, not a recoverable
//! runtime fault.

use thiserror::Error;

/// Fatal configuration errors raised while building equivariant layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SymError {
    /// A size signature does not carry one width per arity class.
    #[error("size signature has {got} arity classes, expected {expected}")]
    SignatureLength { expected: usize, got: usize },

    /// The requested signatures yield a layer with no learnable weight.
    #[error("equivariant layer has no learnable weights (in_sizes {in_sizes:?}, out_sizes {out_sizes:?})")]
    EmptyLayer {
        in_sizes: Vec<usize>,
        out_sizes: Vec<usize>,
    },
}
