//! # Error Types
//!
//! Errors in this engine are structural: they represent attempts to wire
//! networks with incompatible interfaces, or call sequences that break the
//! forward/backward pairing contract. None of them are recoverable — the
//! engine performs pure, deterministic computation with no I/O, so every
//! detected violation aborts the current top-level call.
//!
//! The three families:
//!
//! - **Construction time**: [`NetError::ShapeMismatch`], [`NetError::UnknownNode`]
//! - **Call time**: [`NetError::DimensionMismatch`], [`NetError::WeightLength`],
//!   [`NetError::ZeroSamples`]
//! - **Protocol violations**: [`NetError::AliasingViolation`]

use thiserror::Error;

/// Errors raised by template construction, instance execution, and the
/// weight protocol.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NetError {
    /// A combinator's dimension-compatibility rule was violated.
    /// Raised when the template is built, never at create or call time.
    #[error("cannot {op}: dimension {left} ≠ {right}")]
    ShapeMismatch {
        op: &'static str,
        left: usize,
        right: usize,
    },

    /// A vector or matrix handed to apply/backpropagate disagrees with the
    /// node's declared input/output dimension.
    #[error("{what}: expected dimension {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// The memo ring buffer was read without a prior matching write, written
    /// past its declared mirror count, or consulted before init/allocate ran
    /// under the current seed. Indicates a malformed call sequence.
    #[error("aliasing protocol violation at node {node}: {reason}")]
    AliasingViolation { node: usize, reason: String },

    /// An aliasing template referenced an instance that does not exist in
    /// the network it was created against.
    #[error("unknown instance index {index}")]
    UnknownNode { index: usize },

    /// A flat weight buffer's length disagrees with the network's total
    /// weight dimension.
    #[error("weight buffer length mismatch: expected {expected}, got {got}")]
    WeightLength { expected: usize, got: usize },

    /// A gradient was requested averaged over zero samples.
    #[error("cannot average a weight gradient over zero samples")]
    ZeroSamples,
}
