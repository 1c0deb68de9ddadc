//! Error taxonomy for joint construction and mutation.
//!
//! The per-step solve loops never return `Result`; every division and
//! matrix solve there is epsilon-guarded and degrades to zero instead of
//! failing. These errors are only raised at construction time or when a
//! setter is given an out-of-range value.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum JointError {
    #[error("required argument `{field}` was not supplied")]
    ArgumentNull { field: &'static str },

    #[error("pair joint requires two distinct bodies, got the same handle twice")]
    SameBody,

    #[error("at least one body is required but an empty collection was given")]
    EmptyCollection,

    #[error("`{field}` = {value} is out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("body index {index} is out of bounds (have {len} bodies)")]
    InvalidIndex { index: usize, len: usize },

    #[error("invalid joint configuration: {reason}")]
    InvalidState { reason: &'static str },
}
