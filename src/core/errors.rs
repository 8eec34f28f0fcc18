// src/core/errors.rs

//! Defines the primary error type for the coordinator.

use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// The main error enum, representing all failures the coordinator can report.
/// The `Display` text of each variant is what operators see in the
/// `{"Balancer error": ...}` envelope, so the wording is part of the API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MastermindError {
    #[error("{0}")]
    NotFound(String),

    /// A refused operation; the model is left untouched.
    #[error("{0}")]
    Precondition(String),

    /// Couple members disagree on metadata or namespaces; the affected
    /// group/couple is moved to `BAD` and must be repaired by an operator.
    #[error("{0}")]
    Consistency(String),

    #[error("unable to parse meta: {0}")]
    MetaParse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MastermindError {
    /// Shorthand for a not-found error with a formatted message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        MastermindError::NotFound(msg.into())
    }

    /// Shorthand for a refused precondition with a formatted message.
    pub fn precondition(msg: impl Into<String>) -> Self {
        MastermindError::Precondition(msg.into())
    }
}

impl From<std::io::Error> for MastermindError {
    fn from(e: std::io::Error) -> Self {
        MastermindError::Io(e.to_string())
    }
}

impl From<ParseIntError> for MastermindError {
    fn from(e: ParseIntError) -> Self {
        MastermindError::Internal(format!("not an integer: {e}"))
    }
}

impl From<ParseFloatError> for MastermindError {
    fn from(e: ParseFloatError) -> Self {
        MastermindError::Internal(format!("not a float: {e}"))
    }
}

impl From<rmp_serde::encode::Error> for MastermindError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        MastermindError::Internal(format!("msgpack encode error: {e}"))
    }
}

impl From<rmp_serde::decode::Error> for MastermindError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        MastermindError::MetaParse(e.to_string())
    }
}
