// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use thiserror::Error;

/// An error returned by a call into the storage array.
#[derive(Debug, Error)]
pub enum ArrayError {
    /// The array could not be reached, or did not answer within the configured timeout.
    #[error("storage backend unavailable: {0}")]
    Transport(String),

    /// The array understood the request and refused it.
    #[error("array rejected {operation}: code {code}, {description}")]
    Business {
        operation: &'static str,
        code: i64,
        description: String,
        /// The raw JSON body of the rejected call.
        payload: serde_json::Value,
    },

    /// The array's response did not have the shape the client expected.
    #[error("could not decode array response to {operation}: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    /// The session token was refused even after logging in again.
    #[error("array refused credentials for {0}")]
    Unauthorized(&'static str),
}

impl ArrayError {
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    pub fn business(operation: &'static str, code: i64, description: impl Into<String>) -> Self {
        Self::Business {
            operation,
            code,
            description: description.into(),
            payload: serde_json::Value::Null,
        }
    }

    /// The array result code, if this is a business error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Business { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this is one of the given business codes, i.e. the object is already in the state
    /// the caller was trying to reach.
    pub fn is_idempotent_conflict(&self, codes: &[i64]) -> bool {
        self.code().is_some_and(|code| codes.contains(&code))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Array(#[from] ArrayError),

    /// Input (QoS keys, schedule fields, connector) that can never succeed.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("volume {volume} is mapped to several hosts ({}), a connector host is required", hosts.join(", "))]
    AmbiguousHost { volume: String, hosts: Vec<String> },

    #[error("no usable iSCSI target portal: {0}")]
    NoTargetPortal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
