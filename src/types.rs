//! NewType wrappers for strong typing throughout the executor.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a job name where a job ID is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ExecutorError, Result};

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Identifier of a submitted job: 32 lowercase hex characters.
    ///
    /// Generated once per job description, unless the configuration pins it
    /// through `pipeline.fixed-job-id`.
    JobId
);

newtype_string!(
    /// Human-readable job name shown by the cluster.
    JobName
);

newtype_string!(
    /// Value of `execution.target`, used to pick a cluster backend
    /// (e.g., "remote").
    ExecutionTarget
);

impl JobId {
    /// Generate a fresh random job id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Parse a job id, accepting upper or lower case hex.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.len() != 32 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ExecutorError::precondition(format!(
                "`{}` is not a valid job id (expected 32 hex characters)",
                value
            )));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}
