// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Failed to resolve identity of {path:?}: {source}")]
    Identity {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sink delivery failed: {0}")]
    Sink(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Task error: {0}")]
    Task(String),
}

impl Error {
    /// Whether this error must stop the whole source rather than a single file's processing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Sink(_) | Error::Config(_) | Error::Regex(_) | Error::Task(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
