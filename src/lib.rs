// SPDX-License-Identifier: Apache-2.0

//! Rotation-safe file tailing with multi-line record coalescing.

pub mod bounded_channel;
pub mod config;
pub mod error;
pub mod init;
pub mod input;
pub mod multiline;
pub mod persistence;
pub mod reaper;
pub mod reconciler;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod stats;
pub mod watcher;

pub use config::{MultilineConfig, TailConfig};
pub use error::{Error, Result};
pub use source::TailSource;
