// SPDX-License-Identifier: Apache-2.0

//! Multi-line record reassembly.
//!
//! Lines are classified as standalone records or continuations of an earlier
//! line (stack traces, wrapped messages) and continuation runs from the same
//! source file are joined into one event before delivery.

mod classifier;
mod coalescer;
mod event;

pub use classifier::{LineClassifier, LineKind};
pub use coalescer::{
    CoalescerOptions, DrainReport, MultilineCoalescer, SYNTHETIC_SOURCE_HEADER, SourceHeader,
};
pub use event::{Event, Headers, LineEvent};
