// SPDX-License-Identifier: Apache-2.0

//! Persistence of the file registry.
//!
//! The registry is saved as a versioned JSON snapshot written atomically, so a crash
//! mid-write leaves the previous snapshot intact.

mod json_file;
mod schema;

pub use json_file::JsonFileStore;
pub use schema::{PERSISTED_STATE_VERSION, PersistedFileEntry, PersistedState};
