// SPDX-License-Identifier: Apache-2.0

mod file_id;
mod finder;
mod reader;

pub use file_id::{IdentityKey, IdentityResolver, InodeResolver};
pub use finder::{GlobFilter, PathFilter};
pub use reader::{LineObserver, LineTailer, TailOutcome, count_lines};

#[cfg(test)]
pub(crate) use file_id::testing::FakeResolver;
