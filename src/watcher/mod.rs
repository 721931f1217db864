// SPDX-License-Identifier: Apache-2.0

//! Directory watching.
//!
//! Turns OS file-system notifications into [`Notification`](crate::reconciler::Notification)s
//! queued for the reconciler.

mod native;

pub use native::NativeWatcher;
