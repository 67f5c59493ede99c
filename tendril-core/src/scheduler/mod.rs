//! Update Scheduling
//!
//! This module batches computation re-runs into ticks and orders them.
//! See [`queue`] for the flush algorithm and [`tick`] for how ticks are
//! driven.

pub mod queue;
pub mod tick;

pub use queue::{FlushHookId, FlushReport, Scheduler};
