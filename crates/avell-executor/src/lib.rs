//! Execution engine for the avell quoting ladder.
//!
//! Owns the managed orders and the active quote snapshot, drives the
//! per-order state machine, and translates engine/risk/patient signals
//! into place, cancel/replace, improve, and flatten requests.

pub mod error;
pub mod executor;
pub mod ladder;
pub mod repost;
pub mod stats;

pub use error::{ExecError, ExecResult};
pub use executor::{
    CancelReplaceMode, ExecConfig, ExecutionEngine, FillEvent, PlacementReport, TickReport,
};
pub use ladder::{build_ladder, LadderOrder};
pub use repost::{RepostQueue, RepostReason};
pub use stats::{ExecStats, ExecStatsSnapshot};
