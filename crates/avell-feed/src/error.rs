//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Empty {0} side")]
    EmptySide(&'static str),

    #[error("Crossed book: bid {bid} >= ask {ask}")]
    CrossedBook { bid: String, ask: String },

    #[error("Sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },

    #[error("Invalid book: {0}")]
    InvalidBook(String),
}

pub type FeedResult<T> = Result<T, FeedError>;
