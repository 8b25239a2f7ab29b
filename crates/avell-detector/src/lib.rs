//! Patient event detection.
//!
//! Observes the live book against the active quote snapshot and raises
//! top-N-exit, queue-ahead, drift, and TTL events with jitter and a
//! minimum-interval gate.

pub mod detector;
pub mod error;
pub mod events;

pub use detector::{improved_price, LevelImprovementConfig, PatientConfig, PatientDetector};
pub use error::{DetectorError, DetectorResult};
pub use events::{EventPriority, PatientEvent};
