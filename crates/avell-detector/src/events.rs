//! Patient event types.

use avell_core::{LevelKey, OrderSide, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Event priority. Higher drains first; ties break by arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    Low,
    Medium,
    High,
}

/// An event raised against the active quote snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatientEvent {
    /// Our price fell out of the top-N levels on its side.
    TopNExit {
        side: OrderSide,
        price: Price,
        top_n: usize,
    },
    /// Resting size ahead of our level exceeds the threshold.
    QueueAhead { key: LevelKey },
    /// Mid has drifted past the threshold since the quotes were posted.
    Drift { drift_bps: Decimal },
    /// A single level's TTL elapsed.
    LevelTtl { key: LevelKey },
    /// The whole session's TTL elapsed.
    SessionTtl,
}

impl PatientEvent {
    /// Priority class: top-N exit and drift are high, queue-ahead and
    /// session TTL medium, level TTL low.
    pub fn priority(&self) -> EventPriority {
        match self {
            Self::TopNExit { .. } | Self::Drift { .. } => EventPriority::High,
            Self::QueueAhead { .. } | Self::SessionTtl => EventPriority::Medium,
            Self::LevelTtl { .. } => EventPriority::Low,
        }
    }
}

impl std::fmt::Display for PatientEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TopNExit { side, price, top_n } => {
                write!(f, "top_n_exit({side}, {price}, n={top_n})")
            }
            Self::QueueAhead { key } => write!(f, "queue_ahead({key})"),
            Self::Drift { drift_bps } => write!(f, "drift({drift_bps}bps)"),
            Self::LevelTtl { key } => write!(f, "level_ttl({key})"),
            Self::SessionTtl => write!(f, "session_ttl"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_priority_ordering() {
        assert!(EventPriority::High > EventPriority::Medium);
        assert!(EventPriority::Medium > EventPriority::Low);
    }

    #[test]
    fn test_event_priorities() {
        let exit = PatientEvent::TopNExit {
            side: OrderSide::Buy,
            price: Price::new(dec!(100)),
            top_n: 3,
        };
        assert_eq!(exit.priority(), EventPriority::High);
        assert_eq!(
            PatientEvent::Drift {
                drift_bps: dec!(12)
            }
            .priority(),
            EventPriority::High
        );
        assert_eq!(
            PatientEvent::QueueAhead {
                key: LevelKey::new(OrderSide::Sell, 1)
            }
            .priority(),
            EventPriority::Medium
        );
        assert_eq!(PatientEvent::SessionTtl.priority(), EventPriority::Medium);
        assert_eq!(
            PatientEvent::LevelTtl {
                key: LevelKey::new(OrderSide::Buy, 0)
            }
            .priority(),
            EventPriority::Low
        );
    }
}
