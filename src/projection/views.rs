//! Read-model view types
//!
//! Plain data records per waiting queue. Each is a pure fold of queue
//! events; rebuilding from the log reproduces them exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rolling history retention per queue.
pub const HISTORY_CAP: usize = 100;

/// Waiting-room counters for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorView {
    pub total_patients_waiting: u64,
    pub high_priority_count: u64,
    pub normal_priority_count: u64,
    pub low_priority_count: u64,
}

impl MonitorView {
    pub(crate) fn increment(&mut self, priority: &str) {
        self.total_patients_waiting += 1;
        match priority {
            "high" => self.high_priority_count += 1,
            "normal" => self.normal_priority_count += 1,
            "low" => self.low_priority_count += 1,
            _ => {}
        }
    }

    /// Decrements saturate: a decrement for a patient the view never
    /// counted (out-of-order delivery) must not underflow.
    pub(crate) fn decrement(&mut self, priority: &str) {
        self.total_patients_waiting = self.total_patients_waiting.saturating_sub(1);
        match priority {
            "high" => self.high_priority_count = self.high_priority_count.saturating_sub(1),
            "normal" => self.normal_priority_count = self.normal_priority_count.saturating_sub(1),
            "low" => self.low_priority_count = self.low_priority_count.saturating_sub(1),
            _ => {}
        }
    }
}

/// One waiting patient in the queue view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingPatient {
    pub patient_id: Uuid,
    pub patient_name: String,
    /// Normalized priority bucket.
    pub priority: String,
    pub checked_in_at: DateTime<Utc>,
}

impl WaitingPatient {
    /// Sort rank: high before normal before low, unknown buckets last.
    pub(crate) fn priority_rank(&self) -> u8 {
        match self.priority.as_str() {
            "high" => 0,
            "normal" => 1,
            "low" => 2,
            _ => 3,
        }
    }
}

/// The patient currently being called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextTurnView {
    pub patient_id: Uuid,
    pub station: String,
    pub called_at: DateTime<Utc>,
}

/// One line of the bounded activity history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event_id: Uuid,
    pub event_name: String,
    pub patient_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_counts_by_bucket() {
        let mut monitor = MonitorView::default();
        monitor.increment("high");
        monitor.increment("normal");
        monitor.increment("high");
        monitor.increment("critical");

        assert_eq!(monitor.total_patients_waiting, 4);
        assert_eq!(monitor.high_priority_count, 2);
        assert_eq!(monitor.normal_priority_count, 1);
        assert_eq!(monitor.low_priority_count, 0);
    }

    #[test]
    fn test_monitor_decrement_saturates() {
        let mut monitor = MonitorView::default();
        monitor.decrement("high");
        assert_eq!(monitor.total_patients_waiting, 0);
        assert_eq!(monitor.high_priority_count, 0);

        monitor.increment("low");
        monitor.decrement("low");
        monitor.decrement("low");
        assert_eq!(monitor.low_priority_count, 0);
    }

    #[test]
    fn test_priority_rank_ordering() {
        let patient = |priority: &str| WaitingPatient {
            patient_id: Uuid::new_v4(),
            patient_name: "P".to_string(),
            priority: priority.to_string(),
            checked_in_at: Utc::now(),
        };

        assert!(patient("high").priority_rank() < patient("normal").priority_rank());
        assert!(patient("normal").priority_rank() < patient("low").priority_rank());
        assert!(patient("low").priority_rank() < patient("critical").priority_rank());
    }
}
