//! Recency filters for the ingestion path.
//!
//! Three independent layers, none sufficient alone: a bounded set of
//! recently seen notification keys (catches transport redeliveries), a
//! semantic fingerprint throttle (suppresses row-update churn), and the
//! `updated_at` staleness guard applied by the reconciler itself.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::api::models::{ProcessEvent, ProcessStateRow, StateSnapshot};

/// How many notification keys to remember.
pub const RECENT_KEY_CAP: usize = 100;

/// How much of the serialized payload participates in the key.
pub const PAYLOAD_PREFIX_LEN: usize = 100;

/// Window within which an identical snapshot fingerprint is discarded.
pub const FINGERPRINT_THROTTLE: Duration = Duration::from_millis(500);

/// Identity key for a discrete event: type, id (or sequence when the id
/// is blank), and a payload prefix to split synthesized ids apart.
pub fn event_key(event: &ProcessEvent) -> String {
    let identity = if event.id.is_empty() {
        event.event_sequence.unwrap_or(0).to_string()
    } else {
        event.id.clone()
    };
    format!(
        "{}:{}:{}",
        event.event_type,
        identity,
        payload_prefix(&event.event_data)
    )
}

/// Identity key for a full-row sync. Rows have no per-delivery id, so the
/// row id plus its write timestamp stand in for one.
pub fn row_key(row: &ProcessStateRow) -> String {
    let stamp = row
        .state
        .updated_at
        .map(|t| t.timestamp_millis())
        .unwrap_or(0);
    let serialized = serde_json::to_string(&row.state).unwrap_or_default();
    format!(
        "process_state_updated:{}:{}:{}",
        row.id,
        stamp,
        truncate_chars(&serialized, PAYLOAD_PREFIX_LEN)
    )
}

fn payload_prefix(data: &Value) -> String {
    truncate_chars(&data.to_string(), PAYLOAD_PREFIX_LEN)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Bounded FIFO set of recently seen keys.
#[derive(Debug)]
pub struct RecentKeys {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl RecentKeys {
    pub fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(cap),
            order: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Record a key. Returns `false` when the key was already present,
    /// meaning the notification is a redelivery.
    pub fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for RecentKeys {
    fn default() -> Self {
        Self::new(RECENT_KEY_CAP)
    }
}

/// Semantic identity of a state snapshot: a row update carrying the same
/// fingerprint as the last one applied is display-equivalent churn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    backend_step: Option<String>,
    status: Option<String>,
    waiting: bool,
    input_type: Option<String>,
}

impl Fingerprint {
    pub fn of(snapshot: &StateSnapshot) -> Self {
        Self {
            backend_step: snapshot.backend_step().map(ToString::to_string),
            status: snapshot.status.as_ref().map(|s| s.as_str().to_string()),
            waiting: snapshot.is_waiting(),
            input_type: snapshot.effective_input_type().map(ToString::to_string),
        }
    }
}

/// Discards snapshots whose fingerprint matches the last processed one
/// within [`FINGERPRINT_THROTTLE`]. A genuinely new state always passes
/// because its fingerprint differs.
#[derive(Debug)]
pub struct FingerprintThrottle {
    last: Option<(Fingerprint, Instant)>,
    window: Duration,
}

impl FingerprintThrottle {
    pub fn new(window: Duration) -> Self {
        Self { last: None, window }
    }

    pub fn is_redundant(&mut self, fingerprint: &Fingerprint) -> bool {
        if let Some((last, at)) = &self.last {
            if last == fingerprint && at.elapsed() < self.window {
                return true;
            }
        }
        self.last = Some((fingerprint.clone(), Instant::now()));
        false
    }
}

impl Default for FingerprintThrottle {
    fn default() -> Self {
        Self::new(FINGERPRINT_THROTTLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &str, event_type: &str, data: Value) -> ProcessEvent {
        ProcessEvent {
            id: id.to_string(),
            process_id: "p1".to_string(),
            event_type: event_type.to_string(),
            event_data: data,
            event_sequence: Some(7),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn recent_keys_flags_redelivery() {
        let mut recent = RecentKeys::new(10);
        assert!(recent.insert("a".to_string()));
        assert!(!recent.insert("a".to_string()));
        assert!(recent.insert("b".to_string()));
    }

    #[test]
    fn recent_keys_evicts_oldest_at_cap() {
        let mut recent = RecentKeys::new(3);
        for key in ["a", "b", "c"] {
            assert!(recent.insert(key.to_string()));
        }
        assert!(recent.insert("d".to_string()));
        assert_eq!(recent.len(), 3);
        // "a" was evicted, so it reads as new again.
        assert!(recent.insert("a".to_string()));
        assert!(!recent.insert("c".to_string()));
    }

    #[test]
    fn event_key_uses_sequence_when_id_is_blank() {
        let with_id = event("e1", "step_completed", json!({"step": "editing"}));
        let blank = event("", "step_completed", json!({"step": "editing"}));
        assert!(event_key(&with_id).contains("e1"));
        assert!(event_key(&blank).contains(":7:"));
        assert_ne!(event_key(&with_id), event_key(&blank));
    }

    #[test]
    fn event_key_distinguishes_payloads_under_same_id() {
        let a = event("e1", "section_completed", json!({"index": 1}));
        let b = event("e1", "section_completed", json!({"index": 2}));
        assert_ne!(event_key(&a), event_key(&b));
    }

    #[test]
    fn fingerprint_tracks_semantic_fields_only() {
        let a: StateSnapshot = serde_json::from_value(json!({
            "status": "running",
            "current_step": "researching",
            "updated_at": "2026-08-01T10:00:00Z",
        }))
        .unwrap();
        let b: StateSnapshot = serde_json::from_value(json!({
            "status": "running",
            "current_step": "researching",
            "updated_at": "2026-08-01T10:00:03Z",
        }))
        .unwrap();
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn throttle_suppresses_identical_fingerprint_within_window() {
        let snapshot: StateSnapshot = serde_json::from_value(json!({
            "status": "running",
            "current_step": "researching",
        }))
        .unwrap();
        let mut throttle = FingerprintThrottle::new(Duration::from_millis(500));
        let fp = Fingerprint::of(&snapshot);
        assert!(!throttle.is_redundant(&fp));
        assert!(throttle.is_redundant(&fp));
    }

    #[test]
    fn throttle_passes_changed_fingerprint_immediately() {
        let running: StateSnapshot =
            serde_json::from_value(json!({"status": "running"})).unwrap();
        let waiting: StateSnapshot =
            serde_json::from_value(json!({"status": "user_input_required"})).unwrap();
        let mut throttle = FingerprintThrottle::default();
        assert!(!throttle.is_redundant(&Fingerprint::of(&running)));
        assert!(!throttle.is_redundant(&Fingerprint::of(&waiting)));
    }

    #[test]
    fn throttle_passes_identical_fingerprint_after_window() {
        let snapshot: StateSnapshot =
            serde_json::from_value(json!({"status": "running"})).unwrap();
        let mut throttle = FingerprintThrottle::new(Duration::from_millis(1));
        let fp = Fingerprint::of(&snapshot);
        assert!(!throttle.is_redundant(&fp));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!throttle.is_redundant(&fp));
    }
}
