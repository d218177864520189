//! Events published by the scheduler.

use crate::db::TargetId;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of one completed probe, published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub target_id: TargetId,
    pub reachable: bool,
    pub latency_ms: i64,
    pub consecutive_failures: u32,
    pub time: DateTime<Utc>,
}

/// A target's failure streak reached its threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub target_id: TargetId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub threshold: u32,
    pub time: DateTime<Utc>,
}

impl Alert {
    pub fn message(&self) -> String {
        format!(
            "{} has failed {} times consecutively.",
            self.name, self.threshold
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Status(StatusUpdate),
    Alert(Alert),
}

/// Status sink: reachable probes at debug, failures at info.
pub fn log_status(s: &StatusUpdate) {
    if s.reachable {
        tracing::debug!("Target {} reachable in {} ms", s.target_id, s.latency_ms);
    } else {
        tracing::info!(
            "Target {} unreachable ({} consecutive)",
            s.target_id,
            s.consecutive_failures
        );
    }
}

/// Alert sink.
pub fn log_alert(a: &Alert) {
    tracing::warn!(
        target_id = a.target_id,
        address = %a.address,
        port = a.port,
        "Test failed: {}",
        a.message()
    );
}
