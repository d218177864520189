//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable target identifier, assigned by the store on creation.
pub type TargetId = i64;

/// How a target is probed.
///
/// Both kinds are currently a plain TCP connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    #[default]
    #[serde(alias = "Ping")]
    Reachability,
    #[serde(alias = "Mail Server Check")]
    MailServerCheck,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Reachability => "reachability",
            ProbeKind::MailServerCheck => "mail_server_check",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Older clients sent the human-readable labels
        match s {
            "reachability" | "Ping" => Ok(ProbeKind::Reachability),
            "mail_server_check" | "Mail Server Check" => Ok(ProbeKind::MailServerCheck),
            other => Err(format!("unknown probe kind: {}", other)),
        }
    }
}

/// A validated monitoring target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: TargetId,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub probe_kind: ProbeKind,
    pub interval_ms: u64,
    pub max_consecutive_failures: u32,
}

impl TargetConfig {
    /// `address:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// Unvalidated target fields as submitted by a client.
///
/// Numbers are kept wide so out-of-range values reach validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetDraft {
    #[serde(default)]
    pub name: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: i64,
    #[serde(default)]
    pub probe_kind: ProbeKind,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: i64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: i64,
}

fn default_port() -> i64 {
    80
}

fn default_interval_ms() -> i64 {
    5000
}

fn default_max_consecutive_failures() -> i64 {
    3
}

#[cfg(test)]
impl TargetDraft {
    pub fn new(name: &str, address: &str, port: i64) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            port,
            probe_kind: ProbeKind::default(),
            interval_ms: default_interval_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl From<&TargetConfig> for TargetDraft {
    fn from(config: &TargetConfig) -> Self {
        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            port: config.port as i64,
            probe_kind: config.probe_kind,
            interval_ms: config.interval_ms as i64,
            max_consecutive_failures: config.max_consecutive_failures as i64,
        }
    }
}

/// A single recorded probe failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLogEntry {
    pub time: DateTime<Utc>,
    pub target_name: String,
    pub address: String,
    pub port: u16,
}

impl FailureLogEntry {
    pub fn for_target(target: &TargetConfig, time: DateTime<Utc>) -> Self {
        Self {
            time,
            target_name: target.name.clone(),
            address: target.address.clone(),
            port: target.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_parses_legacy_labels() {
        assert_eq!("Ping".parse::<ProbeKind>().unwrap(), ProbeKind::Reachability);
        assert_eq!(
            "Mail Server Check".parse::<ProbeKind>().unwrap(),
            ProbeKind::MailServerCheck
        );
        assert_eq!(
            ProbeKind::MailServerCheck.as_str().parse::<ProbeKind>().unwrap(),
            ProbeKind::MailServerCheck
        );
        assert!("icmp".parse::<ProbeKind>().is_err());

        let kind: ProbeKind = serde_json::from_str(r#""Mail Server Check""#).unwrap();
        assert_eq!(kind, ProbeKind::MailServerCheck);
    }

    #[test]
    fn test_draft_defaults() {
        let draft: TargetDraft = serde_json::from_str(r#"{"address":"example.com"}"#).unwrap();
        assert_eq!(draft.port, 80);
        assert_eq!(draft.interval_ms, 5000);
        assert_eq!(draft.max_consecutive_failures, 3);
        assert_eq!(draft.probe_kind, ProbeKind::Reachability);
        assert!(draft.name.is_empty());
    }

    #[test]
    fn test_endpoint_brackets_ipv6() {
        let mut target = TargetConfig {
            id: 1,
            name: "n".to_string(),
            address: "::1".to_string(),
            port: 25,
            probe_kind: ProbeKind::MailServerCheck,
            interval_ms: 1000,
            max_consecutive_failures: 1,
        };
        assert_eq!(target.endpoint(), "[::1]:25");
        target.address = "mail.example.com".to_string();
        assert_eq!(target.endpoint(), "mail.example.com:25");
    }
}
