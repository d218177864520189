//! Target registry: the set of monitored targets.
//!
//! Validates drafts, persists every mutation synchronously, and drives the
//! scheduler so its state never outlives a target.

use crate::db::{DbError, Store, TargetConfig, TargetDraft, TargetId};
use crate::scheduler::Scheduler;

use regex::Regex;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("address must not be empty")]
    EmptyAddress,
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("port must be between 1 and 65535, got {0}")]
    Port(i64),
    #[error("interval must be positive, got {0} ms")]
    Interval(i64),
    #[error("max consecutive failures must be at least 1, got {0}")]
    MaxFailures(i64),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("target {0} not found")]
    NotFound(TargetId),
    #[error("storage error: {0}")]
    Store(#[from] DbError),
}

/// Check a draft and turn it into a config with the given ID.
pub fn validate_target(id: TargetId, draft: &TargetDraft) -> Result<TargetConfig, ValidationError> {
    let address = draft.address.trim();
    if address.is_empty() {
        return Err(ValidationError::EmptyAddress);
    }
    if !is_valid_address(address) {
        return Err(ValidationError::InvalidAddress(address.to_string()));
    }

    let port = u16::try_from(draft.port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ValidationError::Port(draft.port))?;

    let interval_ms = u64::try_from(draft.interval_ms)
        .ok()
        .filter(|i| *i > 0)
        .ok_or(ValidationError::Interval(draft.interval_ms))?;

    let max_consecutive_failures = u32::try_from(draft.max_consecutive_failures)
        .ok()
        .filter(|m| *m >= 1)
        .ok_or(ValidationError::MaxFailures(draft.max_consecutive_failures))?;

    Ok(TargetConfig {
        id,
        name: draft.name.trim().to_string(),
        address: address.to_string(),
        port,
        probe_kind: draft.probe_kind,
        interval_ms,
        max_consecutive_failures,
    })
}

/// IP literal or RFC 1123 hostname.
fn is_valid_address(address: &str) -> bool {
    static HOSTNAME: OnceLock<Regex> = OnceLock::new();
    let re = HOSTNAME.get_or_init(|| {
        Regex::new(r"^(?i)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*\.?$")
            .expect("hostname regex is valid")
    });

    address.parse::<IpAddr>().is_ok() || (address.len() <= 253 && re.is_match(address))
}

/// The set of monitored targets.
pub struct Registry {
    store: Arc<Store>,
    scheduler: Arc<Scheduler>,
    targets: Mutex<BTreeMap<TargetId, TargetConfig>>,
}

impl Registry {
    /// Load persisted targets and start monitoring each of them.
    ///
    /// Stored rows that no longer validate are skipped with a warning.
    pub async fn load(store: Arc<Store>, scheduler: Arc<Scheduler>) -> Result<Self, RegistryError> {
        let stored = store.get_targets()?;
        let mut targets = BTreeMap::new();

        for row in stored {
            let checked = row
                .draft()
                .and_then(|draft| validate_target(row.id, &draft).map_err(|e| e.to_string()));
            match checked {
                Ok(valid) => {
                    targets.insert(valid.id, valid);
                }
                Err(e) => {
                    tracing::warn!("Registry: Skipping stored target {}: {}", row.id, e);
                }
            }
        }

        tracing::info!("Registry: Loaded {} targets", targets.len());
        for target in targets.values() {
            scheduler.start(target.clone()).await;
        }

        Ok(Self {
            store,
            scheduler,
            targets: Mutex::new(targets),
        })
    }

    /// Validate, persist and start monitoring a new target.
    pub async fn add(&self, draft: TargetDraft) -> Result<TargetConfig, RegistryError> {
        let mut target = validate_target(0, &draft)?;

        let mut targets = self.targets.lock().await;
        self.store.add_target(&mut target)?;
        targets.insert(target.id, target.clone());
        self.scheduler.start(target.clone()).await;

        tracing::info!("Registry: Added target {} ({})", target.id, target.name);
        Ok(target)
    }

    /// Replace a target's definition and restart its schedule.
    pub async fn update(&self, id: TargetId, draft: TargetDraft) -> Result<TargetConfig, RegistryError> {
        let target = validate_target(id, &draft)?;

        let mut targets = self.targets.lock().await;
        if !targets.contains_key(&id) {
            return Err(RegistryError::NotFound(id));
        }

        match self.store.update_target(&target) {
            Ok(()) => {}
            Err(DbError::NotFound) => return Err(RegistryError::NotFound(id)),
            Err(e) => return Err(e.into()),
        }
        targets.insert(id, target.clone());
        self.scheduler.reschedule(target.clone()).await;

        tracing::info!("Registry: Updated target {} ({})", id, target.name);
        Ok(target)
    }

    /// Delete a target and stop monitoring it. Removing an unknown ID is a
    /// no-op. If the delete fails the target stays registered and scheduled.
    pub async fn remove(&self, id: TargetId) -> Result<(), RegistryError> {
        let mut targets = self.targets.lock().await;

        self.store.delete_target(id)?;
        self.scheduler.stop(id).await;
        if targets.remove(&id).is_some() {
            tracing::info!("Registry: Removed target {}", id);
        }
        Ok(())
    }

    /// All targets ordered by ID.
    pub async fn list(&self) -> Vec<TargetConfig> {
        self.targets.lock().await.values().cloned().collect()
    }

    /// A single target by ID.
    pub async fn get(&self, id: TargetId) -> Option<TargetConfig> {
        self.targets.lock().await.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeKind;
    use crate::probe::{ProbeOutcome, ProbeRequest, Prober};
    use crate::scheduler::{FailureLog, DEFAULT_FAILURE_LOG_CAPACITY};
    use rusqlite::Connection;
    use tempfile::NamedTempFile;

    fn scheduler(store: &Arc<Store>) -> Arc<Scheduler> {
        // Probes never complete, so tests see only registry effects
        let prober: Arc<dyn Prober> =
            Arc::new(|_req: ProbeRequest| std::future::pending::<ProbeOutcome>());
        let log = Arc::new(FailureLog::new(store.clone(), DEFAULT_FAILURE_LOG_CAPACITY));
        Arc::new(Scheduler::new(prober, log))
    }

    async fn registry() -> (Registry, Arc<Scheduler>) {
        let store = Arc::new(Store::new(":memory:").unwrap());
        let scheduler = scheduler(&store);
        let registry = Registry::load(store, scheduler.clone()).await.unwrap();
        (registry, scheduler)
    }

    #[test]
    fn test_validate_target() {
        let ok = validate_target(7, &TargetDraft::new(" Web ", " example.com ", 443)).unwrap();
        assert_eq!(ok.id, 7);
        assert_eq!(ok.name, "Web");
        assert_eq!(ok.address, "example.com");
        assert_eq!(ok.port, 443);

        assert!(validate_target(1, &TargetDraft::new("", "10.0.0.1", 1)).is_ok());
        assert!(validate_target(1, &TargetDraft::new("", "::1", 65535)).is_ok());

        assert_eq!(
            validate_target(1, &TargetDraft::new("", "  ", 80)),
            Err(ValidationError::EmptyAddress)
        );
        assert_eq!(
            validate_target(1, &TargetDraft::new("", "bad host!", 80)),
            Err(ValidationError::InvalidAddress("bad host!".to_string()))
        );
        assert_eq!(
            validate_target(1, &TargetDraft::new("", "example.com", 0)),
            Err(ValidationError::Port(0))
        );
        assert_eq!(
            validate_target(1, &TargetDraft::new("", "example.com", 65536)),
            Err(ValidationError::Port(65536))
        );

        let mut draft = TargetDraft::new("", "example.com", 80);
        draft.interval_ms = 0;
        assert_eq!(validate_target(1, &draft), Err(ValidationError::Interval(0)));

        let mut draft = TargetDraft::new("", "example.com", 80);
        draft.max_consecutive_failures = 0;
        assert_eq!(validate_target(1, &draft), Err(ValidationError::MaxFailures(0)));
    }

    #[tokio::test]
    async fn test_add_assigns_fresh_ids_and_starts() {
        let (registry, scheduler) = registry().await;

        let a = registry.add(TargetDraft::new("a", "10.0.0.1", 80)).await.unwrap();
        let b = registry.add(TargetDraft::new("b", "10.0.0.2", 80)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(scheduler.is_scheduled(a.id).await);
        assert!(scheduler.is_scheduled(b.id).await);

        registry.remove(a.id).await.unwrap();
        let c = registry.add(TargetDraft::new("c", "10.0.0.3", 80)).await.unwrap();
        assert!(c.id > b.id, "ids must never be reused");

        let names: Vec<String> = registry.list().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_invalid_draft_never_reaches_scheduler() {
        let (registry, scheduler) = registry().await;

        let result = registry.add(TargetDraft::new("x", "example.com", 70000)).await;
        assert!(matches!(
            result,
            Err(RegistryError::Invalid(ValidationError::Port(70000)))
        ));
        assert!(registry.list().await.is_empty());
        assert_eq!(scheduler.scheduled_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (registry, scheduler) = registry().await;
        let t = registry.add(TargetDraft::new("a", "10.0.0.1", 80)).await.unwrap();

        tokio_test::assert_ok!(registry.remove(t.id).await);
        tokio_test::assert_ok!(registry.remove(t.id).await);
        tokio_test::assert_ok!(registry.remove(12345).await);

        assert!(registry.get(t.id).await.is_none());
        assert!(!scheduler.is_scheduled(t.id).await);
    }

    #[tokio::test]
    async fn test_update() {
        let (registry, scheduler) = registry().await;
        let t = registry.add(TargetDraft::new("mail", "mail.example.com", 25)).await.unwrap();

        let mut draft = TargetDraft::from(&t);
        draft.port = 587;
        draft.probe_kind = ProbeKind::MailServerCheck;
        draft.max_consecutive_failures = 1;
        let updated = registry.update(t.id, draft).await.unwrap();

        assert_eq!(updated.id, t.id);
        assert_eq!(updated.port, 587);
        assert_eq!(registry.get(t.id).await, Some(updated));
        assert!(scheduler.is_scheduled(t.id).await);
        assert_eq!(scheduler.consecutive_failures(t.id), Some(0));

        let missing = registry.update(999, TargetDraft::new("", "10.0.0.1", 80)).await;
        assert!(matches!(missing, Err(RegistryError::NotFound(999))));

        let invalid = registry.update(t.id, TargetDraft::new("", "", 80)).await;
        assert!(matches!(invalid, Err(RegistryError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_load_restores_persisted_targets() {
        let tmp = NamedTempFile::new().unwrap();

        let id = {
            let store = Arc::new(Store::new(tmp.path()).unwrap());
            let registry = Registry::load(store.clone(), scheduler(&store)).await.unwrap();
            registry.add(TargetDraft::new("kept", "10.0.0.9", 22)).await.unwrap().id
        };

        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let scheduler = scheduler(&store);
        let registry = Registry::load(store, scheduler.clone()).await.unwrap();

        let targets = registry.list().await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, id);
        assert_eq!(targets[0].name, "kept");
        assert!(scheduler.is_scheduled(id).await);
    }

    #[tokio::test]
    async fn test_load_skips_rows_that_fail_validation() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());

        let conn = Connection::open(tmp.path()).unwrap();
        conn.execute_batch(
            "INSERT INTO targets (name, address, port, probe_kind, interval_ms, max_consecutive_failures) VALUES
                ('good', '10.0.0.1', 80, 'reachability', 1000, 3),
                ('bad port', '10.0.0.2', 70000, 'reachability', 1000, 3),
                ('bad kind', '10.0.0.3', 80, 'icmp', 1000, 3),
                ('bad interval', '10.0.0.4', 80, 'reachability', 0, 3);",
        )
        .unwrap();

        let scheduler = scheduler(&store);
        let registry = tokio_test::assert_ok!(Registry::load(store, scheduler.clone()).await);

        let names: Vec<String> = registry.list().await.into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["good"]);
        assert_eq!(scheduler.scheduled_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_target_scheduled() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let scheduler = scheduler(&store);
        let registry = Registry::load(store, scheduler.clone()).await.unwrap();
        let t = registry.add(TargetDraft::new("a", "10.0.0.1", 80)).await.unwrap();

        Connection::open(tmp.path())
            .unwrap()
            .execute_batch("DROP TABLE targets;")
            .unwrap();

        let result = registry.remove(t.id).await;
        assert!(matches!(result, Err(RegistryError::Store(_))));
        assert_eq!(registry.get(t.id).await, Some(t.clone()));
        assert!(scheduler.is_scheduled(t.id).await);
    }
}
