use std::sync::Arc;

use aegis_core::{storage::RecordBackend, Collection, Result, SecurityEvent, SecurityEventType};
use aegis_storage::{envelope, KeyHandle};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// How many audit events to keep; the oldest are pruned past the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditRetention {
    pub max_events: Option<usize>,
}

impl Default for AuditRetention {
    fn default() -> Self {
        Self {
            max_events: Some(10_000),
        }
    }
}

impl AuditRetention {
    /// Events tolerated past the cap before a prune pass runs.
    fn slack(max: usize) -> usize {
        (max / 10).max(1)
    }
}

/// Position of the next append. Loaded from the backend on first use.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    next_seq: u64,
    stored: usize,
}

/// Append-only security log in the `security_audit` collection, sealed with
/// the device key so it can be written before any user key exists.
///
/// Events are stored under zero-padded sequence numbers, so id order is
/// append order even when two events share a millisecond.
pub struct AuditLog {
    backend: Arc<dyn RecordBackend>,
    key: KeyHandle,
    retention: AuditRetention,
    cursor: Mutex<Option<Cursor>>,
}

impl AuditLog {
    pub fn new(backend: Arc<dyn RecordBackend>, key: KeyHandle, retention: AuditRetention) -> Self {
        Self {
            backend,
            key,
            retention,
            cursor: Mutex::new(None),
        }
    }

    pub(crate) fn key(&self) -> &KeyHandle {
        &self.key
    }

    #[instrument(skip_all, fields(event = ?event.event_type))]
    pub async fn record(&self, event: SecurityEvent) -> Result<()> {
        let mut guard = self.cursor.lock().await;
        let mut cursor = match *guard {
            Some(cursor) => cursor,
            None => self.load_cursor().await?,
        };

        let sealed = envelope::seal(&sequence_id(cursor.next_seq), &event, &self.key)?;
        self.backend.put(Collection::SecurityAudit, sealed).await?;
        cursor.next_seq += 1;
        cursor.stored += 1;
        *guard = Some(cursor);

        if let Some(stored) = self.prune(cursor.stored).await? {
            cursor.stored = stored;
            *guard = Some(cursor);
        }
        Ok(())
    }

    pub async fn emit(&self, event_type: SecurityEventType, details: Value) -> Result<()> {
        self.record(SecurityEvent::new(event_type, details)).await
    }

    /// For failure paths: the original error matters more than a failed audit write.
    pub async fn emit_quietly(&self, event_type: SecurityEventType, details: Value) {
        if let Err(err) = self.emit(event_type, details).await {
            warn!(?event_type, %err, "failed to record security event");
        }
    }

    /// All retained events, oldest first.
    pub async fn events(&self) -> Result<Vec<SecurityEvent>> {
        let mut events = Vec::new();
        // Backends list in id order, which is append order.
        for sealed in self.backend.list(Collection::SecurityAudit).await? {
            let entry =
                envelope::open_as::<SecurityEvent>(Collection::SecurityAudit, &sealed, &self.key)?;
            events.push(entry.record);
        }
        Ok(events)
    }

    async fn load_cursor(&self) -> Result<Cursor> {
        let ids = self.backend.ids(Collection::SecurityAudit).await?;
        let next_seq = ids
            .iter()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map_or(0, |last| last + 1);
        debug!(stored = ids.len(), next_seq, "audit cursor loaded");
        Ok(Cursor {
            next_seq,
            stored: ids.len(),
        })
    }

    /// Drop the oldest events once the log is a batch past the cap. Returns
    /// the new event count when anything was pruned.
    async fn prune(&self, stored: usize) -> Result<Option<usize>> {
        let Some(max) = self.retention.max_events else {
            return Ok(None);
        };
        if stored <= max + AuditRetention::slack(max) {
            return Ok(None);
        }

        let ids = self.backend.ids(Collection::SecurityAudit).await?;
        let excess = ids.len().saturating_sub(max);
        for id in ids.iter().take(excess) {
            self.backend.delete(Collection::SecurityAudit, id).await?;
        }
        debug!(pruned = excess, "audit log pruned");
        Ok(Some(ids.len() - excess))
    }
}

fn sequence_id(seq: u64) -> String {
    format!("{seq:020}")
}

#[cfg(test)]
mod tests {
    use aegis_core::storage::InMemoryBackend;
    use aegis_storage::{generate_ephemeral_key, key_provider::InMemoryKeyProvider, KeyProvider};
    use serde_json::json;

    use super::*;

    async fn audit_log(retention: AuditRetention) -> (Arc<InMemoryBackend>, AuditLog) {
        let backend = Arc::new(InMemoryBackend::new());
        backend
            .create_collection(Collection::SecurityAudit)
            .await
            .expect("create");
        let log = AuditLog::new(
            backend.clone(),
            generate_ephemeral_key().expect("key"),
            retention,
        );
        (backend, log)
    }

    #[tokio::test]
    async fn events_are_sealed_and_listed_in_order() {
        let (backend, log) = audit_log(AuditRetention::default()).await;
        log.emit(SecurityEventType::LoginFailed, json!({ "failureCount": 1 }))
            .await
            .expect("emit");
        log.emit(SecurityEventType::LoginSuccess, json!({}))
            .await
            .expect("emit");

        let events = log.events().await.expect("events");
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![SecurityEventType::LoginFailed, SecurityEventType::LoginSuccess]
        );

        let raw = backend.list(Collection::SecurityAudit).await.expect("list");
        assert!(raw.iter().all(|e| !e.data.contains("failureCount")));
    }

    #[tokio::test]
    async fn retention_prunes_oldest_events() {
        let (backend, log) = audit_log(AuditRetention {
            max_events: Some(2),
        })
        .await;
        for i in 0..4 {
            log.record(SecurityEvent::at(
                SecurityEventType::DataAccess,
                json!({ "n": i }),
                chrono::Utc::now(),
            ))
            .await
            .expect("record");
        }

        assert_eq!(
            backend.count(Collection::SecurityAudit).await.expect("count"),
            2
        );
        let kept: Vec<i64> = log
            .events()
            .await
            .expect("events")
            .iter()
            .filter_map(|e| e.details["n"].as_i64())
            .collect();
        assert_eq!(kept, vec![2, 3]);
    }

    #[tokio::test]
    async fn events_sharing_a_timestamp_keep_append_order() {
        let (backend, log) = audit_log(AuditRetention::default()).await;
        let at = chrono::Utc::now();
        for i in 0..20 {
            log.record(SecurityEvent::at(
                SecurityEventType::DataAccess,
                json!({ "n": i }),
                at,
            ))
            .await
            .expect("record");
        }

        let order: Vec<i64> = log
            .events()
            .await
            .expect("events")
            .iter()
            .filter_map(|e| e.details["n"].as_i64())
            .collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
        let ids = backend.ids(Collection::SecurityAudit).await.expect("ids");
        assert_eq!(ids.first().map(String::as_str), Some("00000000000000000000"));
    }

    #[tokio::test]
    async fn reopened_log_continues_the_sequence() {
        let (backend, _) = audit_log(AuditRetention::default()).await;
        let device = InMemoryKeyProvider::default();
        let log = AuditLog::new(
            backend.clone(),
            device.get_or_create().await.expect("key"),
            AuditRetention::default(),
        );
        log.emit(SecurityEventType::LoginFailed, json!({}))
            .await
            .expect("emit");
        drop(log);

        let reopened = AuditLog::new(
            backend.clone(),
            device.get_or_create().await.expect("key"),
            AuditRetention::default(),
        );
        reopened
            .emit(SecurityEventType::LoginSuccess, json!({}))
            .await
            .expect("emit");

        let types: Vec<_> = reopened
            .events()
            .await
            .expect("events")
            .iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![SecurityEventType::LoginFailed, SecurityEventType::LoginSuccess]
        );
    }

    #[tokio::test]
    async fn pruning_runs_in_batches_and_stays_bounded() {
        let (backend, log) = audit_log(AuditRetention {
            max_events: Some(20),
        })
        .await;
        let mut peak = 0;
        for i in 0..100 {
            log.emit(SecurityEventType::DataWrite, json!({ "n": i }))
                .await
                .expect("emit");
            peak = peak.max(backend.count(Collection::SecurityAudit).await.expect("count"));
        }

        // cap 20 plus a slack of 2
        assert_eq!(peak, 22);
        let kept: Vec<i64> = log
            .events()
            .await
            .expect("events")
            .iter()
            .filter_map(|e| e.details["n"].as_i64())
            .collect();
        assert_eq!(kept.last(), Some(&99));
        assert!(kept.windows(2).all(|pair| pair[1] == pair[0] + 1));
        assert!(kept.len() >= 20 && kept.len() <= 22);
    }

    #[tokio::test]
    async fn unbounded_retention_keeps_everything() {
        let (backend, log) = audit_log(AuditRetention { max_events: None }).await;
        for _ in 0..5 {
            log.emit(SecurityEventType::DataWrite, json!({}))
                .await
                .expect("emit");
        }
        assert_eq!(
            backend.count(Collection::SecurityAudit).await.expect("count"),
            5
        );
    }
}
