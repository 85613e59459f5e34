//! SQLite-based store implementation

use chrono::{DateTime, Local};
use clawline_api::ParticipantStatus;
use clawline_util::ParticipantId;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AuditEvent, Participant, QueueStore, StoreError, StoreResult};

const PARTICIPANT_COLUMNS: &str =
    "id, display_name, credits_total, credits_used, credits_pulsed, status, ordered_at";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Participant row before status/timestamp decoding
struct ParticipantRow {
    id: String,
    display_name: String,
    credits_total: u32,
    credits_used: u32,
    credits_pulsed: bool,
    status: String,
    ordered_at: i64,
}

impl ParticipantRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            credits_total: row.get(2)?,
            credits_used: row.get(3)?,
            credits_pulsed: row.get(4)?,
            status: row.get(5)?,
            ordered_at: row.get(6)?,
        })
    }

    fn decode(self) -> StoreResult<Participant> {
        let status: ParticipantStatus = self
            .status
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("participant {}: {}", self.id, e)))?;
        let ordered_at = DateTime::from_timestamp_micros(self.ordered_at)
            .map(|dt| dt.with_timezone(&Local))
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "participant {}: bad ordered_at {}",
                    self.id, self.ordered_at
                ))
            })?;

        Ok(Participant {
            id: ParticipantId::new(self.id),
            display_name: self.display_name,
            credits_total: self.credits_total,
            credits_used: self.credits_used,
            credits_pulsed: self.credits_pulsed,
            status,
            ordered_at,
        })
    }
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Participant ledger
            CREATE TABLE IF NOT EXISTS participants (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL,
                credits_total INTEGER NOT NULL DEFAULT 0,
                credits_used INTEGER NOT NULL DEFAULT 0,
                credits_pulsed INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                ordered_at INTEGER NOT NULL,
                CHECK (credits_used >= 0 AND credits_used <= credits_total)
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_participants_queue
                ON participants(status, ordered_at, seq);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn query_participants(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> StoreResult<Vec<Participant>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, ParticipantRow::from_row)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?.decode()?);
        }
        Ok(participants)
    }

    fn ensure_exists(conn: &Connection, id: &ParticipantId) -> StoreResult<()> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT seq FROM participants WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match found {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(format!("participant {}", id))),
        }
    }
}

impl QueueStore for SqliteStore {
    fn register_participant(
        &self,
        id: &ParticipantId,
        display_name: &str,
        at: DateTime<Local>,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;

        let inserted = conn.execute(
            r#"
            INSERT INTO participants (id, display_name, status, ordered_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                id.as_str(),
                display_name,
                ParticipantStatus::Created.as_str(),
                at.timestamp_micros()
            ],
        )?;

        debug!(participant_id = %id, inserted = inserted > 0, "Participant registered");
        Ok(inserted > 0)
    }

    fn confirm_payment(
        &self,
        id: &ParticipantId,
        display_name: Option<&str>,
        credits: u32,
        at: DateTime<Local>,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;

        // Only a `created` row may be promoted; anything later is a duplicate.
        let changed = conn.execute(
            r#"
            INSERT INTO participants
                (id, display_name, credits_total, credits_used, status, ordered_at)
            VALUES (?1, COALESCE(?2, ?1), ?3, 0, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                display_name = COALESCE(?2, participants.display_name),
                credits_total = excluded.credits_total,
                credits_used = 0,
                status = excluded.status,
                ordered_at = excluded.ordered_at
            WHERE participants.status = ?6
            "#,
            params![
                id.as_str(),
                display_name,
                credits,
                ParticipantStatus::Waiting.as_str(),
                at.timestamp_micros(),
                ParticipantStatus::Created.as_str(),
            ],
        )?;

        debug!(participant_id = %id, credits, newly_confirmed = changed > 0, "Payment recorded");
        Ok(changed > 0)
    }

    fn get_participant(&self, id: &ParticipantId) -> StoreResult<Option<Participant>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM participants WHERE id = ?", PARTICIPANT_COLUMNS),
                [id.as_str()],
                ParticipantRow::from_row,
            )
            .optional()?;

        row.map(ParticipantRow::decode).transpose()
    }

    fn list_queue(&self) -> StoreResult<Vec<Participant>> {
        let conn = self.conn()?;
        Self::query_participants(
            &conn,
            &format!(
                "SELECT {} FROM participants WHERE status IN (?1, ?2) ORDER BY ordered_at, seq",
                PARTICIPANT_COLUMNS
            ),
            params![
                ParticipantStatus::Waiting.as_str(),
                ParticipantStatus::Active.as_str()
            ],
        )
    }

    fn list_by_status(&self, status: ParticipantStatus) -> StoreResult<Vec<Participant>> {
        let conn = self.conn()?;
        Self::query_participants(
            &conn,
            &format!(
                "SELECT {} FROM participants WHERE status = ? ORDER BY ordered_at, seq",
                PARTICIPANT_COLUMNS
            ),
            [status.as_str()],
        )
    }

    fn set_status(&self, id: &ParticipantId, status: ParticipantStatus) -> StoreResult<()> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE participants SET status = ? WHERE id = ?",
            params![status.as_str(), id.as_str()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("participant {}", id)));
        }

        debug!(participant_id = %id, status = %status, "Status set");
        Ok(())
    }

    fn increment_used(&self, id: &ParticipantId, by: u32) -> StoreResult<u32> {
        let conn = self.conn()?;

        let changed = conn.execute(
            r#"
            UPDATE participants
            SET credits_used = MIN(credits_total, credits_used + ?2)
            WHERE id = ?1
            "#,
            params![id.as_str(), by],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("participant {}", id)));
        }

        let used: u32 = conn.query_row(
            "SELECT credits_used FROM participants WHERE id = ?",
            [id.as_str()],
            |row| row.get(0),
        )?;

        debug!(participant_id = %id, credits_used = used, "Credits used incremented");
        Ok(used)
    }

    fn mark_pulsed(&self, id: &ParticipantId) -> StoreResult<bool> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE participants SET credits_pulsed = 1 WHERE id = ? AND credits_pulsed = 0",
            [id.as_str()],
        )?;
        if changed == 0 {
            Self::ensure_exists(&conn, id)?;
        }

        Ok(changed > 0)
    }

    fn requeue_to_end(&self, id: &ParticipantId, at: DateTime<Local>) -> StoreResult<()> {
        let conn = self.conn()?;

        // Strictly after every existing position, even if the clock lags.
        let changed = conn.execute(
            r#"
            UPDATE participants
            SET status = ?1,
                ordered_at = MAX(?2, (SELECT COALESCE(MAX(ordered_at), 0) + 1 FROM participants))
            WHERE id = ?3
            "#,
            params![
                ParticipantStatus::Waiting.as_str(),
                at.timestamp_micros(),
                id.as_str()
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("participant {}", id)));
        }

        debug!(participant_id = %id, "Participant requeued to end");
        Ok(())
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| clawline_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Local> {
        Local.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
        assert!(store.list_queue().unwrap().is_empty());
    }

    #[test]
    fn test_confirm_payment_inserts_waiting() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.confirm_payment(&pid("a"), Some("Ada"), 3, at(0)).unwrap());

        let p = store.get_participant(&pid("a")).unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Waiting);
        assert_eq!(p.display_name, "Ada");
        assert_eq!(p.credits_total, 3);
        assert_eq!(p.credits_used, 0);
        assert!(!p.credits_pulsed);
        assert_eq!(p.ordered_at, at(0));
    }

    #[test]
    fn test_confirm_payment_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.confirm_payment(&pid("a"), None, 3, at(0)).unwrap());
        store.increment_used(&pid("a"), 1).unwrap();

        // A replayed webhook must not reset balances or queue position
        assert!(!store.confirm_payment(&pid("a"), None, 5, at(10)).unwrap());

        let p = store.get_participant(&pid("a")).unwrap().unwrap();
        assert_eq!(p.credits_total, 3);
        assert_eq!(p.credits_used, 1);
        assert_eq!(p.ordered_at, at(0));
        assert_eq!(p.display_name, "a");
    }

    #[test]
    fn test_registered_participant_promoted_on_payment() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.register_participant(&pid("a"), "Ada", at(0)).unwrap());
        assert!(!store.register_participant(&pid("a"), "Ada", at(1)).unwrap());
        assert_eq!(
            store.get_participant(&pid("a")).unwrap().unwrap().status,
            ParticipantStatus::Created
        );
        assert!(store.list_queue().unwrap().is_empty());

        assert!(store.confirm_payment(&pid("a"), None, 2, at(5)).unwrap());
        let p = store.get_participant(&pid("a")).unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Waiting);
        assert_eq!(p.display_name, "Ada");
        assert_eq!(p.credits_total, 2);
    }

    #[test]
    fn test_queue_order_and_requeue() {
        let store = SqliteStore::in_memory().unwrap();
        store.confirm_payment(&pid("a"), None, 1, at(0)).unwrap();
        store.confirm_payment(&pid("b"), None, 1, at(1)).unwrap();
        store.confirm_payment(&pid("c"), None, 1, at(2)).unwrap();

        let ids: Vec<_> = store.list_queue().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![pid("a"), pid("b"), pid("c")]);

        // A clock earlier than the tail still lands at the back
        store.requeue_to_end(&pid("a"), at(1)).unwrap();
        let ids: Vec<_> = store.list_queue().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![pid("b"), pid("c"), pid("a")]);
    }

    #[test]
    fn test_requeue_preserves_balances() {
        let store = SqliteStore::in_memory().unwrap();
        store.confirm_payment(&pid("a"), None, 4, at(0)).unwrap();
        store.set_status(&pid("a"), ParticipantStatus::Active).unwrap();
        store.increment_used(&pid("a"), 2).unwrap();
        store.mark_pulsed(&pid("a")).unwrap();

        store.requeue_to_end(&pid("a"), at(30)).unwrap();

        let p = store.get_participant(&pid("a")).unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Waiting);
        assert_eq!(p.credits_used, 2);
        assert_eq!(p.credits_total, 4);
        assert!(p.credits_pulsed);
    }

    #[test]
    fn test_increment_used_is_clamped() {
        let store = SqliteStore::in_memory().unwrap();
        store.confirm_payment(&pid("a"), None, 2, at(0)).unwrap();

        assert_eq!(store.increment_used(&pid("a"), 1).unwrap(), 1);
        assert_eq!(store.increment_used(&pid("a"), 1).unwrap(), 2);
        assert_eq!(store.increment_used(&pid("a"), 1).unwrap(), 2);
        assert_eq!(store.increment_used(&pid("a"), 10).unwrap(), 2);

        let p = store.get_participant(&pid("a")).unwrap().unwrap();
        assert_eq!(p.credits_remaining(), 0);
    }

    #[test]
    fn test_mark_pulsed_only_once() {
        let store = SqliteStore::in_memory().unwrap();
        store.confirm_payment(&pid("a"), None, 2, at(0)).unwrap();

        assert!(store.mark_pulsed(&pid("a")).unwrap());
        assert!(!store.mark_pulsed(&pid("a")).unwrap());
        assert!(matches!(
            store.mark_pulsed(&pid("ghost")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_participant_errors() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.get_participant(&pid("ghost")).unwrap().is_none());
        assert!(matches!(
            store.set_status(&pid("ghost"), ParticipantStatus::Done),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.increment_used(&pid("ghost"), 1),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.requeue_to_end(&pid("ghost"), at(0)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_by_status() {
        let store = SqliteStore::in_memory().unwrap();
        store.confirm_payment(&pid("a"), None, 1, at(0)).unwrap();
        store.confirm_payment(&pid("b"), None, 1, at(1)).unwrap();
        store.set_status(&pid("a"), ParticipantStatus::Done).unwrap();

        let done = store.list_by_status(ParticipantStatus::Done).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, pid("a"));

        let queue = store.list_queue().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, pid("b"));
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::PaymentConfirmed {
                participant_id: pid("a"),
                credits: 3,
            }))
            .unwrap();

        let events = store.recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::PaymentConfirmed { credits: 3, .. }
        ));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn test_reopen_persists_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clawline.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.confirm_payment(&pid("a"), Some("Ada"), 3, at(0)).unwrap();
            store.set_status(&pid("a"), ParticipantStatus::Active).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let p = store.get_participant(&pid("a")).unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Active);
        assert_eq!(p.credits_total, 3);
    }
}
