//! Boot recovery
//!
//! A restart loses the in-memory session, so whoever was `active` in the
//! ledger is put back in line before the scheduler runs, and anyone left
//! waiting with nothing to play is retired.

use clawline_api::ParticipantStatus;
use clawline_store::{AuditEvent, AuditEventType, QueueStore, StoreResult};
use clawline_util::ParticipantId;
use tracing::{info, warn};

/// Proof that [`recover`] ran. Required to build a [`crate::Scheduler`].
#[derive(Debug)]
pub struct Recovered {
    _private: (),
}

/// What recovery changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Previously `active`, now `waiting`
    pub demoted: Vec<ParticipantId>,
    /// `waiting` with no credits left, now `done`
    pub swept: Vec<ParticipantId>,
}

/// Reconcile persisted state left by a previous process
pub fn recover(store: &dyn QueueStore) -> StoreResult<(Recovered, RecoveryReport)> {
    let mut report = RecoveryReport::default();

    for participant in store.list_by_status(ParticipantStatus::Active)? {
        store.set_status(&participant.id, ParticipantStatus::Waiting)?;
        info!(participant_id = %participant.id, "Demoted stale active participant");
        report.demoted.push(participant.id);
    }

    for participant in store.list_by_status(ParticipantStatus::Waiting)? {
        if participant.credits_remaining() == 0 {
            store.set_status(&participant.id, ParticipantStatus::Done)?;
            info!(participant_id = %participant.id, "Swept participant with no credits");
            report.swept.push(participant.id);
        }
    }

    if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::RecoveryCompleted {
        demoted: report.demoted.clone(),
        swept: report.swept.clone(),
    })) {
        warn!(error = %e, "Failed to audit recovery");
    }

    info!(
        demoted = report.demoted.len(),
        swept = report.swept.len(),
        "Boot recovery complete"
    );

    Ok((Recovered { _private: () }, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawline_store::SqliteStore;
    use clawline_util::now;

    fn store() -> SqliteStore {
        SqliteStore::in_memory().unwrap()
    }

    #[test]
    fn demotes_active_and_sweeps_empty() {
        let store = store();
        let a = ParticipantId::new("a");
        let b = ParticipantId::new("b");
        let c = ParticipantId::new("c");

        store.confirm_payment(&a, Some("A"), 2, now()).unwrap();
        store.confirm_payment(&b, Some("B"), 1, now()).unwrap();
        store.confirm_payment(&c, Some("C"), 3, now()).unwrap();
        store.set_status(&a, ParticipantStatus::Active).unwrap();
        store.increment_used(&b, 1).unwrap();

        let (_token, report) = recover(&store).unwrap();

        assert_eq!(report.demoted, vec![a.clone()]);
        assert_eq!(report.swept, vec![b.clone()]);
        assert_eq!(
            store.get_participant(&a).unwrap().unwrap().status,
            ParticipantStatus::Waiting
        );
        assert_eq!(
            store.get_participant(&b).unwrap().unwrap().status,
            ParticipantStatus::Done
        );
        assert_eq!(
            store.get_participant(&c).unwrap().unwrap().status,
            ParticipantStatus::Waiting
        );
    }

    #[test]
    fn depleted_active_is_demoted_then_swept() {
        let store = store();
        let a = ParticipantId::new("a");
        store.confirm_payment(&a, Some("A"), 1, now()).unwrap();
        store.set_status(&a, ParticipantStatus::Active).unwrap();
        store.increment_used(&a, 1).unwrap();

        let (_token, report) = recover(&store).unwrap();

        assert_eq!(report.demoted, vec![a.clone()]);
        assert_eq!(report.swept, vec![a.clone()]);
        assert!(store.list_queue().unwrap().is_empty());
    }

    #[test]
    fn recovery_is_audited() {
        let store = store();
        recover(&store).unwrap();

        let audits = store.recent_audits(1).unwrap();
        assert!(matches!(
            audits[0].event,
            AuditEventType::RecoveryCompleted { .. }
        ));
    }

    #[test]
    fn balances_survive_recovery() {
        let store = store();
        let a = ParticipantId::new("a");
        store.confirm_payment(&a, Some("A"), 3, now()).unwrap();
        store.mark_pulsed(&a).unwrap();
        store.increment_used(&a, 1).unwrap();
        store.set_status(&a, ParticipantStatus::Active).unwrap();

        recover(&store).unwrap();

        let p = store.get_participant(&a).unwrap().unwrap();
        assert_eq!(p.credits_used, 1);
        assert_eq!(p.credits_total, 3);
        assert!(p.credits_pulsed);
    }
}
