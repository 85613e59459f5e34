//! Scheduler service
//!
//! The scheduler is owned by a single task. Commands from the outside world
//! and timer callbacks all arrive through its mailbox, so each one runs to
//! completion before the next is looked at.

use clawline_api::{ControlAction, ControlOutcome, Event, EventPayload, SchedulerSnapshot};
use clawline_config::Settings;
use clawline_host_api::{Actuator, Broadcaster};
use clawline_store::QueueStore;
use clawline_util::{ParticipantId, now};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    PaymentOutcome, Recovered, Scheduler, SchedulerError, SchedulerResult, TimerFired, TimerKind,
    TimerScheduler,
};

/// Mailbox capacity for the scheduler task
const SCHEDULER_CHANNEL_BUFFER: usize = 256;

/// How a confirmed payment is expressed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payment {
    /// Currency amount, converted with the configured price
    Amount(f64),
    /// Credits granted directly
    Credits(u32),
}

/// Messages handled by the scheduler task
#[derive(Debug)]
pub enum SchedulerMessage {
    Register {
        participant_id: ParticipantId,
        display_name: Option<String>,
        respond_to: oneshot::Sender<SchedulerResult<bool>>,
    },
    PaymentConfirmed {
        participant_id: ParticipantId,
        display_name: Option<String>,
        payment: Payment,
        respond_to: oneshot::Sender<SchedulerResult<PaymentOutcome>>,
    },
    Control {
        participant_id: ParticipantId,
        action: ControlAction,
        respond_to: oneshot::Sender<SchedulerResult<ControlOutcome>>,
    },
    ForceEnd {
        reason: String,
        respond_to: oneshot::Sender<SchedulerResult<Option<ParticipantId>>>,
    },
    ForceStartNext {
        respond_to: oneshot::Sender<SchedulerResult<Option<ParticipantId>>>,
    },
    ForceActivate {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<SchedulerResult<()>>,
    },
    RequeueActive {
        respond_to: oneshot::Sender<SchedulerResult<Option<ParticipantId>>>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<SchedulerSnapshot>,
    },
    /// Posted by a timer task when its delay elapses
    TimerFired(TimerFired),
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Timers backed by tokio sleep tasks that post back into the mailbox.
///
/// Holds only a weak sender so pending timers never keep the service alive.
pub struct TokioTimers {
    mailbox: mpsc::WeakSender<SchedulerMessage>,
    tasks: HashMap<TimerKind, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(mailbox: mpsc::WeakSender<SchedulerMessage>) -> Self {
        Self {
            mailbox,
            tasks: HashMap::new(),
        }
    }
}

impl TimerScheduler for TokioTimers {
    fn schedule(&mut self, kind: TimerKind, seq: u64, after: Duration) {
        self.cancel(kind);

        let mailbox = self.mailbox.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender
                    .send(SchedulerMessage::TimerFired(TimerFired { kind, seq }))
                    .await;
            }
        });

        self.tasks.insert(kind, task);
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(task) = self.tasks.remove(&kind) {
            task.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

/// Handle to the scheduler task
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerMessage>,
}

impl SchedulerHandle {
    /// Spawn the scheduler task.
    ///
    /// The task tries an activation as soon as it starts, so anyone left
    /// waiting by recovery gets the machine without a new payment.
    pub fn spawn(
        recovered: Recovered,
        settings: &Settings,
        store: Arc<dyn QueueStore>,
        actuator: Arc<dyn Actuator>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SCHEDULER_CHANNEL_BUFFER);
        let timers = TokioTimers::new(sender.downgrade());

        let scheduler = Scheduler::new(
            recovered,
            settings,
            store,
            actuator,
            broadcaster,
            Box::new(timers),
        );

        let task = tokio::spawn(run(scheduler, receiver));
        (Self { sender }, task)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SchedulerMessage,
    ) -> Result<T, SchedulerError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| SchedulerError::ServiceStopped)?;
        response.await.map_err(|_| SchedulerError::ServiceStopped)
    }

    pub async fn register(
        &self,
        participant_id: ParticipantId,
        display_name: Option<String>,
    ) -> SchedulerResult<bool> {
        self.request(|respond_to| SchedulerMessage::Register {
            participant_id,
            display_name,
            respond_to,
        })
        .await?
    }

    pub async fn payment_confirmed(
        &self,
        participant_id: ParticipantId,
        display_name: Option<String>,
        payment: Payment,
    ) -> SchedulerResult<PaymentOutcome> {
        self.request(|respond_to| SchedulerMessage::PaymentConfirmed {
            participant_id,
            display_name,
            payment,
            respond_to,
        })
        .await?
    }

    pub async fn control(
        &self,
        participant_id: ParticipantId,
        action: ControlAction,
    ) -> SchedulerResult<ControlOutcome> {
        self.request(|respond_to| SchedulerMessage::Control {
            participant_id,
            action,
            respond_to,
        })
        .await?
    }

    pub async fn force_end(&self, reason: String) -> SchedulerResult<Option<ParticipantId>> {
        self.request(|respond_to| SchedulerMessage::ForceEnd { reason, respond_to })
            .await?
    }

    pub async fn force_start_next(&self) -> SchedulerResult<Option<ParticipantId>> {
        self.request(|respond_to| SchedulerMessage::ForceStartNext { respond_to })
            .await?
    }

    pub async fn force_activate(&self, participant_id: ParticipantId) -> SchedulerResult<()> {
        self.request(|respond_to| SchedulerMessage::ForceActivate {
            participant_id,
            respond_to,
        })
        .await?
    }

    pub async fn requeue_active(&self) -> SchedulerResult<Option<ParticipantId>> {
        self.request(|respond_to| SchedulerMessage::RequeueActive { respond_to })
            .await?
    }

    pub async fn snapshot(&self) -> SchedulerResult<SchedulerSnapshot> {
        self.request(|respond_to| SchedulerMessage::GetSnapshot { respond_to })
            .await
    }

    /// Stop timers, release the machine and end the task
    pub async fn shutdown(&self) -> SchedulerResult<()> {
        self.request(|respond_to| SchedulerMessage::Shutdown { respond_to })
            .await
    }
}

async fn run(mut scheduler: Scheduler, mut receiver: mpsc::Receiver<SchedulerMessage>) {
    info!("Scheduler service started");

    if let Err(e) = scheduler.activate_next(now()) {
        warn!(error = %e, "Initial activation failed");
    }

    while let Some(message) = receiver.recv().await {
        match message {
            SchedulerMessage::Register {
                participant_id,
                display_name,
                respond_to,
            } => {
                let result =
                    scheduler.register_participant(&participant_id, display_name.as_deref(), now());
                let _ = respond_to.send(result);
            }
            SchedulerMessage::PaymentConfirmed {
                participant_id,
                display_name,
                payment,
                respond_to,
            } => {
                let credits = match payment {
                    Payment::Amount(amount) => scheduler.credits_for(amount),
                    Payment::Credits(credits) => credits,
                };
                let result = scheduler.on_payment_confirmed(
                    &participant_id,
                    display_name.as_deref(),
                    credits,
                    now(),
                );
                let _ = respond_to.send(result);
            }
            SchedulerMessage::Control {
                participant_id,
                action,
                respond_to,
            } => {
                let _ = respond_to.send(scheduler.on_control_action(&participant_id, action, now()));
            }
            SchedulerMessage::ForceEnd { reason, respond_to } => {
                let _ = respond_to.send(scheduler.force_end(reason, now()));
            }
            SchedulerMessage::ForceStartNext { respond_to } => {
                let _ = respond_to.send(scheduler.force_start_next(now()));
            }
            SchedulerMessage::ForceActivate {
                participant_id,
                respond_to,
            } => {
                let _ = respond_to.send(scheduler.force_activate(&participant_id, now()));
            }
            SchedulerMessage::RequeueActive { respond_to } => {
                let _ = respond_to.send(scheduler.requeue_active(now()));
            }
            SchedulerMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(scheduler.snapshot());
            }
            SchedulerMessage::TimerFired(fired) => {
                if let Err(e) = scheduler.on_timer(fired, now()) {
                    warn!(kind = ?fired.kind, seq = fired.seq, error = %e, "Timer handling failed");
                }
            }
            SchedulerMessage::Shutdown { respond_to } => {
                scheduler.shutdown();
                let _ = respond_to.send(());
                break;
            }
        }
    }

    debug!("Scheduler service stopped");
}

/// Re-publish the snapshot every `interval` so late subscribers catch up
pub fn spawn_heartbeat(
    handle: SchedulerHandle,
    broadcaster: Arc<dyn Broadcaster>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let snapshot = match handle.snapshot().await {
                Ok(snapshot) => snapshot,
                Err(_) => {
                    debug!("Heartbeat stopping, scheduler gone");
                    break;
                }
            };
            if let Err(e) = broadcaster.publish(&Event::new(EventPayload::StateChanged(snapshot))) {
                debug!(error = %e, "Heartbeat publish failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recover;
    use clawline_api::ParticipantStatus;
    use clawline_host_api::{MockActuator, RecordingBroadcaster};
    use clawline_store::SqliteStore;

    struct Service {
        handle: SchedulerHandle,
        task: JoinHandle<()>,
        store: Arc<SqliteStore>,
        actuator: Arc<MockActuator>,
        broadcaster: Arc<RecordingBroadcaster>,
    }

    fn spawn_service(store: Arc<SqliteStore>) -> Service {
        let actuator = Arc::new(MockActuator::new());
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let (recovered, _) = recover(store.as_ref()).unwrap();

        let (handle, task) = SchedulerHandle::spawn(
            recovered,
            &Settings::default(),
            store.clone(),
            actuator.clone(),
            broadcaster.clone(),
        );

        Service {
            handle,
            task,
            store,
            actuator,
            broadcaster,
        }
    }

    fn alice() -> ParticipantId {
        ParticipantId::new("alice")
    }

    #[tokio::test(start_paused = true)]
    async fn credit_timer_fires_through_mailbox() {
        let svc = spawn_service(Arc::new(SqliteStore::in_memory().unwrap()));

        let outcome = svc
            .handle
            .payment_confirmed(alice(), Some("Alice".into()), Payment::Credits(1))
            .await
            .unwrap();
        assert_eq!(outcome.activated, Some(alice()));

        let control = svc.handle.control(alice(), ControlAction::Move).await.unwrap();
        assert!(matches!(control, ControlOutcome::CreditStarted { .. }));

        tokio::time::sleep(Duration::from_secs(31)).await;

        let snapshot = svc.handle.snapshot().await.unwrap();
        assert!(snapshot.is_idle());

        let p = svc.store.get_participant(&alice()).unwrap().unwrap();
        assert_eq!(p.credits_used, 1);
        assert_eq!(p.status, ParticipantStatus::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn amount_is_converted_to_credits() {
        let svc = spawn_service(Arc::new(SqliteStore::in_memory().unwrap()));

        let outcome = svc
            .handle
            .payment_confirmed(alice(), None, Payment::Amount(3.7))
            .await
            .unwrap();

        assert_eq!(outcome.credits_granted, 3);
        assert_eq!(svc.actuator.pulse_count(0), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn grab_cuts_credit_short() {
        let svc = spawn_service(Arc::new(SqliteStore::in_memory().unwrap()));
        svc.handle
            .payment_confirmed(alice(), None, Payment::Credits(2))
            .await
            .unwrap();

        svc.handle.control(alice(), ControlAction::Move).await.unwrap();
        svc.handle.control(alice(), ControlAction::Grab).await.unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        let snapshot = svc.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.credits_remaining, Some(1));
        assert!(snapshot.first_move_deadline.is_some());

        // The original 30s window must not charge a second credit
        tokio::time::sleep(Duration::from_secs(30)).await;
        let p = svc.store.get_participant(&alice()).unwrap().unwrap();
        assert_eq!(p.credits_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sole_participant_keeps_machine() {
        let svc = spawn_service(Arc::new(SqliteStore::in_memory().unwrap()));
        svc.handle
            .payment_confirmed(alice(), None, Payment::Credits(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(95)).await;

        let snapshot = svc.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.active_id, Some(alice()));
        assert_eq!(svc.broadcaster.count("first_move_renewed"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_waiter_is_activated_on_start() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .confirm_payment(&alice(), Some("Alice"), 2, now())
            .unwrap();
        store.set_status(&alice(), ParticipantStatus::Active).unwrap();

        let svc = spawn_service(store);
        let snapshot = svc.handle.snapshot().await.unwrap();

        assert_eq!(snapshot.active_id, Some(alice()));
        assert_eq!(snapshot.credits_remaining, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn errors_cross_the_mailbox() {
        let svc = spawn_service(Arc::new(SqliteStore::in_memory().unwrap()));

        let err = svc.handle.force_end("operator".into()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NoActiveSession));

        let err = svc
            .handle
            .control(alice(), ControlAction::Grab)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotActive(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_and_stops() {
        let svc = spawn_service(Arc::new(SqliteStore::in_memory().unwrap()));
        svc.handle
            .payment_confirmed(alice(), None, Payment::Credits(1))
            .await
            .unwrap();

        svc.handle.shutdown().await.unwrap();
        svc.task.await.unwrap();

        assert_eq!(svc.actuator.release_count(), 1);
        assert_eq!(svc.broadcaster.count("shutdown"), 1);
        assert!(matches!(
            svc.handle.snapshot().await,
            Err(SchedulerError::ServiceStopped)
        ));

        // Still active in the ledger until the next recovery
        let p = svc.store.get_participant(&alice()).unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_republishes_snapshot() {
        let svc = spawn_service(Arc::new(SqliteStore::in_memory().unwrap()));
        let heartbeat = spawn_heartbeat(
            svc.handle.clone(),
            svc.broadcaster.clone(),
            Duration::from_secs(5),
        );

        // Let startup publishing and the immediate first tick settle
        tokio::time::sleep(Duration::from_secs(1)).await;
        svc.broadcaster.clear();

        tokio::time::sleep(Duration::from_secs(10)).await;
        heartbeat.abort();

        // Ticks at 5s and 10s
        assert_eq!(svc.broadcaster.count("state_changed"), 2);
    }
}
