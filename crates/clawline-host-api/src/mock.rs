//! Mock collaborators for testing

use clawline_api::Event;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    Actuator, ActuatorError, ActuatorResult, BroadcastError, BroadcastResult, Broadcaster,
};

/// One recorded actuator call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorCall {
    Pulse { channel: u8, duration: Duration },
    ReleaseAll,
}

/// Mock actuator that records every call
#[derive(Default)]
pub struct MockActuator {
    calls: Arc<Mutex<Vec<ActuatorCall>>>,

    /// Configure pulses to fail (the call is still recorded)
    pub fail_pulse: Arc<Mutex<bool>>,

    /// Configure release to fail (the call is still recorded)
    pub fail_release: Arc<Mutex<bool>>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded calls in order
    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of pulses issued on `channel`
    pub fn pulse_count(&self, channel: u8) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, ActuatorCall::Pulse { channel: ch, .. } if *ch == channel))
            .count()
    }

    /// Number of release-all calls
    pub fn release_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, ActuatorCall::ReleaseAll))
            .count()
    }

    pub fn set_fail_pulse(&self, fail: bool) {
        *self.fail_pulse.lock().unwrap() = fail;
    }
}

impl Actuator for MockActuator {
    fn pulse(&self, channel: u8, duration: Duration) -> ActuatorResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(ActuatorCall::Pulse { channel, duration });

        if *self.fail_pulse.lock().unwrap() {
            return Err(ActuatorError::PulseFailed {
                channel,
                message: "Mock pulse failure".into(),
            });
        }
        Ok(())
    }

    fn release_all(&self) -> ActuatorResult<()> {
        self.calls.lock().unwrap().push(ActuatorCall::ReleaseAll);

        if *self.fail_release.lock().unwrap() {
            return Err(ActuatorError::ReleaseFailed("Mock release failure".into()));
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !*self.fail_pulse.lock().unwrap()
    }
}

/// Mock broadcaster that records every published event
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Arc<Mutex<Vec<Event>>>,

    /// Configure publish to fail (the event is still recorded)
    pub fail: Arc<Mutex<bool>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Names of recorded events in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().into_iter().filter(|n| *n == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish(&self, event: &Event) -> BroadcastResult<()> {
        self.events.lock().unwrap().push(event.clone());

        if *self.fail.lock().unwrap() {
            return Err(BroadcastError::Transport("Mock publish failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clawline_api::EventPayload;
    use clawline_util::ParticipantId;

    #[test]
    fn mock_actuator_records_calls() {
        let actuator = MockActuator::new();

        actuator.pulse(0, Duration::from_millis(100)).unwrap();
        actuator.pulse(0, Duration::from_millis(100)).unwrap();
        actuator.pulse(1, Duration::from_millis(100)).unwrap();
        actuator.release_all().unwrap();

        assert_eq!(actuator.pulse_count(0), 2);
        assert_eq!(actuator.pulse_count(1), 1);
        assert_eq!(actuator.release_count(), 1);
        assert_eq!(actuator.calls().len(), 4);
    }

    #[test]
    fn mock_actuator_failure_still_records() {
        let actuator = MockActuator::new();
        actuator.set_fail_pulse(true);

        assert!(actuator.pulse(1, Duration::from_millis(50)).is_err());
        assert_eq!(actuator.pulse_count(1), 1);
    }

    #[test]
    fn recording_broadcaster_tracks_names() {
        let broadcaster = RecordingBroadcaster::new();
        broadcaster
            .publish(&Event::new(EventPayload::CreditConsumed {
                participant_id: ParticipantId::new("a"),
                credits_remaining: 1,
            }))
            .unwrap();
        broadcaster
            .publish(&Event::new(EventPayload::Shutdown))
            .unwrap();

        assert_eq!(broadcaster.names(), vec!["credit_consumed", "shutdown"]);
        assert_eq!(broadcaster.count("shutdown"), 1);

        broadcaster.clear();
        assert!(broadcaster.events().is_empty());
    }
}
