//! Actuator that shells out to a pulse helper

use clawline_host_api::{Actuator, ActuatorError, ActuatorResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::process::HelperProcess;

/// How long a helper may run before its process group is killed
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Helper argv with `{channel}` and `{duration_ms}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseTemplate {
    argv: Vec<String>,
}

impl PulseTemplate {
    pub fn new(argv: Vec<String>) -> ActuatorResult<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(ActuatorError::Unavailable("Empty helper command".into()));
        }
        Ok(Self { argv })
    }

    /// Substitute the placeholders for one pulse
    pub fn render(&self, channel: u8, duration: Duration) -> Vec<String> {
        let channel = channel.to_string();
        let duration_ms = duration.as_millis().to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{channel}", &channel)
                    .replace("{duration_ms}", &duration_ms)
            })
            .collect()
    }
}

/// Tuning for [`CommandActuator`]
#[derive(Debug, Clone)]
pub struct HelperOptions {
    /// Channel pulsed by `release_all`
    pub release_channel: u8,
    pub release_pulse: Duration,
    pub timeout: Duration,
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self {
            release_channel: 2,
            release_pulse: Duration::from_millis(120),
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PulseJob {
    channel: u8,
    duration: Duration,
}

/// Runs the configured helper once per pulse.
///
/// `pulse` and `release_all` only enqueue; a worker task runs helpers one
/// at a time in submission order, so back-to-back coin pulses stay distinct.
pub struct CommandActuator {
    jobs: mpsc::UnboundedSender<PulseJob>,
    options: HelperOptions,
    healthy: Arc<AtomicBool>,
}

impl CommandActuator {
    /// Start the helper worker. Must be called inside a tokio runtime.
    ///
    /// The worker drains queued pulses and exits once the actuator is dropped.
    pub fn spawn(template: PulseTemplate, options: HelperOptions) -> (Self, JoinHandle<()>) {
        let (jobs, receiver) = mpsc::unbounded_channel();
        let healthy = Arc::new(AtomicBool::new(true));

        info!(command = ?template.argv, "Pulse helper configured");
        let worker = tokio::spawn(run_helpers(
            template,
            receiver,
            options.timeout,
            healthy.clone(),
        ));

        (
            Self {
                jobs,
                options,
                healthy,
            },
            worker,
        )
    }

    fn enqueue(&self, job: PulseJob) -> Result<(), String> {
        self.jobs
            .send(job)
            .map_err(|_| "pulse worker stopped".to_string())
    }
}

impl Actuator for CommandActuator {
    fn pulse(&self, channel: u8, duration: Duration) -> ActuatorResult<()> {
        self.enqueue(PulseJob { channel, duration })
            .map_err(|message| ActuatorError::PulseFailed { channel, message })
    }

    fn release_all(&self) -> ActuatorResult<()> {
        self.enqueue(PulseJob {
            channel: self.options.release_channel,
            duration: self.options.release_pulse,
        })
        .map_err(ActuatorError::ReleaseFailed)
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

async fn run_helpers(
    template: PulseTemplate,
    mut jobs: mpsc::UnboundedReceiver<PulseJob>,
    timeout: Duration,
    healthy: Arc<AtomicBool>,
) {
    while let Some(job) = jobs.recv().await {
        let ok = run_one(&template, job, timeout).await;
        healthy.store(ok, Ordering::Relaxed);
    }
    debug!("Pulse worker stopped");
}

async fn run_one(template: &PulseTemplate, job: PulseJob, timeout: Duration) -> bool {
    let argv = template.render(job.channel, job.duration);
    let mut helper = match HelperProcess::spawn(&argv) {
        Ok(helper) => helper,
        Err(e) => {
            warn!(channel = job.channel, error = %e, "Failed to start pulse helper");
            return false;
        }
    };

    let started = Instant::now();
    loop {
        match helper.try_wait() {
            Ok(Some(status)) if status.success() => {
                debug!(channel = job.channel, pid = helper.pid, "Pulse delivered");
                return true;
            }
            Ok(Some(status)) => {
                warn!(channel = job.channel, status = %status, "Pulse helper failed");
                return false;
            }
            Ok(None) if started.elapsed() >= timeout => {
                warn!(channel = job.channel, pid = helper.pid, "Pulse helper timed out, killing");
                if let Err(e) = helper.kill() {
                    warn!(error = %e, "Failed to kill pulse helper");
                }
                return false;
            }
            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => {
                warn!(channel = job.channel, error = %e, "Failed to check pulse helper");
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn logging_template(log: &Path) -> PulseTemplate {
        PulseTemplate::new(vec![
            "sh".into(),
            "-c".into(),
            format!("echo {{channel}}:{{duration_ms}} >> {}", log.display()),
        ])
        .unwrap()
    }

    #[test]
    fn render_substitutes_placeholders() {
        let template = PulseTemplate::new(vec![
            "clawline-pulse".into(),
            "--channel={channel}".into(),
            "{duration_ms}".into(),
        ])
        .unwrap();

        assert_eq!(
            template.render(3, Duration::from_millis(120)),
            vec!["clawline-pulse", "--channel=3", "120"]
        );
    }

    #[test]
    fn empty_template_is_rejected() {
        assert!(PulseTemplate::new(vec![]).is_err());
        assert!(PulseTemplate::new(vec!["  ".into()]).is_err());
    }

    #[tokio::test]
    async fn pulses_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("pulses.log");

        let (actuator, worker) =
            CommandActuator::spawn(logging_template(&log), HelperOptions::default());

        for _ in 0..3 {
            actuator.pulse(0, Duration::from_millis(120)).unwrap();
        }
        actuator.pulse(1, Duration::from_millis(80)).unwrap();
        actuator.release_all().unwrap();

        drop(actuator);
        worker.await.unwrap();

        let lines = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            lines.lines().collect::<Vec<_>>(),
            vec!["0:120", "0:120", "0:120", "1:80", "2:120"]
        );
    }

    #[tokio::test]
    async fn stuck_helper_is_killed() {
        let template = PulseTemplate::new(vec!["sleep".into(), "60".into()]).unwrap();
        let options = HelperOptions {
            timeout: Duration::from_millis(100),
            ..Default::default()
        };

        let (actuator, worker) = CommandActuator::spawn(template, options);
        actuator.pulse(0, Duration::from_millis(120)).unwrap();

        let healthy = actuator.healthy.clone();
        drop(actuator);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();

        assert!(!healthy.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn failing_helper_marks_unhealthy() {
        let template = PulseTemplate::new(vec!["false".into()]).unwrap();
        let (actuator, worker) = CommandActuator::spawn(template, HelperOptions::default());

        actuator.pulse(0, Duration::from_millis(120)).unwrap();
        let healthy = actuator.healthy.clone();
        drop(actuator);
        worker.await.unwrap();

        assert!(!healthy.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn pulse_after_worker_exit_fails() {
        let template = PulseTemplate::new(vec!["true".into()]).unwrap();
        let (actuator, worker) = CommandActuator::spawn(template, HelperOptions::default());
        worker.abort();
        let _ = worker.await;

        assert!(matches!(
            actuator.pulse(0, Duration::from_millis(120)),
            Err(ActuatorError::PulseFailed { channel: 0, .. })
        ));
        assert!(matches!(
            actuator.release_all(),
            Err(ActuatorError::ReleaseFailed(_))
        ));
    }
}
