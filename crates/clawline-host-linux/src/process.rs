//! Helper process management

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use tracing::debug;

use clawline_host_api::{ActuatorError, ActuatorResult};

/// A pulse helper running in its own process group
pub struct HelperProcess {
    pub child: Child,
    pub pid: u32,
    pub pgid: u32,
}

impl HelperProcess {
    /// Spawn `argv` as the leader of a new process group
    pub fn spawn(argv: &[String]) -> ActuatorResult<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(ActuatorError::Unavailable("Empty helper command".into()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);

        // Helpers only need a PATH to find their tools
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }

        // stdout belongs to the event stream; keep helpers off it
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());

        // SAFETY: setsid is async-signal-safe and runs before exec
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::other)?;
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        let pid = child.id();
        let pgid = pid; // After setsid, pid == pgid

        debug!(pid, program = %program, "Helper spawned");

        Ok(Self { child, pid, pgid })
    }

    /// Check whether the helper has exited (non-blocking)
    pub fn try_wait(&mut self) -> ActuatorResult<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// SIGKILL the helper's whole process group
    pub fn kill(&mut self) -> ActuatorResult<()> {
        let pgid = Pid::from_raw(-(self.pgid as i32)); // Negative for process group

        match signal::kill(pgid, Signal::SIGKILL) {
            Ok(()) => {
                debug!(pgid = self.pgid, "Sent SIGKILL to helper group");
            }
            // Already gone
            Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => {
                return Err(ActuatorError::Unavailable(format!(
                    "Failed to kill helper: {}",
                    e
                )));
            }
        }

        // Reap so the child does not linger as a zombie
        let _ = self.child.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wait_for_exit(proc: &mut HelperProcess) -> ExitStatus {
        loop {
            if let Some(status) = proc.try_wait().unwrap() {
                return status;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn spawn_simple_helper() {
        let argv = vec!["true".to_string()];
        let mut proc = HelperProcess::spawn(&argv).unwrap();
        assert!(wait_for_exit(&mut proc).success());
    }

    #[test]
    fn failing_helper_reports_status() {
        let argv = vec!["false".to_string()];
        let mut proc = HelperProcess::spawn(&argv).unwrap();
        assert!(!wait_for_exit(&mut proc).success());
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(HelperProcess::spawn(&[]).is_err());
    }

    #[test]
    fn missing_program_is_an_error() {
        let argv = vec!["/nonexistent/clawline-pulse".to_string()];
        assert!(matches!(
            HelperProcess::spawn(&argv),
            Err(ActuatorError::Io(_))
        ));
    }

    #[test]
    fn kill_stops_sleeping_helper() {
        let argv = vec!["sleep".to_string(), "60".to_string()];
        let mut proc = HelperProcess::spawn(&argv).unwrap();

        proc.kill().unwrap();

        assert!(proc.try_wait().unwrap().is_some());
    }
}
