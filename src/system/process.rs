use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long a killed child gets to exit before it is given up on.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("interrupted")]
    Interrupted,

    #[error("failed to wait for child: {0}")]
    Wait(io::Error),
}

/// Runs `cmd` to completion, killing it once `timeout` passes or `cancel` is
/// raised. Stdin is closed so the child can never block on a prompt.
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    cancel: Option<&AtomicBool>,
) -> Result<ExitStatus, RunError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!("Running {:?} (timeout {:?})", cmd, timeout);

    let mut child = cmd
        .stdin(Stdio::null())
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(RunError::Wait)? {
            debug!("{} exited with {}", program, status);
            return Ok(status);
        }

        let interrupted = cancel.map(|c| c.load(Ordering::SeqCst)).unwrap_or(false);
        let expired = started.elapsed() >= timeout;

        if interrupted || expired {
            warn!(
                "Stopping {} ({})",
                program,
                if interrupted { "interrupted" } else { "timed out" }
            );
            // An elevated child may refuse the signal (EPERM), so never block on it.
            if let Err(e) = child.kill() {
                warn!("Failed to kill {}: {}", program, e);
            }
            if !reap_within(&mut child, KILL_GRACE) {
                warn!(
                    "{} (pid {}) did not exit and was left running",
                    program,
                    child.id()
                );
            }

            return Err(if interrupted {
                RunError::Interrupted
            } else {
                RunError::Timeout(timeout)
            });
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Polls `child` for up to `grace`. Returns whether it exited.
fn reap_within(child: &mut Child, grace: Duration) -> bool {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Child exited with {} after being stopped", status);
                return true;
            }
            Ok(None) if started.elapsed() < grace => thread::sleep(POLL_INTERVAL),
            Ok(None) => return false,
            Err(e) => {
                warn!("Failed to wait for child: {}", e);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_is_returned() {
        let status = run_with_timeout(&mut Command::new("true"), Duration::from_secs(5), None).unwrap();
        assert!(status.success());

        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 3"]);
        let status = run_with_timeout(&mut cmd, Duration::from_secs(5), None).unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn test_timeout_kills_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let started = Instant::now();
        let result = run_with_timeout(&mut cmd, Duration::from_millis(200), None);

        assert!(matches!(result, Err(RunError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_unreaped_child_does_not_block() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let started = Instant::now();

        assert!(!reap_within(&mut child, Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(2));

        child.kill().unwrap();
        assert!(reap_within(&mut child, Duration::from_secs(2)));
    }

    #[test]
    fn test_cancel_flag() {
        let cancel = AtomicBool::new(true);
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_with_timeout(&mut cmd, Duration::from_secs(10), Some(&cancel));
        assert!(matches!(result, Err(RunError::Interrupted)));
    }

    #[test]
    fn test_missing_program() {
        let mut cmd = Command::new("/nonexistent/linux-undervolt-test-tool");
        let result = run_with_timeout(&mut cmd, Duration::from_secs(1), None);
        assert!(matches!(result, Err(RunError::Spawn { .. })));
    }
}
