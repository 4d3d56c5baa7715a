//! Single exploit run: spawn, stream output, extract flags, enforce the deadline.

use std::collections::HashSet;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, warn, Instrument};
use uuid::Uuid;
use warehouse_core::obs;

use crate::client::{Discovery, WarehouseApi};
use crate::exploit::Exploit;
use crate::extractor::FlagExtractor;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunExit {
    /// Exit status 0
    Success,
    /// Killed at the deadline
    TimedOut,
    /// Non-zero exit code
    Failed(i32),
    /// Terminated by a signal we did not send
    Signalled(i32),
    /// The process could not be started
    SpawnFailed(String),
}

impl RunExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunExit::Success => "success",
            RunExit::TimedOut => "timed_out",
            RunExit::Failed(_) => "failed",
            RunExit::Signalled(_) => "signalled",
            RunExit::SpawnFailed(_) => "spawn_failed",
        }
    }
}

/// Result of one (exploit, target) run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub exploit: String,
    pub target: String,
    pub exit: RunExit,
    /// Distinct flags reported during the run
    pub flags: usize,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.exit == RunExit::Success
    }
}

enum Output {
    Line(String),
    StdoutClosed,
    StderrClosed,
    Deadline,
}

/// Runs exploits as child processes and reports what they print.
pub struct RunSupervisor {
    extractor: FlagExtractor,
    api: Arc<dyn WarehouseApi>,
}

impl RunSupervisor {
    pub fn new(extractor: FlagExtractor, api: Arc<dyn WarehouseApi>) -> Self {
        Self { extractor, api }
    }

    /// Run `exploit` against `target` for at most `timeout`.
    ///
    /// Invoked as `<exploit> <target>`. Stdout and stderr are read line by
    /// line as the child produces them; every line is matched against the
    /// flag format and newly seen flags are reported immediately. Failures
    /// are logged and reflected in the report, never returned as errors.
    pub async fn execute(&self, exploit: &Exploit, target: &str, timeout: Duration) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, &exploit.name, target);
        self.execute_inner(run_id, exploit, target, timeout)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        run_id: String,
        exploit: &Exploit,
        target: &str,
        timeout: Duration,
    ) -> RunReport {
        let start = Instant::now();
        let mut seen: HashSet<String> = HashSet::new();

        let exit = match Command::new(&exploit.path)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => self.supervise(child, exploit, target, timeout, &mut seen).await,
            Err(e) => RunExit::SpawnFailed(e.to_string()),
        };

        let name = exploit.display_name();
        match &exit {
            RunExit::Success => {}
            RunExit::TimedOut => {
                warn!("{}@{} was killed because it took too long to finish", name, target)
            }
            RunExit::Failed(code) => {
                error!("{}@{} terminated with error code {}", name, target, code)
            }
            RunExit::Signalled(sig) => {
                error!("{}@{} was terminated by signal {}", name, target, sig)
            }
            RunExit::SpawnFailed(reason) => {
                error!("{}@{} could not be started: {}", name, target, reason)
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_run_finished(&run_id, exit.as_str(), duration_ms, seen.len());

        RunReport {
            run_id,
            exploit: exploit.name.clone(),
            target: target.to_string(),
            exit,
            flags: seen.len(),
            duration_ms,
        }
    }

    async fn supervise(
        &self,
        mut child: Child,
        exploit: &Exploit,
        target: &str,
        timeout: Duration,
        seen: &mut HashSet<String>,
    ) -> RunExit {
        let deadline = tokio::time::Instant::now() + timeout;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill exploit without output pipes");
            }
            return RunExit::SpawnFailed("child output pipes unavailable".to_string());
        };
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            let event = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => Output::Deadline,
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => Output::Line(line),
                    _ => Output::StdoutClosed,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => Output::Line(line),
                    _ => Output::StderrClosed,
                },
            };

            match event {
                Output::Line(line) => self.handle_line(exploit, target, &line, seen),
                Output::StdoutClosed => stdout_open = false,
                Output::StderrClosed => stderr_open = false,
                Output::Deadline => return kill(&mut child).await,
            }
        }

        // Output closed; the process may still be running.
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(Ok(status)) => classify(status),
            Ok(Err(e)) => RunExit::SpawnFailed(e.to_string()),
            Err(_) => kill(&mut child).await,
        }
    }

    fn handle_line(&self, exploit: &Exploit, target: &str, line: &str, seen: &mut HashSet<String>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        debug!("{}@{} => {}", exploit.name, target, line);

        let flags: Vec<String> = self
            .extractor
            .extract(line)
            .into_iter()
            .filter(|flag| seen.insert(flag.clone()))
            .collect();
        if flags.is_empty() {
            return;
        }

        obs::emit_flags_discovered(&exploit.display_name(), target, flags.len());
        self.api.report(Discovery {
            exploit: exploit.name.clone(),
            target: target.to_string(),
            flags,
            detected_at: Local::now(),
        });
    }
}

async fn kill(child: &mut Child) -> RunExit {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill timed out exploit");
    }
    RunExit::TimedOut
}

fn classify(status: ExitStatus) -> RunExit {
    if status.success() {
        return RunExit::Success;
    }
    if let Some(code) = status.code() {
        return RunExit::Failed(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return RunExit::Signalled(sig);
        }
    }
    RunExit::Failed(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use async_trait::async_trait;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingApi {
        reports: Mutex<Vec<Discovery>>,
    }

    #[async_trait]
    impl WarehouseApi for RecordingApi {
        async fn check_liveness(&self) -> Result<(), ClientError> {
            Ok(())
        }

        async fn fetch_flag_ids(&self, _url: &str, _dest: &Path) -> Result<(), ClientError> {
            Ok(())
        }

        fn report(&self, discovery: Discovery) {
            self.reports.lock().unwrap().push(discovery);
        }
    }

    fn script(dir: &Path, name: &str, body: &str) -> Exploit {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Exploit::new(path)
    }

    fn supervisor(api: Arc<RecordingApi>) -> RunSupervisor {
        RunSupervisor::new(FlagExtractor::new(r"FLAG\{[a-z0-9]+\}").unwrap(), api)
    }

    #[tokio::test]
    async fn test_reports_flags_from_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let exploit = script(
            dir.path(),
            "pwn.sh",
            "echo \"target $1 FLAG{aaa}\"\necho 'FLAG{bbb}' >&2\necho 'FLAG{aaa} again'",
        );
        let api = Arc::new(RecordingApi::default());

        let report = supervisor(api.clone())
            .execute(&exploit, "10.60.1.1", Duration::from_secs(10))
            .await;

        assert_eq!(report.exit, RunExit::Success);
        assert_eq!(report.flags, 2);

        let reports = api.reports.lock().unwrap();
        let mut flags: Vec<String> = reports.iter().flat_map(|d| d.flags.clone()).collect();
        flags.sort();
        assert_eq!(flags, vec!["FLAG{aaa}", "FLAG{bbb}"]);
        assert!(reports.iter().all(|d| d.target == "10.60.1.1" && d.exploit == "pwn.sh"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exploit = script(dir.path(), "broken.sh", "echo oops >&2\nexit 3");
        let api = Arc::new(RecordingApi::default());

        let report = supervisor(api.clone())
            .execute(&exploit, "10.60.1.1", Duration::from_secs(10))
            .await;

        assert_eq!(report.exit, RunExit::Failed(3));
        assert!(!report.passed());
        assert!(api.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_kills_and_keeps_earlier_flags() {
        let dir = tempfile::tempdir().unwrap();
        let exploit = script(dir.path(), "slow.sh", "echo 'FLAG{early}'\nexec sleep 30");
        let api = Arc::new(RecordingApi::default());

        let started = Instant::now();
        let report = supervisor(api.clone())
            .execute(&exploit, "10.60.2.1", Duration::from_millis(500))
            .await;

        assert_eq!(report.exit, RunExit::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.flags, 1);
        assert_eq!(api.reports.lock().unwrap()[0].flags, vec!["FLAG{early}"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let api = Arc::new(RecordingApi::default());
        let exploit = Exploit::new("/nonexistent/exploit.py");

        let report = supervisor(api)
            .execute(&exploit, "10.60.1.1", Duration::from_secs(1))
            .await;

        assert!(matches!(report.exit, RunExit::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_unpiped_child_is_killed_and_reported() {
        let dir = tempfile::tempdir().unwrap();
        let exploit = script(dir.path(), "mute.sh", "exec sleep 30");
        let child = Command::new(&exploit.path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let mut seen = HashSet::new();
        let started = Instant::now();
        let exit = supervisor(Arc::new(RecordingApi::default()))
            .supervise(child, &exploit, "10.60.1.1", Duration::from_secs(20), &mut seen)
            .await;

        assert!(matches!(exit, RunExit::SpawnFailed(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
