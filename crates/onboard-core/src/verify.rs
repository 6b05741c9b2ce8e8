use crate::concurrency::CancelToken;
use crate::lifecycle::{validate_transition, CheckState};
use crate::CoreError;
use onboard_schema::{CheckKind, CheckType, Priority, VerificationCheck};
use onboard_store::{CheckCounts, VerificationSummary};
use serde::Serialize;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Which checks a verification run includes. The default includes all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyFilter {
    pub min_priority: Option<Priority>,
    /// Included checks must carry at least one of these tags. Empty means no
    /// tag filter.
    pub tags: Vec<String>,
}

impl VerifyFilter {
    pub fn includes(&self, check: &VerificationCheck) -> bool {
        if let Some(min) = self.min_priority {
            if check.priority < min {
                return false;
            }
        }
        self.tags.is_empty() || check.has_any_tag(self.tags.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Upper bound on checks executing at once.
    pub workers: usize,
    /// Applied to checks that declare no `timeout`.
    pub default_timeout: Duration,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            default_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    /// The check ran and its assertion did not hold.
    Failed,
    /// The check could not produce a verdict: malformed, timed out, or
    /// unable to start.
    Errored,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: CheckType,
    pub priority: Priority,
    pub status: CheckStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub timestamp: String,
    pub success: bool,
    pub has_critical_failures: bool,
    pub summary: CheckCounts,
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    fn aggregate(checks: Vec<CheckResult>) -> Self {
        let passed = checks.iter().filter(|c| c.success).count();
        let has_critical_failures = checks
            .iter()
            .any(|c| !c.success && c.priority == Priority::Critical);
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            success: passed == checks.len(),
            has_critical_failures,
            summary: CheckCounts {
                total: checks.len(),
                passed,
                failed: checks.len() - passed,
            },
            checks,
        }
    }

    /// The entry appended to the state's verification history.
    pub fn to_summary(&self) -> VerificationSummary {
        VerificationSummary {
            timestamp: self.timestamp.clone(),
            success: self.success,
            has_critical_failures: self.has_critical_failures,
            summary: self.summary,
        }
    }
}

enum Outcome {
    Passed,
    Failed(String),
    Errored(String),
}

/// Executes verification checks against the live system.
///
/// Checks are independent and run on a bounded pool of scoped threads; each
/// one carries its own timeout, and a check that times out is recorded as
/// errored without holding up its siblings. Results keep declaration order.
/// Individual check failures never surface as `Err`; only cancellation does.
pub struct VerificationEngine {
    options: VerifyOptions,
    cancel: CancelToken,
}

impl VerificationEngine {
    pub fn new(options: VerifyOptions, cancel: CancelToken) -> Self {
        Self { options, cancel }
    }

    pub fn run(
        &self,
        checks: &[VerificationCheck],
        filter: &VerifyFilter,
        base_dir: &Path,
    ) -> Result<VerificationReport, CoreError> {
        let selected: Vec<&VerificationCheck> = checks.iter().filter(|c| filter.includes(c)).collect();
        debug!("{} of {} checks selected", selected.len(), checks.len());
        self.cancel.check()?;

        let workers = self.options.workers.max(1).min(selected.len());
        let next = AtomicUsize::new(0);
        let mut slots: Vec<Option<CheckResult>> = vec![None; selected.len()];

        std::thread::scope(|scope| {
            let next = &next;
            let selected = &selected;
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        while !self.cancel.is_cancelled() {
                            let index = next.fetch_add(1, Ordering::SeqCst);
                            let Some(check) = selected.get(index) else {
                                break;
                            };
                            done.push((index, self.run_one(check, base_dir)));
                        }
                        done
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (index, result) in done {
                            slots[index] = Some(result);
                        }
                    }
                    Err(_) => warn!("verification worker panicked"),
                }
            }
        });

        self.cancel.check()?;

        let results: Vec<CheckResult> = slots
            .into_iter()
            .zip(&selected)
            .map(|(slot, check)| {
                slot.unwrap_or_else(|| {
                    result_for(check, CheckStatus::Errored, Some("check did not complete".to_owned()), 0)
                })
            })
            .collect();

        let report = VerificationReport::aggregate(results);
        info!(
            "verification: {}/{} passed{}",
            report.summary.passed,
            report.summary.total,
            if report.has_critical_failures {
                " (critical failures)"
            } else {
                ""
            }
        );
        Ok(report)
    }

    fn run_one(&self, check: &VerificationCheck, base_dir: &Path) -> CheckResult {
        let started = Instant::now();
        let mut state = CheckState::Pending;

        let outcome = match validate_definition(&check.kind) {
            Err(reason) => Outcome::Errored(format!("malformed check: {reason}")),
            Ok(()) => match advance(&mut state, CheckState::Running) {
                Ok(()) => {
                    let timeout = check
                        .timeout
                        .map_or(self.options.default_timeout, Duration::from_secs);
                    execute(&check.kind, timeout, base_dir)
                }
                Err(e) => Outcome::Errored(e.to_string()),
            },
        };

        let (target, status, error) = match outcome {
            Outcome::Passed => (CheckState::Passed, CheckStatus::Passed, None),
            Outcome::Failed(msg) => (CheckState::Failed, CheckStatus::Failed, Some(msg)),
            Outcome::Errored(msg) => (CheckState::Errored, CheckStatus::Errored, Some(msg)),
        };
        let (status, error) = match advance(&mut state, target) {
            Ok(()) => (status, error),
            Err(e) => (CheckStatus::Errored, Some(e.to_string())),
        };

        let elapsed = started.elapsed().as_millis() as u64;
        match status {
            CheckStatus::Passed => debug!("check '{}' passed in {elapsed}ms", check.display_name()),
            _ => debug!(
                "check '{}' {status:?}: {}",
                check.display_name(),
                error.as_deref().unwrap_or_default()
            ),
        }
        result_for(check, status, error, elapsed)
    }
}

fn advance(state: &mut CheckState, to: CheckState) -> Result<(), CoreError> {
    validate_transition(*state, to)?;
    *state = to;
    Ok(())
}

fn result_for(
    check: &VerificationCheck,
    status: CheckStatus,
    error: Option<String>,
    duration_ms: u64,
) -> CheckResult {
    CheckResult {
        name: check.display_name(),
        check_type: check.check_type(),
        priority: check.priority,
        status,
        success: status == CheckStatus::Passed,
        error,
        duration_ms,
    }
}

fn validate_definition(kind: &CheckKind) -> Result<(), String> {
    match kind {
        CheckKind::Command { command, .. } if command.trim().is_empty() => {
            Err("empty command".to_owned())
        }
        CheckKind::Http { url, .. }
            if !(url.starts_with("http://") || url.starts_with("https://")) =>
        {
            Err(format!("'{url}' is not an http(s) URL"))
        }
        CheckKind::Port { port: 0, .. } => Err("port 0".to_owned()),
        CheckKind::Port { host, .. } if host.is_empty() => Err("empty host".to_owned()),
        CheckKind::File { path, .. } if path.is_empty() => Err("empty path".to_owned()),
        _ => Ok(()),
    }
}

fn execute(kind: &CheckKind, timeout: Duration, base_dir: &Path) -> Outcome {
    match kind {
        CheckKind::Command {
            command,
            expected_output,
        } => command_check(command, expected_output.as_deref(), timeout, base_dir),
        CheckKind::Http {
            url,
            expected_status,
        } => http_check(url, *expected_status, timeout),
        CheckKind::Port { port, host } => port_check(host, *port, timeout),
        CheckKind::File {
            path,
            should_exist,
            contains,
        } => file_check(&resolve_path(path, base_dir), *should_exist, contains.as_deref()),
    }
}

fn drain(pipe: Option<impl Read>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Sends SIGKILL to every process in the group led by `pid`.
#[allow(unsafe_code)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill() has no memory-safety preconditions; a negative pid
    // addresses the process group.
    let ret = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if ret != 0 {
        debug!(
            "kill of process group {pgid} failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

fn timed_out(timeout: Duration) -> Outcome {
    Outcome::Errored(format!("timed out after {}s", timeout.as_secs_f32()))
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn command_check(
    command: &str,
    expected_output: Option<&str>,
    timeout: Duration,
    base_dir: &Path,
) -> Outcome {
    let deadline = Instant::now() + timeout;
    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(base_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return Outcome::Errored(format!("failed to start: {e}")),
    };
    let pid = child.id();

    // Drained on their own threads so a chatty command cannot fill the pipe
    // and stall before the timeout fires. Background children inherit the
    // pipes, so collection is bounded by the same deadline as the shell.
    let (tx, rx) = mpsc::channel();
    for (stream, pipe) in [
        (Stream::Stdout, child.stdout.take().map(|p| Box::new(p) as Box<dyn Read + Send>)),
        (Stream::Stderr, child.stderr.take().map(|p| Box::new(p) as Box<dyn Read + Send>)),
    ] {
        let tx = tx.clone();
        std::thread::spawn(move || {
            let _ = tx.send((stream, drain(pipe)));
        });
    }
    drop(tx);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            kill_process_group(pid);
            let _ = child.kill();
            let _ = child.wait();
            return timed_out(timeout);
        }
        Err(e) => {
            kill_process_group(pid);
            return Outcome::Errored(format!("failed waiting for command: {e}"));
        }
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    for _ in 0..2 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, out)) => stdout = out,
            Ok((Stream::Stderr, out)) => stderr = out,
            Err(RecvTimeoutError::Timeout) => {
                debug!("'{command}' left a process holding its output open");
                kill_process_group(pid);
                return timed_out(timeout);
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !status.success() {
        let detail = stderr.trim();
        return Outcome::Failed(if detail.is_empty() {
            format!("exited with {status}")
        } else {
            format!("exited with {status}: {detail}")
        });
    }
    match expected_output {
        Some(expected) if !stdout.contains(expected) => Outcome::Failed(format!(
            "output did not contain '{expected}' (got '{}')",
            stdout.trim()
        )),
        _ => Outcome::Passed,
    }
}

fn http_check(url: &str, expected_status: u16, timeout: Duration) -> Outcome {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into();

    match agent.get(url).call() {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == expected_status {
                Outcome::Passed
            } else {
                Outcome::Failed(format!("expected HTTP {expected_status}, got {status}"))
            }
        }
        Err(ureq::Error::Timeout(_)) => timed_out(timeout),
        Err(ureq::Error::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => timed_out(timeout),
        Err(ureq::Error::BadUri(reason)) => Outcome::Errored(format!("bad URL: {reason}")),
        Err(e) => Outcome::Failed(format!("request failed: {e}")),
    }
}

fn port_check(host: &str, port: u16, timeout: Duration) -> Outcome {
    let addrs: Vec<_> = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(e) => return Outcome::Failed(format!("cannot resolve {host}: {e}")),
    };
    if addrs.is_empty() {
        return Outcome::Failed(format!("{host} resolved to no addresses"));
    }

    let mut timed_out = false;
    let mut last_error = String::new();
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(_) => return Outcome::Passed,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => timed_out = true,
            Err(e) => last_error = e.to_string(),
        }
    }
    if timed_out && last_error.is_empty() {
        Outcome::Errored(format!(
            "connecting to {host}:{port} timed out after {}s",
            timeout.as_secs_f32()
        ))
    } else {
        Outcome::Failed(format!("cannot connect to {host}:{port}: {last_error}"))
    }
}

/// `~/` expands to `$HOME`; relative paths are taken from `base_dir`.
fn resolve_path(path: &str, base_dir: &Path) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn file_check(path: &Path, should_exist: bool, contains: Option<&str>) -> Outcome {
    let exists = path.exists();
    if exists != should_exist {
        return Outcome::Failed(if should_exist {
            format!("{} does not exist", path.display())
        } else {
            format!("{} exists but should not", path.display())
        });
    }
    let Some(needle) = contains.filter(|_| exists) else {
        return Outcome::Passed;
    };
    match std::fs::read_to_string(path) {
        Ok(content) if content.contains(needle) => Outcome::Passed,
        Ok(_) => Outcome::Failed(format!("{} does not contain '{needle}'", path.display())),
        Err(e) => Outcome::Errored(format!("cannot read {}: {e}", path.display())),
    }
}
