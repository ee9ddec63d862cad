//! Guarded execution of external commands
//!
//! Every partitioning, LUKS, LVM and mkfs command the planner issues runs
//! through [`run_guarded`]. The child is placed in its own process group with
//! a parent-death signal and tracked in a global registry, so that a crash or
//! Ctrl+C of the planner never leaves `sgdisk` or `cryptsetup` running on a
//! half-written disk.
//!
//! On SIGINT/SIGTERM/SIGHUP, or when the [`ProcessGuard`] is dropped, tracked
//! process groups receive SIGTERM and, after a grace period, SIGKILL.

use std::collections::HashSet;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry tracking all spawned child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Set once cleanup started, a second cleanup is a no-op
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        log::debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        log::debug!("Unregistered child process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate all tracked process groups.
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            log::debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            return;
        }

        log::info!("Terminating {} child process(es)...", self.pids.len());

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                log::warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
                if let Err(e2) = send_signal(pid, Signal::SIGTERM) {
                    log::warn!("Failed to send SIGTERM to PID {}: {}", pid, e2);
                }
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if pids.iter().all(|&pid| !is_process_alive(pid)) {
                log::info!("All child processes terminated gracefully");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids {
            if is_process_alive(pid) {
                log::warn!("Process group {} did not terminate, sending SIGKILL", pid);
                if let Err(e) = send_signal_to_group(pid, Signal::SIGKILL) {
                    log::error!("Failed to send SIGKILL to process group {}: {}", pid, e);
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }

        self.pids.clear();
        log::info!("Child process cleanup complete");
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole process group
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Zombies and dead entries in `/proc/<pid>/stat` count as not alive
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        if let Some(state) = stat.split_whitespace().nth(2) {
            return !matches!(state, "Z" | "X");
        }
    }
    true
}

fn with_registry(f: impl FnOnce(&mut ChildRegistry)) {
    if let Ok(mut registry) = ChildRegistry::global().lock() {
        f(&mut registry);
    }
}

/// RAII guard that terminates all children on drop.
/// Held by `main` for the lifetime of a partitioning run.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        log::debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers that kill tracked children and exit
/// with `128 + signal`. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            log::info!("Received {} signal, cleaning up...", name);
            with_registry(|registry| registry.terminate_all(Duration::from_secs(3)));
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that dies with us
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

/// Captured result of a guarded command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into an error carrying stderr.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success() {
            Ok(())
        } else {
            anyhow::bail!(
                "{} failed ({} exit code {}): {}",
                context,
                self.program,
                self.exit_code.unwrap_or(-1),
                self.stderr.trim()
            )
        }
    }
}

/// Spawn `cmd` in its own process group, optionally feed `stdin`, and wait.
///
/// The child PID is registered with the global registry for the duration of
/// the call. A non-zero exit is returned as data, not as an error.
pub fn run_guarded(cmd: &mut Command, stdin: Option<&[u8]>) -> Result<CommandOutput> {
    let program = cmd.get_program().to_string_lossy().to_string();
    let args: Vec<String> = cmd
        .get_args()
        .map(|a| a.to_string_lossy().to_string())
        .collect();
    log::info!("run: {} {:?}", program, args);

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .in_new_process_group();

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    let pid = child.id();
    with_registry(|registry| registry.register(pid));

    let mut fed = Ok(());
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // dropping the pipe closes stdin so the child sees EOF
        fed = pipe.write_all(input);
    }

    let output = child.wait_with_output();
    with_registry(|registry| registry.unregister(pid));
    fed.with_context(|| format!("Failed writing stdin of {}", program))?;
    let output = output.with_context(|| format!("Failed waiting for {}", program))?;

    let result = CommandOutput {
        program,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    };
    if !result.success() {
        log::info!(
            "{} failed with exit code {}",
            result.program,
            result.exit_code.unwrap_or(-1)
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_for_process_death(pid: u32, timeout: Duration) -> bool {
        use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};

        let start = Instant::now();
        let nix_pid = Pid::from_raw(pid as i32);
        while start.elapsed() < timeout {
            match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, _)) | Ok(WaitStatus::Signaled(_, _, _)) => return true,
                Err(nix::errno::Errno::ECHILD) if !is_process_alive(pid) => return true,
                _ => {}
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();
        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);
        registry.unregister(1234);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_run_guarded_captures_output() {
        let out = run_guarded(Command::new("sh").args(["-c", "echo hello"]), None)
            .expect("spawn sh"); // test: sh is always present
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.ensure_success("echo").is_ok());
    }

    #[test]
    fn test_run_guarded_feeds_stdin() {
        let out = run_guarded(Command::new("cat").arg("-"), Some(b"secret"))
            .expect("spawn cat"); // test: cat is always present
        assert_eq!(out.stdout, "secret");
    }

    #[test]
    fn test_run_guarded_reports_failure() {
        let out = run_guarded(Command::new("sh").args(["-c", "echo boom >&2; exit 3"]), None)
            .expect("spawn sh"); // test: sh is always present
        assert_eq!(out.exit_code, Some(3));
        let err = out.ensure_success("mkfs").unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_run_guarded_missing_program() {
        assert!(run_guarded(&mut Command::new("/nonexistent/sgdisk"), None).is_err());
    }

    #[test]
    fn test_terminate_all_kills_real_process() {
        let child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .spawn()
            .expect("Failed to spawn sleep process"); // test: sh is always present
        let pid = child.id();

        let mut registry = ChildRegistry::default();
        registry.register(pid);
        assert!(is_process_alive(pid));

        registry.terminate_all(Duration::from_millis(500));
        assert!(wait_for_process_death(pid, Duration::from_secs(2)));
    }

    #[test]
    fn test_cleanup_initiated_flag_prevents_double_cleanup() {
        let mut registry = ChildRegistry::default();
        registry.register(12345);
        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);
        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(999999));
    }
}
