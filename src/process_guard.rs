//! Process lifecycle management for npm child processes
//!
//! npm runs in its own process group with a parent-death signal, and every
//! running npm PID is tracked in a global registry. When install-ci receives
//! SIGINT, SIGTERM or SIGHUP (a CI job being cancelled), the tracked npm
//! process trees are terminated and the pending registry restore hook runs
//! before exiting, so a cancelled job does not leave npm pointed at the
//! snapshot registry.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Global registry of child process IDs
static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Work to undo the registry override if the process is interrupted.
pub type RestoreHook = Box<dyn FnOnce() + Send>;

/// At most one armed restore hook; whoever takes it runs it.
static RESTORE_HOOK: Mutex<Option<RestoreHook>> = Mutex::new(None);

/// Set by the signal thread before it starts cleaning up
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

/// Grace period between SIGTERM and SIGKILL on normal shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Grace period when reacting to a signal
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

/// Registry tracking all spawned child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    /// Set of child PIDs currently running
    pids: HashSet<u32>,
    /// Whether cleanup has already been initiated (prevent double-cleanup)
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Lock the global registry, recovering it if a holder panicked.
    pub fn lock_global() -> MutexGuard<'static, ChildRegistry> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new child process
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered child process PID {}", pid);
    }

    /// Unregister a child process (called when it exits normally)
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered child process PID {}", pid);
    }

    /// Get count of tracked children
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Whether `terminate_all` has run; no new children may start after it.
    pub fn is_shutting_down(&self) -> bool {
        self.cleanup_initiated
    }

    /// Spawn `cmd` and track its PID in one step.
    ///
    /// Returns `Ok(None)` without spawning once cleanup has begun. Holding the
    /// registry lock across the spawn means `terminate_all` either sees the new
    /// PID or runs before the spawn is attempted.
    pub fn spawn_tracked(&mut self, cmd: &mut Command) -> std::io::Result<Option<Child>> {
        if self.cleanup_initiated {
            debug!("Cleanup in progress, refusing to spawn {:?}", cmd.get_program());
            return Ok(None);
        }
        let child = cmd.spawn()?;
        self.register(child.id());
        Ok(Some(child))
    }

    /// Terminate all tracked child processes
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            debug!("No child processes to terminate");
            return;
        }

        info!("Terminating {} npm process(es)...", self.pids.len());

        // Signal whole groups so npm's own children (node-gyp, lifecycle scripts) go too
        let pids_to_kill: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids_to_kill {
            if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
                if let Err(e2) = send_signal(pid, Signal::SIGTERM) {
                    warn!("Failed to send SIGTERM to PID {}: {}", pid, e2);
                }
            }
        }

        let start = Instant::now();
        while start.elapsed() < grace_period {
            if !pids_to_kill.iter().any(|&pid| is_process_alive(pid)) {
                info!("All npm processes terminated gracefully");
                self.pids.clear();
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        for &pid in &pids_to_kill {
            if is_process_alive(pid) {
                warn!("Process group {} did not terminate, sending SIGKILL", pid);
                if send_signal_to_group(pid, Signal::SIGKILL).is_err() {
                    let _ = send_signal(pid, Signal::SIGKILL);
                }
            }
        }

        self.pids.clear();
        info!("Child process cleanup complete");
    }
}

/// Send a signal to a process
fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Send a signal to an entire process group (negative PID)
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state; Z and X are not alive
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// Install the hook that undoes the registry override on interruption.
/// Replaces any previously armed hook.
pub fn arm_restore_hook(hook: RestoreHook) {
    if let Ok(mut slot) = RESTORE_HOOK.lock() {
        *slot = Some(hook);
    }
}

/// Take the armed hook without running it.
pub fn disarm_restore_hook() -> Option<RestoreHook> {
    RESTORE_HOOK.lock().ok().and_then(|mut slot| slot.take())
}

/// Serializes tests that use the global restore hook slot
#[cfg(test)]
pub(crate) static RESTORE_HOOK_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Run the armed hook, if any. Returns whether one ran.
pub fn run_restore_hook() -> bool {
    match disarm_restore_hook() {
        Some(hook) => {
            hook();
            true
        }
        None => false,
    }
}

/// Block forever if a signal is being handled.
///
/// The signal thread exits the process once npm children are gone and the
/// registry is restored; the main thread must not exit underneath it.
pub fn await_signal_exit() {
    if SIGNAL_RECEIVED.load(Ordering::SeqCst) {
        debug!("Signal cleanup in progress, waiting for it to exit");
        loop {
            std::thread::park();
        }
    }
}

/// RAII guard that terminates all npm children on drop
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    /// Create a new process guard attached to the global registry
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    /// Get the number of tracked children
    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(SHUTDOWN_GRACE);
        }
    }
}

/// Initialize global signal handlers for SIGINT, SIGTERM and SIGHUP.
/// Call this once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
            info!("Received {} signal, cleaning up...", signal_name);

            ChildRegistry::lock_global().terminate_all(SIGNAL_GRACE);

            if run_restore_hook() {
                info!("Registry configuration restored after {}", signal_name);
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Configure the command to run in its own process group
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only calls async-signal-safe setpgid and prctl
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // npm must not outlive install-ci
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}
