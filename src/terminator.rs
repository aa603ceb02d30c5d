//! Process termination for vhostmux
//!
//! Stops the server instance behind a pid file: SIGTERM, a grace pause,
//! one-second polls, then SIGKILL. Liveness is always checked against the
//! set of processes actually running the server binary, never against the
//! pid file alone.

use crate::config::Config;
use crate::error::{MuxError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay between liveness polls
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Signals the terminator sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

/// Lists the pids currently running a given binary
pub trait ProcessLister {
    fn running_instances(&self, binary: &Path) -> io::Result<BTreeSet<u32>>;
}

/// Delivers signals to processes
pub trait Signaller {
    fn send(&self, pid: u32, signal: Signal) -> io::Result<()>;
}

/// Source of blocking waits
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

/// `pidof`-backed process lister
#[derive(Debug, Default, Clone, Copy)]
pub struct Pidof;

impl ProcessLister for Pidof {
    fn running_instances(&self, binary: &Path) -> io::Result<BTreeSet<u32>> {
        let output = Command::new("pidof").arg(binary).output()?;
        // pidof exits 1 when nothing matches
        match output.status.code() {
            Some(0) | Some(1) => {}
            _ => {
                return Err(io::Error::other(format!(
                    "pidof {} failed: {}",
                    binary.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .filter_map(|pid| pid.parse().ok())
            .collect())
    }
}

/// Signals delivered with `kill(2)`
#[derive(Debug, Default, Clone, Copy)]
pub struct Kill;

impl Signaller for Kill {
    fn send(&self, pid: u32, signal: Signal) -> io::Result<()> {
        #[cfg(unix)]
        {
            use libc::{SIGKILL, SIGTERM, kill};

            let pid = i32::try_from(pid)
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
            let signo = match signal {
                Signal::Terminate => SIGTERM,
                Signal::Kill => SIGKILL,
            };
            if unsafe { kill(pid, signo) } != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            let _ = (pid, signal);
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "signals are only supported on Unix",
            ))
        }
    }
}

/// Wall-clock sleeps
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Where a pid file's process is in its shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationState {
    Running,
    TerminatingGraceful,
    TerminatingForced,
    Gone,
}

/// What `terminate` did with one pid file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The file could not be read or held no pid; left for the next run
    Unreadable { reason: String },
    /// Liveness could not be established; left for the next run
    Unverified { pid: u32, reason: String },
    /// The process was not running; `released` tells whether the file is gone
    AlreadyStopped { pid: u32, released: bool },
    /// The process was signalled; `released` tells whether the file is gone
    Terminated {
        pid: u32,
        forced: bool,
        released: bool,
    },
}

impl Outcome {
    /// Whether the pid file was left on disk for a later pass
    pub fn is_deferred(&self) -> bool {
        matches!(self, Outcome::Unreadable { .. } | Outcome::Unverified { .. })
    }
}

/// Read the pid stored in a pid file
pub fn read_pid(path: &Path) -> Result<u32> {
    let content = fs::read_to_string(path).map_err(|e| MuxError::PidFileUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    content
        .trim()
        .parse()
        .map_err(|_| MuxError::PidFileUnreadable {
            path: path.to_path_buf(),
            reason: format!("'{}' is not a pid", content.trim()),
        })
}

/// Remove a pid file, tolerating its absence.
///
/// Returns `false` only when the file exists and could not be removed.
pub fn release(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove pid file");
            false
        }
    }
}

/// Graceful-then-forceful terminator for server instances
pub struct Terminator<L = Pidof, S = Kill, C = SystemClock> {
    binary: PathBuf,
    grace: Duration,
    max_wait: u64,
    lister: L,
    signaller: S,
    clock: C,
}

impl Terminator {
    /// Terminator backed by `pidof`, `kill(2)` and real sleeps
    pub fn system(config: &Config) -> Self {
        Self::new(config, Pidof, Kill, SystemClock)
    }
}

impl<L: ProcessLister, S: Signaller, C: Clock> Terminator<L, S, C> {
    pub fn new(config: &Config, lister: L, signaller: S, clock: C) -> Self {
        Self {
            binary: config.server_binary.clone(),
            grace: config.grace_interval(),
            max_wait: config.max_wait_secs,
            lister,
            signaller,
            clock,
        }
    }

    /// Stop the process recorded in `pid_file` and release the file
    pub fn terminate(&self, pid_file: &Path) -> Outcome {
        let pid = match read_pid(pid_file) {
            Ok(pid) => pid,
            Err(e) => {
                warn!(error = %e, "Skipping pid file");
                let reason = match e {
                    MuxError::PidFileUnreadable { reason, .. } => reason,
                    other => other.to_string(),
                };
                return Outcome::Unreadable { reason };
            }
        };

        let mut state = match self.lister.running_instances(&self.binary) {
            Ok(pids) if pids.contains(&pid) => TerminationState::Running,
            Ok(_) => TerminationState::Gone,
            Err(e) => {
                warn!(pid, path = %pid_file.display(), error = %e, "Cannot list running instances");
                return Outcome::Unverified {
                    pid,
                    reason: e.to_string(),
                };
            }
        };
        let was_running = state == TerminationState::Running;

        let mut polls = 0;
        let mut forced = false;
        while state != TerminationState::Gone {
            let next = self.step(pid, state, &mut polls);
            if next == TerminationState::TerminatingForced {
                forced = true;
            }
            debug!(pid, from = ?state, to = ?next, "Termination step");
            state = next;
        }

        let released = release(pid_file);
        if was_running {
            info!(pid, forced, released, path = %pid_file.display(), "Terminated stale instance");
            Outcome::Terminated {
                pid,
                forced,
                released,
            }
        } else {
            info!(pid, released, path = %pid_file.display(), "Instance already stopped");
            Outcome::AlreadyStopped { pid, released }
        }
    }

    /// Advance the state machine by one transition
    pub fn step(&self, pid: u32, state: TerminationState, polls: &mut u64) -> TerminationState {
        match state {
            TerminationState::Running => {
                self.signal(pid, Signal::Terminate);
                self.clock.sleep(self.grace);
                TerminationState::TerminatingGraceful
            }
            TerminationState::TerminatingGraceful => {
                if !self.is_running(pid) {
                    TerminationState::Gone
                } else if *polls < self.max_wait {
                    *polls += 1;
                    self.clock.sleep(POLL_INTERVAL);
                    TerminationState::TerminatingGraceful
                } else {
                    TerminationState::TerminatingForced
                }
            }
            TerminationState::TerminatingForced => {
                warn!(
                    pid,
                    waited_secs = self.max_wait,
                    "Instance ignored SIGTERM, sending SIGKILL"
                );
                self.signal(pid, Signal::Kill);
                TerminationState::Gone
            }
            TerminationState::Gone => TerminationState::Gone,
        }
    }

    // A failed listing counts as still running so escalation proceeds.
    fn is_running(&self, pid: u32) -> bool {
        match self.lister.running_instances(&self.binary) {
            Ok(pids) => pids.contains(&pid),
            Err(e) => {
                warn!(pid, error = %e, "Cannot list running instances");
                true
            }
        }
    }

    fn signal(&self, pid: u32, signal: Signal) {
        if let Err(e) = self.signaller.send(pid, signal) {
            warn!(pid, ?signal, error = %e, "Failed to send signal");
        }
    }
}
