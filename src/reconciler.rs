//! Stale instance cleanup
//!
//! After a run has started its instances, every pid file in the pid
//! directory that carries our prefix but was not targeted this run belongs
//! to a vhost that no longer exists. Those instances are stopped and their
//! files released.

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::terminator::{Clock, Outcome, ProcessLister, Signaller, Terminator};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Per-file results of one cleanup pass
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub outcomes: Vec<(PathBuf, Outcome)>,
}

impl CleanupReport {
    pub fn terminated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Terminated { .. }))
            .count()
    }

    /// Pid files left on disk for a later pass
    pub fn deferred(&self) -> impl Iterator<Item = &Path> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_deferred())
            .map(|(p, _)| p.as_path())
    }
}

pub struct Reconciler<'a, L, S, C> {
    config: &'a Config,
    terminator: Terminator<L, S, C>,
}

impl<'a, L: ProcessLister, S: Signaller, C: Clock> Reconciler<'a, L, S, C> {
    pub fn new(config: &'a Config, terminator: Terminator<L, S, C>) -> Self {
        Self { config, terminator }
    }

    /// Pid files in the pid directory that follow our naming convention, sorted
    pub fn owned_pid_files(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.config.pid_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %dir.display(), "Pid directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(MuxError::io(dir, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MuxError::io(dir, e))?;
            let owned = entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.config.owns_pid_file_name(name));
            if owned {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Terminate every owned pid file not in `live`
    pub fn cleanup(&self, live: &BTreeSet<PathBuf>) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        for path in self.owned_pid_files()? {
            if live.contains(&path) {
                continue;
            }
            let outcome = self.terminator.terminate(&path);
            if outcome.is_deferred() {
                warn!(path = %path.display(), ?outcome, "Pid file left for the next run");
            }
            report.outcomes.push((path, outcome));
        }
        Ok(report)
    }
}
