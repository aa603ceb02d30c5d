//! Run orchestration for vhostmux
//!
//! One invocation either suggests a free port or performs a full run:
//! scan, regenerate the proxy fragment, start every instance, clean up
//! stale ones, then start the base instance.

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::ports::next_free_port;
use crate::proxy::ProxyConfigGenerator;
use crate::reconciler::{CleanupReport, Reconciler};
use crate::supervisor::{SpawnResult, Supervisor};
use crate::terminator::{Clock, Kill, Pidof, ProcessLister, Signaller, SystemClock, Terminator};
use crate::vhost::{Scan, VhostScanner};
use tracing::{error, info};

/// What a full run did
#[derive(Debug, Default)]
pub struct RunReport {
    /// Instances that started cleanly
    pub spawned: Vec<SpawnResult>,
    /// Per-vhost start failures; none of them stopped the run
    pub failures: Vec<MuxError>,
    pub cleanup: CleanupReport,
    /// Exit code of the base instance, which becomes the tool's exit code
    pub base_exit_code: i32,
}

/// Coordinates scanner, supervisor, proxy generator and reconciler
pub struct Multiplexer<'a, L = Pidof, S = Kill, C = SystemClock> {
    config: &'a Config,
    reconciler: Reconciler<'a, L, S, C>,
}

impl<'a> Multiplexer<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self::with_terminator(config, Terminator::system(config))
    }
}

impl<'a, L: ProcessLister, S: Signaller, C: Clock> Multiplexer<'a, L, S, C> {
    pub fn with_terminator(config: &'a Config, terminator: Terminator<L, S, C>) -> Self {
        Self {
            config,
            reconciler: Reconciler::new(config, terminator),
        }
    }

    /// Scan the vhost directory; parse errors and collisions are fatal
    pub fn scan(&self) -> Result<Scan> {
        VhostScanner::new(&self.config.suffix)
            .skipping(&self.config.proxy_file)
            .scan(&self.config.vhost_dir)
    }

    /// Next port a new vhost file could use. Touches nothing.
    pub fn suggest(&self) -> Result<u16> {
        let scan = self.scan()?;
        next_free_port(&scan.used_ports(), self.config.base_port).ok_or_else(|| {
            MuxError::Config(format!("no free port at or above {}", self.config.base_port))
        })
    }

    /// Full run, forwarding `extra_args` to every instance.
    ///
    /// Only scan and proxy-file errors abort. Spawn and cleanup problems are
    /// logged and collected in the report.
    pub fn run(&self, extra_args: &[String]) -> Result<RunReport> {
        let scan = self.scan()?;
        info!(
            vhosts = scan.vhosts.len(),
            dir = %self.config.vhost_dir.display(),
            "Scanned vhost definitions"
        );

        let text = ProxyConfigGenerator::new(self.config).render(&scan.vhosts);
        let proxy_path =
            ProxyConfigGenerator::persist(&self.config.vhost_dir, &self.config.proxy_file, &text)?;
        info!(path = %proxy_path.display(), "Proxy configuration written");

        let mut report = RunReport::default();
        let mut supervisor = Supervisor::new(self.config);
        for vhost in &scan.vhosts {
            match supervisor.spawn(vhost, extra_args) {
                Ok(spawned) => report.spawned.push(spawned),
                Err(e) => {
                    error!(
                        vhost = %vhost.name,
                        port = vhost.port,
                        error = %e,
                        "Instance failed to start"
                    );
                    report.failures.push(e);
                }
            }
        }

        report.cleanup = match self.reconciler.cleanup(supervisor.live_set()) {
            Ok(cleanup) => cleanup,
            Err(e) => {
                error!(error = %e, "Cleanup pass failed");
                CleanupReport::default()
            }
        };
        info!(
            terminated = report.cleanup.terminated(),
            examined = report.cleanup.outcomes.len(),
            "Cleanup finished"
        );

        report.base_exit_code = match supervisor.spawn_base(extra_args) {
            Ok(code) => code,
            Err(e) => {
                error!(error = %e, "Base instance failed to start");
                report.failures.push(e);
                1
            }
        };
        Ok(report)
    }
}
