//! Process supervision for vhostmux
//!
//! Launches one server instance per vhost and remembers which pid files it
//! pointed them at. The server writes the pid file itself; vhostmux only
//! chooses the path.

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::vhost::VhostDescriptor;
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use tracing::{info, warn};

/// A vhost instance that started cleanly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnResult {
    pub vhost: String,
    pub pid_file: PathBuf,
    pub exit_code: i32,
}

/// Spawns server instances and tracks this run's pid files
pub struct Supervisor<'a> {
    config: &'a Config,
    live: BTreeSet<PathBuf>,
}

impl<'a> Supervisor<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            live: BTreeSet::new(),
        }
    }

    /// Full argv for one vhost instance.
    ///
    /// Extra arguments go last so they override the generated directives.
    /// Paths are quoted so directories with spaces stay one directive argument.
    pub fn build_command_line(
        &self,
        vhost: &VhostDescriptor,
        extra_args: &[String],
    ) -> Vec<OsString> {
        let pid_file = self.config.pid_file_path(&vhost.name, vhost.port);

        let mut argv: Vec<OsString> = vec![
            self.config.server_binary.clone().into(),
            "-D".into(),
            self.config.mux_define.clone().into(),
            "-C".into(),
            format!("User {}", self.config.user).into(),
            "-C".into(),
            format!("Group {}", self.config.group).into(),
            "-C".into(),
            format!("Include \"{}\"", vhost.path.display()).into(),
            "-C".into(),
            format!("PidFile \"{}\"", pid_file.display()).into(),
        ];
        argv.extend(extra_args.iter().map(OsString::from));
        argv
    }

    /// Start the instance for `vhost` and wait for its setup to finish.
    ///
    /// The pid file path joins the live set even when the start fails, since
    /// a failing instance may still have written it.
    pub fn spawn(
        &mut self,
        vhost: &VhostDescriptor,
        extra_args: &[String],
    ) -> Result<SpawnResult> {
        let pid_file = self.config.pid_file_path(&vhost.name, vhost.port);
        self.live.insert(pid_file.clone());

        let argv = self.build_command_line(vhost, extra_args);
        let failure = |reason: String| MuxError::SpawnFailure {
            vhost: vhost.name.clone(),
            reason,
        };
        let status = run(&argv).map_err(|e| failure(e.to_string()))?;
        if !status.success() {
            return Err(failure(describe_failure(status)));
        }

        info!(
            vhost = %vhost.name,
            port = vhost.port,
            pid_file = %pid_file.display(),
            "Instance started"
        );
        Ok(SpawnResult {
            vhost: vhost.name.clone(),
            pid_file,
            exit_code: status.code().unwrap_or_default(),
        })
    }

    /// Start the base instance that serves the generated proxy blocks.
    ///
    /// Returns the instance's exit code.
    pub fn spawn_base(&self, extra_args: &[String]) -> Result<i32> {
        let mut argv: Vec<OsString> = vec![self.config.server_binary.clone().into()];
        argv.extend(extra_args.iter().map(OsString::from));

        let status = run(&argv).map_err(|e| MuxError::SpawnFailure {
            vhost: "base".to_string(),
            reason: e.to_string(),
        })?;
        if !status.success() {
            warn!(reason = %describe_failure(status), "Base instance failed");
        }
        Ok(status.code().unwrap_or(1))
    }

    /// Pid files targeted so far in this run
    pub fn live_set(&self) -> &BTreeSet<PathBuf> {
        &self.live
    }
}

/// Render an argv the way a shell would accept it
pub fn display_command_line(argv: &[OsString]) -> String {
    shell_words::join(argv.iter().map(|arg| arg.to_string_lossy().into_owned()))
}

fn run(argv: &[OsString]) -> io::Result<ExitStatus> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"));
    };

    println!("{}", display_command_line(argv));

    Command::new(program).args(args).status().map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("cannot execute {}: {}", program.to_string_lossy(), e),
        )
    })
}

fn describe_failure(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exited with status {}", code),
        None => "terminated by a signal".to_string(),
    }
}
