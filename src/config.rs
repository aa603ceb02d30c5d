//! Configuration management for vhostmux
//!
//! Every path, name and timing the engine uses lives here and is handed to
//! each component at construction. Defaults describe a stock Apache layout.

use crate::error::{MuxError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-user config file looked up when no path is given
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Runtime configuration for one vhostmux invocation
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding the vhost definition files
    pub vhost_dir: PathBuf,
    /// Only files ending in this suffix are treated as vhost definitions
    pub suffix: String,
    /// Directory where the server writes pid files
    pub pid_dir: PathBuf,
    /// Prefix of every pid file this tool owns
    pub identifier: String,
    /// Web-server binary spawned once per vhost
    pub server_binary: PathBuf,
    /// Run-as user passed to each instance
    pub user: String,
    /// Run-as group passed to each instance
    pub group: String,
    /// Define set on multiplexed instances so they skip the proxy blocks
    pub mux_define: String,
    /// File name of the generated proxy fragment inside `vhost_dir`
    pub proxy_file: String,
    /// Address the generated proxy virtual hosts bind to
    pub proxy_listen: String,
    /// First port offered in suggest mode
    pub base_port: u16,
    /// Poll iterations (one second apart) before escalating to SIGKILL
    pub max_wait_secs: u64,
    /// Pause after SIGTERM before the first poll, in milliseconds
    pub grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vhost_dir: PathBuf::from("/etc/apache2/vhosts.d"),
            suffix: ".vhost".to_string(),
            pid_dir: PathBuf::from("/var/run/apache2"),
            identifier: "vhostmux".to_string(),
            server_binary: PathBuf::from("/usr/sbin/apache2"),
            user: "www-data".to_string(),
            group: "www-data".to_string(),
            mux_define: "MULTIPLEX".to_string(),
            proxy_file: "000-vhostmux-proxy.conf".to_string(),
            proxy_listen: "*:80".to_string(),
            base_port: 9000,
            max_wait_secs: 10,
            grace_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the per-user file under the
    /// platform config directory is used when present, defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        config.resolve_dirs()?;
        Ok(config)
    }

    /// Make the vhost and pid directories absolute.
    ///
    /// Both end up in server directives, and the server resolves relative
    /// paths against its own root rather than our working directory.
    pub fn resolve_dirs(&mut self) -> Result<()> {
        for dir in [&mut self.vhost_dir, &mut self.pid_dir] {
            let resolved = std::path::absolute(&*dir).map_err(|e| MuxError::io(&*dir, e))?;
            *dir = resolved;
        }
        Ok(())
    }

    /// Read a JSON config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| MuxError::io(path, e))?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Per-user config location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("vhostmux").join(CONFIG_FILE_NAME))
    }

    fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(MuxError::Config("identifier must not be empty".to_string()));
        }
        if self.identifier.contains('/') {
            return Err(MuxError::Config(format!(
                "identifier '{}' must not contain '/'",
                self.identifier
            )));
        }
        if self.suffix.is_empty() {
            return Err(MuxError::Config("suffix must not be empty".to_string()));
        }
        if self.proxy_file.ends_with(&self.suffix) {
            tracing::warn!(
                proxy_file = %self.proxy_file,
                suffix = %self.suffix,
                "proxy file carries the vhost suffix; it is skipped by name when scanning"
            );
        }
        Ok(())
    }

    /// Pid file path for one vhost instance
    pub fn pid_file_path(&self, vhost_name: &str, port: u16) -> PathBuf {
        self.pid_dir
            .join(format!("{}-{}-{}.pid", self.identifier, vhost_name, port))
    }

    /// Whether a file name follows this tool's pid file convention
    pub fn owns_pid_file_name(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(&self.identifier)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|rest| rest.ends_with(".pid"))
    }

    /// Full path of the generated proxy fragment
    pub fn proxy_file_path(&self) -> PathBuf {
        self.vhost_dir.join(&self.proxy_file)
    }

    pub fn grace_interval(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_path_follows_naming_convention() {
        let config = Config {
            pid_dir: PathBuf::from("/run/test"),
            ..Config::default()
        };
        assert_eq!(
            config.pid_file_path("shop", 9001),
            PathBuf::from("/run/test/vhostmux-shop-9001.pid")
        );
    }

    #[test]
    fn owns_only_prefixed_pid_files() {
        let config = Config::default();
        assert!(config.owns_pid_file_name("vhostmux-shop-9001.pid"));
        assert!(!config.owns_pid_file_name("vhostmux-shop-9001.pid.bak"));
        assert!(!config.owns_pid_file_name("apache2.pid"));
        assert!(!config.owns_pid_file_name("vhostmuxer-shop-9001.pid"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "identifier": "mux", "base_port": 8100 }"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.identifier, "mux");
        assert_eq!(config.base_port, 8100);
        assert_eq!(config.suffix, ".vhost");
        assert_eq!(config.max_wait_secs, 10);
    }

    #[test]
    fn relative_dirs_are_made_absolute() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "vhost_dir": "vhosts.d", "pid_dir": "run" }"#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.vhost_dir, cwd.join("vhosts.d"));
        assert_eq!(config.pid_dir, cwd.join("run"));
        assert!(config.pid_file_path("a", 9001).starts_with(cwd.join("run")));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, MuxError::Io { .. }));
    }

    #[test]
    fn rejects_identifier_with_slash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "identifier": "a/b" }"#).unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(MuxError::Config(_))
        ));
    }
}
