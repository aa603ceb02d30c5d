//! Vhost definition parsing
//!
//! A vhost file is only read for two things: the port from its `Listen`
//! line and the `ServerName`/`ServerAlias` lines that the proxy fragment
//! re-emits. Everything else is left to the server binary, which includes
//! the file as-is.

use crate::error::{MuxError, Result};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static LISTEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*listen[^0-9]*([0-9]+)").expect("valid listen pattern")
});

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*server(name|alias)\b").expect("valid server name pattern")
});

/// One parsed vhost definition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhostDescriptor {
    /// Source file, included verbatim by the spawned instance
    pub path: PathBuf,
    /// File name without the vhost suffix
    pub name: String,
    /// Port the instance listens on
    pub port: u16,
    /// `ServerName`/`ServerAlias` lines in file order
    pub directives: Vec<String>,
}

impl VhostDescriptor {
    /// Parse a vhost definition from its text
    pub fn parse(path: &Path, name: &str, content: &str) -> Result<Self> {
        let mut port = None;
        let mut directives = Vec::new();

        for line in content.lines() {
            if port.is_none() {
                if let Some(caps) = LISTEN_RE.captures(line) {
                    let digits = &caps[1];
                    let parsed = digits.parse::<u16>().map_err(|_| MuxError::Parse {
                        path: path.to_path_buf(),
                        reason: format!("port {} is out of range", digits),
                    })?;
                    port = Some(parsed);
                    continue;
                }
            }
            if NAME_RE.is_match(line) {
                directives.push(line.trim_end().to_string());
            }
        }

        let port = port.ok_or_else(|| MuxError::Parse {
            path: path.to_path_buf(),
            reason: "no Listen directive with a port".to_string(),
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            port,
            directives,
        })
    }

    /// Read and parse one vhost file
    pub fn from_file(path: &Path, suffix: &str) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MuxError::Parse {
                path: path.to_path_buf(),
                reason: "file name is not valid UTF-8".to_string(),
            })?;
        let name = file_name.strip_suffix(suffix).unwrap_or(file_name);
        // Only ASCII directives matter; stray Latin-1 comments must not fail the read
        let bytes = fs::read(path).map_err(|e| MuxError::io(path, e))?;
        Self::parse(path, name, &String::from_utf8_lossy(&bytes))
    }
}

/// Result of scanning a vhost directory
#[derive(Debug, Default)]
pub struct Scan {
    /// Descriptors sorted by file name
    pub vhosts: Vec<VhostDescriptor>,
    registry: BTreeMap<u16, PathBuf>,
}

impl Scan {
    /// Ports claimed by the scanned vhosts
    pub fn used_ports(&self) -> BTreeSet<u16> {
        self.registry.keys().copied().collect()
    }

    fn insert(&mut self, vhost: VhostDescriptor) -> Result<()> {
        if let Some(first) = self.registry.get(&vhost.port) {
            return Err(MuxError::Collision {
                port: vhost.port,
                first: first.clone(),
                second: vhost.path,
            });
        }
        self.registry.insert(vhost.port, vhost.path.clone());
        self.vhosts.push(vhost);
        Ok(())
    }
}

/// Walks a vhost directory and builds the descriptor set
pub struct VhostScanner<'a> {
    suffix: &'a str,
    skip: Option<&'a str>,
}

impl<'a> VhostScanner<'a> {
    pub fn new(suffix: &'a str) -> Self {
        Self { suffix, skip: None }
    }

    /// Ignore a file by exact name (the generated proxy fragment)
    pub fn skipping(mut self, file_name: &'a str) -> Self {
        self.skip = Some(file_name);
        self
    }

    /// Scan `dir`, failing on the first unparsable file or port collision.
    ///
    /// Descriptor paths are absolute, since the server resolves relative
    /// includes against its own root.
    pub fn scan(&self, dir: &Path) -> Result<Scan> {
        let dir = &std::path::absolute(dir).map_err(|e| MuxError::io(dir, e))?;
        let entries = fs::read_dir(dir).map_err(|e| MuxError::io(dir, e))?;

        let mut candidates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MuxError::io(dir, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.ends_with(self.suffix) || self.skip == Some(file_name) {
                continue;
            }
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            candidates.push(path);
        }
        candidates.sort();

        let mut scan = Scan::default();
        for path in candidates {
            let vhost = VhostDescriptor::from_file(&path, self.suffix)?;
            debug!(vhost = %vhost.name, port = vhost.port, "Parsed vhost definition");
            scan.insert(vhost)?;
        }
        Ok(scan)
    }
}
