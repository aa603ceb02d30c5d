//! Reverse-proxy fragment generation
//!
//! The base server instance includes the vhost directory, so the fragment
//! written here is what routes each hostname to its multiplexed instance.
//! Multiplexed instances run with the mux define set and skip every block.

use crate::config::Config;
use crate::error::{MuxError, Result};
use crate::vhost::VhostDescriptor;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// First line of every generated fragment
pub const GENERATED_MARKER: &str = "# Generated by vhostmux, do not edit.";

/// Renders proxy blocks for a set of vhosts
pub struct ProxyConfigGenerator<'a> {
    config: &'a Config,
}

impl<'a> ProxyConfigGenerator<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Proxy block for a single vhost
    pub fn render_block(&self, vhost: &VhostDescriptor) -> String {
        let mut block = format!(
            "<IfDefine !{define}>\n\
             <VirtualHost {listen}>\n    \
             ProxyPass / http://localhost:{port}/ retry=0\n    \
             ProxyPassReverse / http://localhost:{port}/\n",
            define = self.config.mux_define,
            listen = self.config.proxy_listen,
            port = vhost.port,
        );
        for directive in &vhost.directives {
            block.push_str(directive);
            block.push('\n');
        }
        block.push_str("</VirtualHost>\n</IfDefine>\n");
        block
    }

    /// Whole fragment: marker header followed by one block per vhost
    pub fn render(&self, vhosts: &[VhostDescriptor]) -> String {
        let mut out = String::from(GENERATED_MARKER);
        out.push('\n');
        out.push_str(&format!(
            "# Instances run with -D {} and skip these blocks.\n\n",
            self.config.mux_define
        ));
        let blocks: Vec<String> = vhosts.iter().map(|v| self.render_block(v)).collect();
        out.push_str(&blocks.join("\n"));
        out
    }

    /// Replace `dir/file_name` with `text`.
    ///
    /// The content goes to a temporary sibling first and is renamed over the
    /// target, so readers never see a partial file.
    pub fn persist(dir: &Path, file_name: &str, text: &str) -> Result<PathBuf> {
        let target = dir.join(file_name);
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| MuxError::io(dir, e))?;
        tmp.write_all(text.as_bytes())
            .map_err(|e| MuxError::io(tmp.path(), e))?;
        tmp.persist(&target)
            .map_err(|e| MuxError::io(&target, e.error))?;
        Ok(target)
    }
}
