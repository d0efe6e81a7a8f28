//! Per-host configuration lookup.
//!
//! Each target device may have its own directory of configuration, e.g. the
//! self-signed certificate it serves:
//!
//! - Unix: `~/.config/otapush/hosts/<hostname>/cert.pem`
//! - Windows: `%APPDATA%\otapush\otapush\config\hosts\<hostname>\cert.pem`

use std::path::{Path, PathBuf};

/// File name of a target's certificate inside its host directory.
pub const CERT_FILE_NAME: &str = "cert.pem";

/// Resolves a hostname to the directory holding that host's configuration.
///
/// Implementations only compute the path; the directory does not have to
/// exist.
pub trait HostConfigLookup: Send + Sync {
    /// Directory for `host`, or `None` when no configuration root is known.
    fn host_config_dir(&self, host: &str) -> Option<PathBuf>;
}

/// Host directories below a configuration root, as `<root>/hosts/<host>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDir {
    root: PathBuf,
}

impl ConfigDir {
    /// Use an explicit configuration root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The platform configuration directory for otapush.
    pub fn platform() -> Option<Self> {
        directories::ProjectDirs::from("org", "otapush", "otapush")
            .map(|dirs| Self::new(dirs.config_dir()))
    }

    /// The configuration root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl HostConfigLookup for ConfigDir {
    fn host_config_dir(&self, host: &str) -> Option<PathBuf> {
        // Hosts end up as a single path component.
        if host.is_empty() || host.contains(['/', '\\']) || host == "." || host == ".." {
            return None;
        }
        Some(self.root.join("hosts").join(host))
    }
}
