//! Host package-management mode detection.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const ATOMIC_MARKER: &str = "run/ostree-booted";
const SYSTEMD_MARKER: &str = "run/systemd/system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageBackend {
    /// Mutable in-place package database (dnf)
    Transactional,
    /// Image-based deployments (rpm-ostree)
    Atomic,
}

impl std::fmt::Display for PackageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageBackend::Transactional => write!(f, "transactional"),
            PackageBackend::Atomic => write!(f, "atomic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitSystem {
    Systemd,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMode {
    pub package_backend: PackageBackend,
    pub is_atomic: bool,
    pub desktop: Option<String>,
    pub init: InitSystem,
    /// A snapshot tool is usable before high-risk changes
    pub checkpoint_available: bool,
}

impl SystemMode {
    pub fn transactional() -> Self {
        Self {
            package_backend: PackageBackend::Transactional,
            is_atomic: false,
            desktop: None,
            init: InitSystem::Systemd,
            checkpoint_available: false,
        }
    }

    pub fn atomic() -> Self {
        Self {
            package_backend: PackageBackend::Atomic,
            is_atomic: true,
            ..Self::transactional()
        }
    }

    pub fn with_checkpoint(mut self, available: bool) -> Self {
        self.checkpoint_available = available;
        self
    }
}

/// Probes the filesystem for the atomic-deployment marker and package tools.
///
/// Side-effect free; never touches the network.
#[derive(Debug, Clone)]
pub struct SystemModeDetector {
    root: PathBuf,
    search_path: Vec<PathBuf>,
    desktop: Option<String>,
}

impl Default for SystemModeDetector {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
            search_path: ["/usr/bin", "/usr/sbin", "/bin", "/sbin"]
                .iter()
                .map(PathBuf::from)
                .collect(),
            desktop: std::env::var("XDG_CURRENT_DESKTOP").ok(),
        }
    }
}

impl SystemModeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe below `root` instead of `/`, with tools searched in `search_path`
    pub fn with_root(root: impl Into<PathBuf>, search_path: Vec<PathBuf>) -> Self {
        Self {
            root: root.into(),
            search_path,
            desktop: None,
        }
    }

    fn has_binary(&self, name: &str) -> bool {
        self.search_path.iter().any(|dir| is_file(&dir.join(name)))
    }

    pub fn detect(&self) -> SystemMode {
        let marker = self.root.join(ATOMIC_MARKER).exists();
        let rpm_ostree = self.has_binary("rpm-ostree");
        let dnf = self.has_binary("dnf") || self.has_binary("dnf5");
        let snapper = self.has_binary("snapper");

        debug!(marker, rpm_ostree, dnf, snapper, "System mode probe");

        let package_backend = match (marker, rpm_ostree, dnf) {
            (true, true, _) => PackageBackend::Atomic,
            (false, _, true) => PackageBackend::Transactional,
            _ => {
                warn!(
                    marker,
                    rpm_ostree,
                    dnf,
                    "Ambiguous package backend, assuming transactional"
                );
                PackageBackend::Transactional
            }
        };
        let is_atomic = package_backend == PackageBackend::Atomic;

        let init = if self.root.join(SYSTEMD_MARKER).is_dir() {
            InitSystem::Systemd
        } else {
            InitSystem::Unknown
        };

        let mode = SystemMode {
            package_backend,
            is_atomic,
            desktop: self.desktop.clone(),
            init,
            checkpoint_available: !is_atomic && snapper,
        };
        info!(backend = %mode.package_backend, checkpoint = mode.checkpoint_available, "System mode detected");
        mode
    }
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

/// Process-wide detection result, probed once and refreshed on request
#[derive(Debug, Clone)]
pub struct SystemModeCache {
    detector: SystemModeDetector,
    cached: Arc<Mutex<Option<SystemMode>>>,
}

impl SystemModeCache {
    pub fn new(detector: SystemModeDetector) -> Self {
        Self {
            detector,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// A cache pre-seeded with `mode`; `refresh` still probes the host
    pub fn with_mode(detector: SystemModeDetector, mode: SystemMode) -> Self {
        Self {
            detector,
            cached: Arc::new(Mutex::new(Some(mode))),
        }
    }

    pub async fn current(&self) -> SystemMode {
        // Held across the probe so concurrent cold callers wait for one detection
        let mut cached = self.cached.lock().await;
        if let Some(mode) = cached.as_ref() {
            return mode.clone();
        }
        let mode = self.detector.detect();
        *cached = Some(mode.clone());
        mode
    }

    /// Re-detect, e.g. after the host was rebased
    pub async fn refresh(&self) -> SystemMode {
        let mut cached = self.cached.lock().await;
        let mode = self.detector.detect();
        *cached = Some(mode.clone());
        mode
    }
}
