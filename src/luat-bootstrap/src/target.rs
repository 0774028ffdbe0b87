//! Platform target resolution.
//!
//! Maps an operating system and CPU architecture to the target triple used
//! in release asset names. Only the combinations luat-lsp is published for
//! resolve; everything else is reported as unsupported.

use std::fmt;

use crate::error::{BootstrapError, Result};

/// Published (os, arch) -> triple combinations.
///
/// OS and arch names follow `std::env::consts::{OS, ARCH}`.
const TARGETS: &[(&str, &str, &str)] = &[
    ("macos", "x86_64", "x86_64-apple-darwin"),
    ("macos", "aarch64", "aarch64-apple-darwin"),
    ("linux", "x86_64", "x86_64-unknown-linux-gnu"),
    ("linux", "aarch64", "aarch64-unknown-linux-gnu"),
    ("windows", "x86_64", "x86_64-pc-windows-msvc"),
];

/// A resolved release target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlatformTarget {
    os: &'static str,
    arch: &'static str,
    triple: &'static str,
}

impl PlatformTarget {
    /// Resolve the target for the platform this process runs on.
    pub fn current() -> Result<Self> {
        resolve(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Get the operating system name.
    pub fn os(&self) -> &'static str {
        self.os
    }

    /// Get the architecture name.
    pub fn arch(&self) -> &'static str {
        self.arch
    }

    /// Get the target triple.
    pub fn triple(&self) -> &'static str {
        self.triple
    }

    /// Whether this target is the Windows-like platform.
    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    /// Name of the server executable on this target.
    pub fn binary_file_name(&self) -> &'static str {
        crate::binary_file_name(self.is_windows())
    }
}

impl fmt::Display for PlatformTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.triple)
    }
}

/// Resolve an (os, arch) pair to its release target.
///
/// Unmapped pairs yield [`BootstrapError::UnsupportedPlatform`]; there is
/// no fallback guess.
pub fn resolve(os: &str, arch: &str) -> Result<PlatformTarget> {
    TARGETS
        .iter()
        .find(|(o, a, _)| *o == os && *a == arch)
        .map(|&(os, arch, triple)| PlatformTarget { os, arch, triple })
        .ok_or_else(|| BootstrapError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
}
