//! Launch profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the server process is launched.
///
/// Only the debug profile turns on the server's debug logging; the default
/// profile passes no extra environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchProfile {
    #[default]
    Default,
    Debug,
}

impl LaunchProfile {
    /// Extra environment for the server process.
    pub fn env(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Default => &[],
            Self::Debug => &[("RUST_LOG", "luat_lsp=debug")],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for LaunchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown launch profile: {}", other)),
        }
    }
}
