//! Hosting provider identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ControlError;

/// The closed set of hosting providers Shipyard can deploy to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Railway,
    Fly,
    Vercel,
}

impl ProviderKind {
    /// Autodetection order, highest priority first
    pub const PRIORITY: [ProviderKind; 3] =
        [ProviderKind::Railway, ProviderKind::Fly, ProviderKind::Vercel];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Railway => "railway",
            ProviderKind::Fly => "fly",
            ProviderKind::Vercel => "vercel",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "railway" => Ok(ProviderKind::Railway),
            "fly" | "fly.io" | "flyio" => Ok(ProviderKind::Fly),
            "vercel" => Ok(ProviderKind::Vercel),
            other => Err(ControlError::ValidationError(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// Point-in-time view of a provider's local tooling. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderKind,
    pub installed: bool,
    pub authenticated: bool,
    pub version: Option<String>,
}

impl ProviderStatus {
    pub fn missing(provider: ProviderKind) -> Self {
        Self {
            provider,
            installed: false,
            authenticated: false,
            version: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.installed && self.authenticated
    }
}
