//! Utility functions

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::models::provider::ProviderStatus;

/// Version information for the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("SHIPYARD_GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("SHIPYARD_BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Plain-text table of provider tooling, one row per provider
pub fn status_table(statuses: &[ProviderStatus]) -> Vec<String> {
    let mut rows = vec![format!(
        "{:<10} {:<10} {:<14} {}",
        "PROVIDER", "INSTALLED", "AUTHENTICATED", "VERSION"
    )];
    for status in statuses {
        rows.push(format!(
            "{:<10} {:<10} {:<14} {}",
            status.provider.as_str(),
            yes_no(status.installed),
            yes_no(status.authenticated),
            status.version.as_deref().unwrap_or("-"),
        ));
    }
    rows
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Print the provider table with usable providers highlighted
pub fn print_diagnostic(statuses: &[ProviderStatus]) {
    let rows = status_table(statuses);
    if let Some(header) = rows.first() {
        println!("{}", header.bold());
    }
    for (row, status) in rows.iter().skip(1).zip(statuses) {
        if status.is_usable() {
            println!("{}", row.green());
        } else if status.installed {
            println!("{}", row.yellow());
        } else {
            println!("{}", row.red());
        }
    }

    let usable = statuses.iter().filter(|s| s.is_usable()).count();
    if usable == 0 {
        println!("{}", "No provider is installed and authenticated".red().bold());
    }
}
