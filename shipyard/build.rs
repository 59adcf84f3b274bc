//! Build script for shipyard
//! Stamps the binary with the commit and build time reported by `/version`

use chrono::Utc;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
}

fn main() {
    let git_hash = git(&["rev-parse", "--short=12", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());

    let build_time = Utc::now().to_rfc3339();

    println!(
        "cargo:rustc-env=SHIPYARD_GIT_HASH={}{}",
        git_hash,
        if dirty { "-dirty" } else { "" }
    );
    println!("cargo:rustc-env=SHIPYARD_BUILD_TIME={}", build_time);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
