// SPDX-License-Identifier: GPL-3.0-only

use std::process::Command;

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-env-changed=EDGECAM_VERSION");

    // Packagers can pin the reported version
    let version = std::env::var("EDGECAM_VERSION").unwrap_or_else(|_| build_version());

    println!("cargo::rustc-env=EDGECAM_BUILD_VERSION={}", version);
}

/// Crate version with the short commit hash appended when built from git.
fn build_version() -> String {
    let pkg_version = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());

    match short_commit_hash() {
        Some(hash) => format!("{}-{}", pkg_version, hash),
        None => pkg_version,
    }
}

fn short_commit_hash() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}
