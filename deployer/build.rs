//! Build script for multideploy
//! Records the commit, build time, target and profile reported by `--version`

use chrono::Utc;
use std::env;
use std::process::Command;

fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let build_time = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=MULTIDEPLOY_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=MULTIDEPLOY_BUILD_TIME={}", build_time);
    println!("cargo:rustc-env=MULTIDEPLOY_TARGET={}", target);
    println!("cargo:rustc-env=MULTIDEPLOY_PROFILE={}", profile);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}
