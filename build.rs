use std::env;
use std::fs;
use std::process::Command;

fn git_output(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                String::from_utf8(output.stdout).ok()
            } else {
                None
            }
        })
        .unwrap_or_else(|| "unknown".to_string())
        .trim()
        .to_string()
}

fn main() {
    // VERSION file wins over the Cargo.toml version
    let version = fs::read_to_string("VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".to_string()))
        .trim()
        .to_string();

    let git_hash = git_output(&["rev-parse", "--short", "HEAD"]);

    let git_dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .map(|output| !output.stdout.is_empty())
        .unwrap_or(false);

    let build_date = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=TRACKER_VERSION={}", version);
    println!("cargo:rustc-env=TRACKER_GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=TRACKER_GIT_DIRTY={}", git_dirty);
    println!("cargo:rustc-env=TRACKER_BUILD_DATE={}", build_date);
    println!("cargo:rustc-env=TRACKER_BUILD_PROFILE={}", profile);

    println!("cargo:rerun-if-changed=VERSION");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
