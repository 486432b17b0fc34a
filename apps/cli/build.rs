use std::path::Path;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
}

/// Short revision, suffixed `-dirty` when tracked files have local edits.
fn revision() -> String {
    let Some(sha) = git(&["rev-parse", "--short=12", "HEAD"]).filter(|s| !s.is_empty()) else {
        return "unknown".to_string();
    };
    match git(&["status", "--porcelain", "--untracked-files=no"]) {
        Some(changes) if !changes.is_empty() => format!("{sha}-dirty"),
        _ => sha,
    }
}

/// Commit date, or `SOURCE_DATE_EPOCH` for reproducible builds outside a checkout.
fn build_date() -> String {
    if let Some(date) = git(&["show", "-s", "--format=%cI", "HEAD"]).filter(|s| !s.is_empty()) {
        return date;
    }
    if let Ok(epoch) = std::env::var("SOURCE_DATE_EPOCH") {
        return format!("@{epoch}");
    }
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => format!("@{}", d.as_secs()),
        Err(_) => "unknown".to_string(),
    }
}

fn main() {
    println!("cargo:rustc-env=GIT_SHA={}", revision());
    println!("cargo:rustc-env=BUILD_DATE={}", build_date());
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    // The checkout lives at the workspace root, two levels above this package.
    let head = Path::new("../../.git/HEAD");
    if head.exists() {
        println!("cargo:rerun-if-changed={}", head.display());
    }
}
