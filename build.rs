use std::process::Command;

fn main() {
    // This runs only during build; source tarballs have no git metadata
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "cargo:rustc-env=EDGE_IDENTITY_VERSION={} {}",
        env!("CARGO_PKG_VERSION"),
        git_hash
    );
}
