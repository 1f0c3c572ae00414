fn main() {
    // Stamped into `waypoint --version`
    println!(
        "cargo:rustc-env=WAYPOINT_BUILD_TIMESTAMP={}",
        chrono::Utc::now().format("%Y-%m-%d")
    );

    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=WAYPOINT_GIT_HASH={hash}");
    println!("cargo:rerun-if-changed=build.rs");
}
