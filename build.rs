//! Build script for rootinha-bot: embeds a version string for `--version`.
//!
//! The string is `{CARGO_PKG_VERSION} ({describe}) {rustc --version}`, where
//! `describe` is `git describe --tags --always --dirty` when the checkout has
//! tags, and `g{short-sha}-{commit date}` otherwise. Outside a git checkout
//! the build date is used in place of the commit.

use std::process::Command;

use chrono::{DateTime, Utc};

fn main() {
    ["src", "build.rs", "Cargo.toml"]
        .iter()
        .for_each(|path| println!("cargo:rerun-if-changed={path}"));

    let parts: Vec<String> = [
        Some(env!("CARGO_PKG_VERSION").to_string()),
        Some(format!("({})", describe())),
        run("rustc", &["--version"]),
    ]
    .into_iter()
    .flatten()
    .collect();

    println!("cargo:rustc-env=BOT_BUILD_INFO={}", parts.join(" "));
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn describe() -> String {
    if let Some(tagged) = run("git", &["describe", "--tags", "--dirty"]) {
        return tagged;
    }

    let Some(sha) = run("git", &["rev-parse", "--short=12", "HEAD"]) else {
        return format!("built {}", Utc::now().format("%Y%m%d%H%M%S"));
    };

    let committed = run("git", &["log", "-1", "--format=%ct"])
        .and_then(|s| s.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    format!("g{sha}-{}", committed.format("%Y%m%d%H%M%S"))
}
