use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
}

fn main() {
    let git_hash = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    let tagged = git(&["describe", "--exact-match", "--tags", "HEAD"]).is_some();

    // Untagged builds advertise themselves as dev builds on /health and --version
    let suffix = if tagged {
        String::new()
    } else {
        format!("-dev.{}", git_hash)
    };
    println!("cargo:rustc-env=REDMOON_VERSION_SUFFIX={}", suffix);

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
