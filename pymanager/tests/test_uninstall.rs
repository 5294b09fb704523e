use std::fs;

mod common;
use common::{FeedRuntime, Space};

#[test]
fn test_uninstall_removes_install_and_its_aliases() {
    let space = Space::new();
    let feed = space.write_feed(&[
        FeedRuntime::new("3.12-64", "3.12.5"),
        FeedRuntime::new("3.13-64", "3.13.0"),
    ]);

    let status = space
        .py_cmd()
        .args(["install", "-s", feed.as_str(), "--yes", "3.12", "3.13"])
        .status()
        .unwrap();
    assert!(status.success());
    assert!(space.global_dir().join("python3.12.exe").is_file());
    assert!(space.global_dir().join("python3.13.exe").is_file());

    let status = space
        .py_cmd()
        .args(["uninstall", "--yes", "3.12"])
        .status()
        .unwrap();
    assert!(status.success());

    assert!(!space.install_dir().join("PythonCore-3.12-64").exists());
    assert!(space.install_dir().join("PythonCore-3.13-64").is_dir());
    assert!(!space.global_dir().join("python3.12.exe").exists());
    assert!(!space.global_dir().join("python3.12.exe.__target__").exists());
    assert!(space.global_dir().join("python3.13.exe").is_file());
}

#[test]
fn test_uninstall_by_id() {
    let space = Space::new();
    let feed = space.write_feed(&[FeedRuntime::new("3.13-64", "3.13.0")]);
    let status = space
        .py_cmd()
        .args(["install", "-s", feed.as_str(), "--yes", "3.13"])
        .status()
        .unwrap();
    assert!(status.success());

    let status = space
        .py_cmd()
        .args(["uninstall", "--yes", "--by-id", "PythonCore-3.13-64"])
        .status()
        .unwrap();
    assert!(status.success());
    assert!(!space.install_dir().join("PythonCore-3.13-64").exists());
}

#[test]
fn test_purge_empties_everything() {
    let space = Space::new();
    let feed = space.write_feed(&[
        FeedRuntime::new("3.12-64", "3.12.5"),
        FeedRuntime::new("3.13-64", "3.13.0"),
    ]);

    let status = space
        .py_cmd()
        .args(["install", "-s", feed.as_str(), "--yes", "3.12", "3.13"])
        .status()
        .unwrap();
    assert!(status.success());

    let status = space
        .py_cmd()
        .args(["uninstall", "--purge", "--yes"])
        .status()
        .unwrap();
    assert!(status.success());

    // every managed install, cached download, alias and sidecar is gone
    assert!(!space.install_dir().exists());
    assert!(space.dir_contents(&space.global_dir()).is_empty());
}

#[test]
fn test_uninstall_requires_tags() {
    let space = Space::new();
    let output = space.py_cmd().args(["uninstall", "--yes"]).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("specify one or more runtimes"),
        "stderr: {}",
        stderr
    );
}
