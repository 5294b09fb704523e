use std::fs;

mod common;
use common::{FeedRuntime, Space};

const ENTRY_POINTS: &str = "[console_scripts]\na = a:main\n\n[gui_scripts]\naw = a:main\n";

#[test]
fn test_entry_points_become_aliases() {
    let space = Space::new();
    let feed = space.write_feed(&[FeedRuntime::new("3.13-64", "3.13.0").with_member(
        "Lib/site-packages/A.dist-info/entry_points.txt",
        ENTRY_POINTS.as_bytes(),
    )]);

    let status = space
        .py_cmd()
        .args(["install", "-s", feed.as_str(), "--yes", "3.13"])
        .status()
        .unwrap();
    assert!(status.success());

    let prefix = space.install_dir().join("PythonCore-3.13-64");
    for (name, target_name) in [("a.exe", "python.exe"), ("aw.exe", "pythonw.exe")] {
        let alias = space.global_dir().join(name);
        assert!(alias.is_file(), "missing {}", name);

        let target =
            fs::read_to_string(space.global_dir().join(format!("{}.__target__", name))).unwrap();
        assert_eq!(
            std::path::Path::new(&target),
            prefix.join(target_name),
            "wrong target for {}",
            name
        );

        let script =
            fs::read_to_string(space.global_dir().join(format!("{}.__script__.py", name)))
                .unwrap();
        let lines: Vec<&str> = script
            .lines()
            .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
            .collect();
        assert_eq!(lines[lines.len() - 2], "from a import main");
        assert_eq!(lines[lines.len() - 1], "sys.exit(main())");
    }
}

#[test]
fn test_stale_entry_point_aliases_are_removed() {
    let space = Space::new();
    let feed = space.write_feed(&[FeedRuntime::new("3.13-64", "3.13.0").with_member(
        "Lib/site-packages/A.dist-info/entry_points.txt",
        ENTRY_POINTS.as_bytes(),
    )]);

    let status = space
        .py_cmd()
        .args(["install", "-s", feed.as_str(), "--yes", "3.13"])
        .status()
        .unwrap();
    assert!(status.success());
    assert!(space.global_dir().join("a.exe").is_file());

    // the distribution goes away; a refresh sweeps its aliases
    let dist_info = space
        .install_dir()
        .join("PythonCore-3.13-64")
        .join("Lib/site-packages/A.dist-info");
    fs::remove_dir_all(&dist_info).unwrap();

    let status = space
        .py_cmd()
        .args(["install", "--refresh", "--yes"])
        .status()
        .unwrap();
    assert!(status.success());

    assert!(!space.global_dir().join("a.exe").exists());
    assert!(!space.global_dir().join("a.exe.__target__").exists());
    assert!(!space.global_dir().join("a.exe.__script__.py").exists());
    // regular aliases are untouched
    assert!(space.global_dir().join("python3.13.exe").is_file());
}

#[test]
fn test_alias_exe_matches_launcher_template() {
    let space = Space::new();
    let feed = space.write_feed(&[FeedRuntime::new("3.13-64", "3.13.0")]);

    let status = space
        .py_cmd()
        .args(["install", "-s", feed.as_str(), "--yes", "3.13"])
        .status()
        .unwrap();
    assert!(status.success());

    let console = fs::read(space.global_dir().join("python3.13.exe")).unwrap();
    assert_eq!(console, b"LAUNCHER-TEMPLATE");
    let windowed = fs::read(space.global_dir().join("pythonw3.13.exe")).unwrap();
    assert_eq!(windowed, b"LAUNCHERW-TEMPLATE");
}
