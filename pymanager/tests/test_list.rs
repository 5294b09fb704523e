mod common;
use common::Space;

#[test]
fn test_list_empty() {
    let space = Space::new();
    insta_cmd::assert_cmd_snapshot!(space.py_cmd().arg("list"), @r###"
    success: true
    exit_code: 0
    ----- stdout -----
    Tag     Name  Managed By  Version  Alias
    -- No runtimes. Use 'py install <version>' to install one. --

    ----- stderr -----
    "###);
}

#[test]
fn test_list_exe_format() {
    let space = Space::new();
    space.write_fake_install("PythonCore-3.13-64", "3.13-64", "3.13.0");
    let root = regex::escape(&space.root().display().to_string());
    insta::with_settings!({filters => vec![(root.as_str(), "[ROOT]")]}, {
        insta_cmd::assert_cmd_snapshot!(space.py_cmd().args(["list", "-f", "exe"]), @r###"
        success: true
        exit_code: 0
        ----- stdout -----
        [ROOT]/pkgs/PythonCore-3.13-64/python.exe

        ----- stderr -----
        "###);
    });
}

#[test]
fn test_list_filters_and_formats() {
    let space = Space::new();
    space.write_fake_install("PythonCore-3.12-64", "3.12-64", "3.12.5");
    space.write_fake_install("PythonCore-3.13-64", "3.13-64", "3.13.0");

    let output = space
        .py_cmd()
        .args(["list", "-f", "id", "3.13"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "PythonCore-3.13-64"
    );

    // ranges work as filters too
    let output = space
        .py_cmd()
        .args(["list", "-f", "id", ">=3.13"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "PythonCore-3.13-64"
    );

    let output = space
        .py_cmd()
        .args(["list", "-f", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let doc: serde_json::Value =
        serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(doc["versions"].as_array().unwrap().len(), 2);
    // newest first
    assert_eq!(doc["versions"][0]["id"], "PythonCore-3.13-64");
}

#[test]
fn test_list_one_prefers_default() {
    let space = Space::new();
    space.write_fake_install("PythonCore-3.12-64", "3.12-64", "3.12.5");
    space.write_fake_install("PythonCore-3.13-64", "3.13-64", "3.13.0");

    let output = space
        .py_cmd()
        .args(["list", "--one", "-f", "id"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "PythonCore-3.13-64"
    );
}

#[test]
fn test_legacy_list_alias() {
    let space = Space::new();
    space.write_fake_install("PythonCore-3.13-64", "3.13-64", "3.13.0");
    let output = space.py_cmd().arg("--list").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("-V:3.13[-64]"), "stdout: {}", stdout);
    assert!(stdout.contains("*"), "stdout: {}", stdout);

    let output = space.py_cmd().arg("-0p").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("python.exe"), "stdout: {}", stdout);
}

#[test]
fn test_list_online_from_source() {
    let space = Space::new();
    let feed = space.write_feed(&[
        common::FeedRuntime::new("3.12-64", "3.12.5"),
        common::FeedRuntime::new("3.13-64", "3.13.0"),
    ]);
    let output = space
        .py_cmd()
        .args(["list", "-f", "id", "-s", feed.as_str()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("PythonCore-3.12-64"), "stdout: {}", stdout);
    assert!(stdout.contains("PythonCore-3.13-64"), "stdout: {}", stdout);
}
