use std::env;
use std::path::{Path, PathBuf};

use anyhow::Error;

use crate::config::Config;
use crate::installer::{self, InstallOptions};
use crate::installs::get_installs;
use crate::session::Session;
use crate::utils::CommandOutput;
use crate::windows;

/// Outcome of one idempotent environment probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    Passed,
    Failed,
    Skip,
}

fn ask_remediate(assume_yes: bool, prompt: &str) -> bool {
    if assume_yes {
        return true;
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()
        .unwrap_or(false)
}

const ALIAS_NAMES: &[&str] = &[
    "py.exe",
    "pyw.exe",
    "python.exe",
    "pythonw.exe",
    "python3.exe",
    "pymanager.exe",
];

/// The app execution aliases must resolve to this package.
pub fn check_app_alias(_config: &Config) -> Check {
    debug!("checking app execution aliases");
    let Some(package) = windows::current_package() else {
        debug!("check skipped: not running from a package");
        return Check::Skip;
    };
    let Some(local) = env::var_os("LocalAppData") else {
        return Check::Skip;
    };
    // store-signed builds carry a different publisher in the identity
    let publisher = env::var("PYMANAGER_APPX_STORE_PUBLISHER").ok();
    let root = PathBuf::from(local).join("Microsoft").join("WindowsApps");
    for name in ALIAS_NAMES {
        let exe = root.join(name);
        match windows::read_alias_reparse(&exe) {
            Ok(data)
                if data.contains(&package)
                    || publisher
                        .as_deref()
                        .map(|p| data.contains(p))
                        .unwrap_or(false) => {}
            Ok(_) => {
                debug!("check failed: {} routes to another package", exe.display());
                return Check::Failed;
            }
            Err(_) => {
                debug!("check failed: did not find {}", exe.display());
                return Check::Failed;
            }
        }
    }
    debug!("check passed: aliases are correct");
    Check::Passed
}

/// `HKLM\...\FileSystem\LongPathsEnabled` should be 1.
pub fn check_long_paths(_config: &Config) -> Check {
    debug!("checking long paths setting");
    match windows::long_paths_enabled() {
        Some(true) => Check::Passed,
        Some(false) => Check::Failed,
        None => Check::Skip,
    }
}

fn path_entries() -> Vec<PathBuf> {
    env::var_os("PATH")
        .map(|path| env::split_paths(&path).collect())
        .unwrap_or_default()
}

/// A legacy `py.exe` earlier on PATH shadows the manager's commands.
pub fn check_py_on_path(_config: &Config) -> Check {
    debug!("checking for legacy py.exe on PATH");
    if windows::current_package().is_none() {
        debug!("check skipped: not running from a package");
        return Check::Skip;
    }
    let mut found = match which::which_all("py.exe") {
        Ok(found) => found,
        Err(_) => return Check::Skip,
    };
    // only the first hit matters; it shadows everything after it
    match found.next() {
        Some(py) => match windows::read_alias_reparse(&py) {
            // the app execution alias is ours
            Ok(_) => Check::Passed,
            Err(_) => {
                debug!("check failed: found {} on PATH", py.display());
                Check::Failed
            }
        },
        None => {
            debug!("check passed: no py.exe on PATH at all");
            Check::Passed
        }
    }
}

fn dirs_equal(a: &Path, b: &Path) -> bool {
    same_file::is_same_file(a, b).unwrap_or_else(|_| {
        a.to_string_lossy()
            .trim_end_matches(['\\', '/'])
            .eq_ignore_ascii_case(b.to_string_lossy().trim_end_matches(['\\', '/']))
    })
}

/// The global launcher directory should be on PATH, either in the live
/// environment or already staged in the user's registry value.
pub fn check_global_dir(config: &Config) -> Check {
    debug!("checking for global dir on PATH");
    if config.global_dir.as_os_str().is_empty() {
        return Check::Skip;
    }
    for dir in path_entries() {
        if dirs_equal(&dir, &config.global_dir) {
            debug!("check passed: {} is on PATH", dir.display());
            return Check::Passed;
        }
    }
    match windows::registry_path_contains(&config.global_dir) {
        Some(true) => {
            debug!("check passed: global dir will be on PATH after restart");
            Check::Passed
        }
        Some(false) => Check::Failed,
        None => Check::Failed,
    }
}

/// At least one runtime, managed or otherwise, should be present.
pub fn check_any_install(config: &Config) -> Check {
    debug!("checking for any Python runtime install");
    if get_installs(config, true).is_empty() {
        Check::Failed
    } else {
        Check::Passed
    }
}

fn do_install_default(
    session: &mut Session,
    config: &Config,
    output: CommandOutput,
) -> Result<(), Error> {
    let mut opts = InstallOptions {
        tags: vec!["default".to_string()],
        automatic: true,
        assume_yes: true,
        ..Default::default()
    };
    installer::execute(session, config, &mut opts, output)
}

/// Runs the first-run checks under the welcome latch.  Each check is
/// independent and reported at most once; `explicit` reports passes
/// too (the `install --configure` path).
pub fn first_run(
    session: &mut Session,
    config: &Config,
    explicit: bool,
    assume_yes: bool,
    output: CommandOutput,
) -> Result<(), Error> {
    if explicit {
        session.welcome();
    }
    let mut shown_any = false;

    match check_app_alias(config) {
        Check::Failed => {
            session.welcome();
            shown_any = true;
            warn!(
                "your app execution alias settings are configured to launch other \
                 commands besides 'py' and 'python'"
            );
            echo!(
                "This can be fixed by opening the 'Manage app execution aliases' settings \
                 page and enabling each item labelled 'Python (default)' and 'Python \
                 install manager'."
            );
        }
        Check::Passed if explicit => echo!("Checked app execution aliases"),
        Check::Skip if explicit => echo!("Skipped app execution aliases check"),
        _ => {}
    }

    match check_long_paths(config) {
        Check::Failed => {
            session.welcome();
            shown_any = true;
            warn!("Windows is not configured to allow paths longer than 260 characters.");
            echo!(
                "Some packages may fail to install without long path support enabled; \
                 changing it is a system-wide setting that may need an administrator."
            );
        }
        Check::Passed if explicit => echo!("Checked system long paths setting"),
        Check::Skip if explicit => echo!("Skipped system long paths check"),
        _ => {}
    }

    match check_py_on_path(config) {
        Check::Failed => {
            session.welcome();
            shown_any = true;
            warn!("the legacy 'py' command is still installed");
            echo!(
                "This may interfere with launching the new 'py' command, and may be \
                 resolved by uninstalling 'Python launcher'."
            );
        }
        Check::Passed if explicit => echo!("Checked PATH for legacy 'py' command"),
        Check::Skip if explicit => echo!("Skipped check for legacy 'py' command"),
        _ => {}
    }

    match check_global_dir(config) {
        Check::Failed => {
            session.welcome();
            shown_any = true;
            warn!("the directory for versioned Python commands is not on PATH");
            echo!(
                "This prevents commands like python3.14.exe working, but does not \
                 affect the python or py commands."
            );
            if ask_remediate(assume_yes, "Add commands directory to your PATH now?") {
                match crate::windows::add_global_dir_to_path(config) {
                    Ok(true) => {
                        echo!(
                            "PATH has been updated, and will take effect after opening a \
                             new terminal."
                        );
                    }
                    Ok(false) => {
                        echo!(
                            "You may add it yourself by opening 'Edit environment variables' \
                             and adding this directory to 'PATH': {}",
                            config.global_dir.display()
                        );
                    }
                    Err(err) => {
                        error!("failed to update PATH environment variable: {:#}", err);
                    }
                }
            }
        }
        Check::Passed if explicit => echo!("Checked PATH for versioned commands directory"),
        Check::Skip if explicit => echo!("Skipped check for commands directory on PATH"),
        _ => {}
    }

    // last, because installing may take a while
    if check_any_install(config) == Check::Failed {
        session.welcome();
        shown_any = true;
        warn!("you do not have any Python runtimes installed");
        if ask_remediate(assume_yes, "Install the current latest version of CPython now?") {
            do_install_default(session, config, output)?;
        } else {
            echo!("Use 'py install default' later to install.");
        }
    } else if explicit {
        echo!("Checked for any Python installs");
    }

    if shown_any || explicit {
        echo!("Configuration checks completed.");
        echo!("To run these checks again, run 'py install --configure' from the terminal.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> Config {
        Config {
            root: root.to_path_buf(),
            install_dir: root.join("pkgs"),
            global_dir: root.join("bin"),
            download_dir: root.join("pkgs"),
            bundled_dir: None,
            source: String::new(),
            fallback_source: None,
            default_tag: "3".into(),
            default_install_tag: "3".into(),
            default_platform: "-64".into(),
            automatic_install: true,
            include_unmanaged: false,
            preserve_site_on_upgrade: true,
            virtual_env: None,
            pep514_root: String::new(),
            start_folder: String::new(),
            launcher_exe: PathBuf::new(),
            launcherw_exe: PathBuf::new(),
            enable_shortcut_kinds: None,
            disable_shortcut_kinds: Vec::new(),
            welcome_on_update: false,
        }
    }

    #[test]
    fn test_check_any_install_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(check_any_install(&config(dir.path())), Check::Failed);
    }

    #[test]
    fn test_checks_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let first = (
            check_app_alias(&config),
            check_long_paths(&config),
            check_py_on_path(&config),
            check_any_install(&config),
        );
        let second = (
            check_app_alias(&config),
            check_long_paths(&config),
            check_py_on_path(&config),
            check_any_install(&config),
        );
        assert_eq!(first, second);
    }
}
