use std::convert::Infallible;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Error};

use crate::errors::FilesInUse;

/// Controls how much output a command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CommandOutput {
    /// Regular output
    #[default]
    Normal,
    /// Extra verbose output
    Verbose,
    /// No output
    Quiet,
}

impl CommandOutput {
    /// Returns the preferred command output for those flags.
    pub fn from_quiet_and_verbose(quiet: bool, verbose: bool) -> CommandOutput {
        if quiet {
            CommandOutput::Quiet
        } else if verbose || std::env::var_os("PYMANAGER_VERBOSE").is_some() {
            CommandOutput::Verbose
        } else {
            CommandOutput::Normal
        }
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Installs the Ctrl+C handler.  Long running loops poll `interrupted`
/// and unwind so partially written state is repaired on the next run.
pub fn init_ctrlc() {
    ctrlc::set_handler(|| {
        INTERRUPTED.store(true, Ordering::SeqCst);
    })
    .ok();
}

pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn check_interrupted() -> Result<(), Error> {
    if interrupted() {
        anyhow::bail!("operation aborted");
    }
    Ok(())
}

/// Creates the parent directory of `path` if it is missing.
pub fn ensure_tree(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Removes a file if it exists.  Missing files are not an error.
pub fn unlink(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            if is_in_use_error(&err) {
                return Err(Error::new(FilesInUse {
                    path: path.to_path_buf(),
                }));
            }
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

fn is_in_use_error(err: &std::io::Error) -> bool {
    #[cfg(windows)]
    {
        // ERROR_ACCESS_DENIED and ERROR_SHARING_VIOLATION
        matches!(err.raw_os_error(), Some(5) | Some(32))
    }
    #[cfg(not(windows))]
    {
        // EBUSY and ETXTBSY
        matches!(err.raw_os_error(), Some(16) | Some(26))
    }
}

/// Removes a directory tree, taking out the listed extensions first.
///
/// Executables and metadata are deleted ahead of the bulk removal so that
/// an in-use runtime is detected before the tree is half gone.  An in-use
/// file surfaces as `FilesInUse`.
pub fn rmtree(path: &Path, remove_ext_first: &[&str]) -> Result<(), Error> {
    if !path.exists() {
        return Ok(());
    }
    if path.is_file() {
        return unlink(path);
    }
    if !remove_ext_first.is_empty() {
        for entry in walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| remove_ext_first.iter().any(|x| e.eq_ignore_ascii_case(x)))
                .unwrap_or(false);
            if matches {
                unlink(entry.path())?;
            }
        }
    }
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            if is_in_use_error(&err) {
                return Err(Error::new(FilesInUse {
                    path: path.to_path_buf(),
                }));
            }
            Err(err).with_context(|| format!("failed to remove {}", path.display()))
        }
    }
}

/// Reads a file to a string, tolerating a UTF-8 BOM.
pub fn read_to_string_bom(path: &Path) -> Result<String, Error> {
    let mut buf = Vec::new();
    fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .read_to_end(&mut buf)?;
    let bytes = if buf.starts_with(b"\xef\xbb\xbf") {
        &buf[3..]
    } else {
        &buf[..]
    };
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Checks whether `path` ends with the components of `pattern`, comparing
/// component-wise and case-insensitively.  This is how shebang paths and
/// `__target__` sidecars are matched against install executables.
pub fn path_matches(path: &Path, pattern: &Path) -> bool {
    let mut left: Vec<&std::ffi::OsStr> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p),
            _ => None,
        })
        .collect();
    let mut right: Vec<&std::ffi::OsStr> = pattern
        .components()
        .filter_map(|c| match c {
            Component::Normal(p) => Some(p),
            _ => None,
        })
        .collect();
    if right.is_empty() || right.len() > left.len() {
        return false;
    }
    while let Some(r) = right.pop() {
        let l = match left.pop() {
            Some(l) => l,
            None => return false,
        };
        let (l, r) = (l.to_string_lossy(), r.to_string_lossy());
        if !l.eq_ignore_ascii_case(&r) {
            return false;
        }
    }
    true
}

/// Checks whether `path` is located inside `prefix` (after normalising
/// away `.` components; neither path needs to exist).
pub fn path_within(path: &Path, prefix: &Path) -> bool {
    let norm = |p: &Path| -> PathBuf {
        p.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    };
    norm(path).starts_with(norm(prefix))
}

/// Spawns a command exec style.
pub fn exec_spawn(cmd: &mut Command) -> Result<Infallible, Error> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = cmd.exec();
        Err(err.into())
    }
    #[cfg(not(unix))]
    {
        use std::process::Stdio;
        cmd.stdin(Stdio::inherit());
        let status = cmd.status()?;
        std::process::exit(status.code().unwrap_or(1))
    }
}
