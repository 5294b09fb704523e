use std::fmt;
use std::path::PathBuf;

/// Exit without printing anything further; the message was already shown.
#[derive(Debug)]
pub struct QuietExit(pub i32);

impl std::error::Error for QuietExit {}

impl fmt::Display for QuietExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit with {}", self.0)
    }
}

/// Bad command line usage or an unusable URI.
#[derive(Debug)]
pub struct ArgumentError(pub String);

impl std::error::Error for ArgumentError {}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The resolver found nothing matching the request.
#[derive(Debug)]
pub struct NoInstallFound {
    pub request: String,
}

impl std::error::Error for NoInstallFound {}

impl fmt::Display for NoInstallFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.request.is_empty() {
            write!(f, "no suitable runtime found")
        } else {
            write!(f, "no runtime found matching '{}'", self.request)
        }
    }
}

/// The installed set is empty when it must not be.
#[derive(Debug)]
pub struct NoInstalls;

impl std::error::Error for NoInstalls {}

impl fmt::Display for NoInstalls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no runtimes are installed")
    }
}

/// A launch needed an automatic install but configuration forbids it.
#[derive(Debug)]
pub struct AutomaticInstallDisabled;

impl std::error::Error for AutomaticInstallDisabled {}

impl fmt::Display for AutomaticInstallDisabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the requested runtime is not installed and automatic installs are disabled"
        )
    }
}

/// A downloaded file failed hash verification and was deleted.
#[derive(Debug)]
pub struct HashMismatch {
    pub algorithm: String,
    pub actual: String,
    pub expected: String,
}

impl std::error::Error for HashMismatch {}

impl fmt::Display for HashMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hash mismatch: {}:{} (expected {})",
            self.algorithm, self.actual, self.expected
        )
    }
}

/// A destination could not be removed or overwritten because it is open.
#[derive(Debug)]
pub struct FilesInUse {
    pub path: PathBuf,
}

impl std::error::Error for FilesInUse {}

impl fmt::Display for FilesInUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "files under {} are still in use; close any running Python and retry",
            self.path.display()
        )
    }
}

/// No launcher template could be located for an alias.
#[derive(Debug)]
pub struct NoLauncherTemplate {
    pub alias: String,
}

impl std::error::Error for NoLauncherTemplate {}

impl fmt::Display for NoLauncherTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no launcher template found for alias '{}'", self.alias)
    }
}

/// Maps an error chain to the process exit code.
///
/// User-visible failures exit with 1; if an OS error is the root cause its
/// code wins. `QuietExit` passes its code through untouched.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(QuietExit(code)) = err.downcast_ref::<QuietExit>() {
        return *code;
    }
    for cause in err.chain() {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(code) = io.raw_os_error() {
                return code;
            }
        }
    }
    1
}

#[test]
fn test_exit_code_quiet_exit() {
    let err = anyhow::Error::new(QuietExit(3));
    assert_eq!(exit_code(&err), 3);
}

#[test]
fn test_exit_code_plain() {
    let err = anyhow::anyhow!("boom");
    assert_eq!(exit_code(&err), 1);
}
