use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

static ECHO_TO_STDERR: AtomicBool = AtomicBool::new(false);

/// 0 = quiet, 1 = normal, 2 = verbose, 3 = debug.
static LOG_LEVEL: AtomicU8 = AtomicU8::new(1);

pub fn set_log_level(level: u8) {
    LOG_LEVEL.store(level, Ordering::Relaxed);
}

pub fn log_level() -> u8 {
    LOG_LEVEL.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // use eprintln and println so that tests can still intercept this
    if ECHO_TO_STDERR.load(Ordering::Relaxed) {
        eprintln!("{}", args);
    } else {
        println!("{}", args);
    }
}

/// Until the guard is dropped, echo goes to stderr.
pub fn redirect_to_stderr(yes: bool) -> RedirectGuard {
    let old = ECHO_TO_STDERR.load(Ordering::Relaxed);
    ECHO_TO_STDERR.store(yes, Ordering::Relaxed);
    RedirectGuard(old)
}

#[must_use]
pub struct RedirectGuard(bool);

impl Drop for RedirectGuard {
    fn drop(&mut self) {
        ECHO_TO_STDERR.store(self.0, Ordering::Relaxed);
    }
}

/// Echo a line to the output stream (usually stdout).
macro_rules! echo {
    () => {
        $crate::tui::_print(format_args!(""))
    };
    (if verbose $out:expr, $($arg:tt)+) => {
        match $out {
            $crate::utils::CommandOutput::Verbose => {
                $crate::tui::_print(format_args!($($arg)*))
            }
            _ => {}
        }
    };
    (if $out:expr, $($arg:tt)+) => {
        match $out {
            $crate::utils::CommandOutput::Normal | $crate::utils::CommandOutput::Verbose => {
                $crate::tui::_print(format_args!($($arg)*))
            }
            _ => {}
        }
    };
    ($($arg:tt)+) => {
        $crate::tui::_print(format_args!($($arg)*))
    };
}

/// Like echo but always goes to stderr.
macro_rules! elog {
    ($($arg:tt)*) => { eprintln!($($arg)*) }
}

/// Emits a warning
macro_rules! warn {
    ($($arg:tt)+) => {
        elog!(
            "{} {}",
            console::style("warning:").yellow().bold(),
            format_args!($($arg)*)
        )
    }
}

/// Logs errors
macro_rules! error {
    ($($arg:tt)+) => {
        elog!(
            "{} {}",
            console::style("error:").red().bold(),
            format_args!($($arg)*)
        )
    }
}

/// Diagnostics that only show up at the debug level (-vv or PYMANAGER_DEBUG).
macro_rules! debug {
    ($($arg:tt)+) => {
        if $crate::tui::log_level() >= 3 {
            elog!(
                "{} {}",
                console::style("debug:").dim(),
                format_args!($($arg)*)
            )
        }
    }
}
