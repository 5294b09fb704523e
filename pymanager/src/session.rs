use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::index::Index;

/// Process-lifetime state shared by the install and uninstall flows.
///
/// Collapses the in-memory feed cache, the launcher remap table, and the
/// per-run alias bookkeeping into one value threaded through the flows,
/// so nothing hides in module globals.
#[derive(Default)]
pub struct Session {
    /// Fetched feed pages keyed by source URL.
    pub index_cache: HashMap<String, Index>,
    /// Completed downloads keyed by URL.
    pub download_cache: HashMap<String, PathBuf>,
    /// Launcher template name -> a known-good copy created this run,
    /// used when a hard link to the original template fails.
    pub launcher_remap: HashMap<String, PathBuf>,
    /// Alias names written this run (casefolded); first writer wins.
    pub aliases_written: HashSet<String>,
    /// Entry point names seen this run (casefolded).
    pub entrypoints_seen: HashSet<String>,
    /// One-time warnings already emitted (keyed on arbitrary text).
    pub warnings_shown: HashSet<String>,
    /// The first-run banner prints at most once.
    pub welcome_shown: bool,
}

impl Session {
    pub fn new() -> Session {
        Session::default()
    }

    /// Prints the welcome banner once per session.
    pub fn welcome(&mut self) {
        if !self.welcome_shown {
            self.welcome_shown = true;
            echo!(
                "{}",
                console::style("Welcome to the Python installation manager configuration helper.")
                    .green()
            );
        }
    }

    /// Emits a warning once per session for the given key.
    pub fn warn_once(&mut self, key: &str, message: &str) {
        if self.warnings_shown.insert(key.to_string()) {
            warn!("{}", message);
        }
    }
}
