use anyhow::Error;

use crate::aliases::sync_aliases;
use crate::config::Config;
use crate::installs::{Install, Shortcut};
use crate::session::Session;
use crate::utils::CommandOutput;
use crate::windows;

/// Shortcut handlers are a static table keyed by kind; each kind is a
/// `(create, cleanup)` pair and stays idempotent.
pub type CreateFn = fn(&mut Session, &Config, &Install, &Shortcut) -> Result<(), Error>;
pub type CleanupFn = fn(&mut Session, &Config, &[(Install, Shortcut)]) -> Result<(), Error>;

pub const SHORTCUT_HANDLERS: &[(&str, CreateFn, CleanupFn)] = &[
    ("pep514", create_pep514, cleanup_pep514),
    ("start", create_start, cleanup_start),
    ("uninstall", create_arp, cleanup_arp),
    ("site-dirs", create_site_dirs, cleanup_site_dirs),
];

pub fn handler_for(kind: &str) -> Option<(CreateFn, CleanupFn)> {
    SHORTCUT_HANDLERS
        .iter()
        .find(|(k, _, _)| k.eq_ignore_ascii_case(kind))
        .map(|(_, create, cleanup)| (*create, *cleanup))
}

fn create_pep514(
    session: &mut Session,
    config: &Config,
    install: &Install,
    _shortcut: &Shortcut,
) -> Result<(), Error> {
    windows::pep514_create(session, config, install)
}

fn cleanup_pep514(
    _session: &mut Session,
    config: &Config,
    pairs: &[(Install, Shortcut)],
) -> Result<(), Error> {
    let keep: Vec<(String, String)> = pairs
        .iter()
        .map(|(i, _)| (i.company.clone(), i.tag.clone()))
        .collect();
    windows::pep514_cleanup(config, &keep)
}

fn create_start(
    _session: &mut Session,
    config: &Config,
    install: &Install,
    shortcut: &Shortcut,
) -> Result<(), Error> {
    windows::start_shortcut_create(config, install, shortcut)
}

fn cleanup_start(
    _session: &mut Session,
    config: &Config,
    pairs: &[(Install, Shortcut)],
) -> Result<(), Error> {
    let keep: Vec<String> = pairs
        .iter()
        .filter_map(|(_, s)| s.get_str("Name").map(String::from))
        .collect();
    windows::start_shortcut_cleanup(config, &keep)
}

fn create_arp(
    _session: &mut Session,
    config: &Config,
    install: &Install,
    shortcut: &Shortcut,
) -> Result<(), Error> {
    windows::arp_create(config, install, shortcut)
}

fn cleanup_arp(
    _session: &mut Session,
    config: &Config,
    pairs: &[(Install, Shortcut)],
) -> Result<(), Error> {
    let keep: Vec<String> = pairs.iter().map(|(i, _)| i.id.clone()).collect();
    windows::arp_cleanup(config, &keep)
}

// Entry point aliases are produced by the alias synchronizer, which
// scans site-dirs itself; the handler exists so the kind participates
// in enable/disable filtering.
fn create_site_dirs(
    _session: &mut Session,
    _config: &Config,
    _install: &Install,
    _shortcut: &Shortcut,
) -> Result<(), Error> {
    Ok(())
}

fn cleanup_site_dirs(
    _session: &mut Session,
    _config: &Config,
    _pairs: &[(Install, Shortcut)],
) -> Result<(), Error> {
    Ok(())
}

/// Estimated install size in kilobytes for the Add/Remove Programs
/// entry.  Unreadable files are skipped rather than failing the sum.
pub fn estimated_size_kb(prefix: &std::path::Path) -> u64 {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(prefix)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                total = total.saturating_add(meta.len());
            }
        }
    }
    total / 1024
}

/// Re-registers every installed runtime: aliases first, then each
/// enabled shortcut kind, then the per-kind cleanups.  Running this
/// twice produces the same filesystem and registry state.
pub fn update_all_shortcuts(
    session: &mut Session,
    config: &Config,
    installs: &[Install],
    output: CommandOutput,
) {
    sync_aliases(session, config, installs, output);

    let mut written: Vec<(String, Install, Shortcut)> = Vec::new();
    for install in installs {
        if install.unmanaged {
            continue;
        }
        let mut shortcuts = install.shortcuts.clone();
        // older metadata may predate site-dirs; assume the defaults so
        // entry point aliases are still produced
        if !shortcuts.iter().any(|s| s.kind == "site-dirs") {
            let mut synthesized = Shortcut::new("site-dirs");
            synthesized.extra.insert(
                "dirs".into(),
                serde_json::json!(crate::aliases::DEFAULT_SITE_DIRS),
            );
            shortcuts.push(synthesized);
        }
        for shortcut in shortcuts {
            if !config.shortcut_kind_enabled(&shortcut.kind) {
                continue;
            }
            let Some((create, _)) = handler_for(&shortcut.kind) else {
                warn!("skipping invalid shortcut for '{}'", install.id);
                debug!("shortcut kind: {}", shortcut.kind);
                continue;
            };
            match create(session, config, install, &shortcut) {
                Ok(()) => written.push((shortcut.kind.clone(), install.clone(), shortcut)),
                Err(err) => {
                    warn!(
                        "failed to register {} shortcut for {}: {:#}",
                        shortcut.kind, install.id, err
                    );
                }
            }
        }
    }

    for (kind, _, cleanup) in SHORTCUT_HANDLERS {
        let pairs: Vec<(Install, Shortcut)> = written
            .iter()
            .filter(|(k, _, _)| k.as_str() == *kind)
            .map(|(_, i, s)| (i.clone(), s.clone()))
            .collect();
        if let Err(err) = cleanup(session, config, &pairs) {
            warn!("failed to clean up {} shortcuts: {:#}", kind, err);
        }
    }
}
