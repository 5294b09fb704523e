use std::fs;
use std::path::Path;

use anyhow::{bail, Error};

use crate::aliases::{SCRIPT_SIDECAR_SUFFIX, TARGET_SIDECAR_SUFFIX};
use crate::config::Config;
use crate::errors::{ArgumentError, FilesInUse};
use crate::installs::{get_installs, Install};
use crate::resolver::get_matching_installs;
use crate::session::Session;
use crate::shortcuts::{update_all_shortcuts, SHORTCUT_HANDLERS};
use crate::tags::tag_or_range;
use crate::utils::{path_within, rmtree, unlink, CommandOutput};

#[derive(Debug, Default, Clone)]
pub struct UninstallOptions {
    pub tags: Vec<String>,
    pub purge: bool,
    pub by_id: bool,
    pub assume_yes: bool,
}

fn ask_yn(assume_yes: bool, prompt: &str) -> bool {
    if assume_yes {
        return true;
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()
        .unwrap_or(false)
}

/// Removes every alias whose `__target__` sidecar points inside the
/// removed prefix, together with its sidecars.
fn remove_aliases_for_prefix(config: &Config, prefix: &Path) {
    let entries = match fs::read_dir(&config.global_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let sidecar = entry.path();
        let name = sidecar.file_name().unwrap_or_default().to_string_lossy().into_owned();
        let Some(alias_name) = name.strip_suffix(TARGET_SIDECAR_SUFFIX) else {
            continue;
        };
        let target = match fs::read_to_string(&sidecar) {
            Ok(text) => text,
            Err(_) => continue,
        };
        if !path_within(Path::new(target.trim()), prefix) {
            continue;
        }
        let alias = sidecar.with_file_name(alias_name);
        debug!("unlinking {}", alias.display());
        unlink(&alias).ok();
        unlink(&sidecar).ok();
        unlink(&alias.with_file_name(format!("{}{}", alias_name, SCRIPT_SIDECAR_SUFFIX))).ok();
    }
}

fn purge(
    session: &mut Session,
    config: &Config,
    opts: &UninstallOptions,
    installed: &[Install],
    output: CommandOutput,
) -> Result<(), Error> {
    if !ask_yn(opts.assume_yes, "Uninstall all runtimes?") {
        return Ok(());
    }
    for install in installed {
        if install.unmanaged {
            continue;
        }
        let Some(prefix) = &install.prefix else { continue };
        echo!("Purging {} from {}", install.display_name(), prefix.display());
        match rmtree(prefix, &["exe", "dll", "json"]) {
            Ok(()) => {}
            Err(err) if err.downcast_ref::<FilesInUse>().is_some() => {
                warn!(
                    "unable to purge {} because it is still in use",
                    install.display_name()
                );
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    echo!("Purging saved downloads from {}", config.download_dir.display());
    rmtree(&config.download_dir, &[])?;

    if config.global_dir.is_dir() {
        echo!("Purging global commands from {}", config.global_dir.display());
        for entry in fs::read_dir(&config.global_dir)?.filter_map(|e| e.ok()) {
            rmtree(&entry.path(), &[]).ok();
        }
    }
    match crate::windows::remove_global_dir_from_path(config) {
        Ok(true) => echo!("Removed global commands directory from PATH"),
        Ok(false) => {}
        Err(err) => debug!("not removing global commands directory from PATH: {:#}", err),
    }

    echo!("Purging all shortcuts");
    for (kind, _, cleanup) in SHORTCUT_HANDLERS {
        if let Err(err) = cleanup(session, config, &[]) {
            warn!("failed to clean up {} shortcuts: {:#}", kind, err);
        }
    }
    let _ = output;
    Ok(())
}

/// The `uninstall` command.
pub fn execute(
    session: &mut Session,
    config: &Config,
    opts: &UninstallOptions,
    output: CommandOutput,
) -> Result<(), Error> {
    // never let the active venv into the candidate set
    let mut scan_config = config.clone();
    scan_config.virtual_env = None;
    let mut installed = get_installs(&scan_config, true);

    if opts.purge {
        return purge(session, config, opts, &installed, output);
    }

    if opts.tags.is_empty() {
        bail!(ArgumentError(
            "please specify one or more runtimes to uninstall".into()
        ));
    }

    // unmanaged runtimes are never uninstall candidates
    installed.retain(|i| !i.unmanaged);

    let mut to_uninstall: Vec<Install> = Vec::new();
    if opts.by_id {
        for id in &opts.tags {
            let found = installed
                .iter()
                .position(|i| i.id.eq_ignore_ascii_case(id));
            match found {
                Some(idx) => to_uninstall.push(installed.remove(idx)),
                None => warn!("no install found with ID '{}'", id),
            }
        }
    } else {
        for arg in &opts.tags {
            let spec = if arg.eq_ignore_ascii_case("default") {
                config.default_tag.clone()
            } else {
                arg.clone()
            };
            let range = match tag_or_range(&spec) {
                Ok(range) => range,
                Err(err) => {
                    warn!("{}", err);
                    continue;
                }
            };
            let candidate = {
                let matched =
                    get_matching_installs(&installed, &range, &config.default_platform, true);
                matched.first().map(|(i, _)| i.id.clone())
            };
            match candidate {
                Some(id) => {
                    let idx = installed.iter().position(|i| i.id == id).unwrap();
                    let install = installed.remove(idx);
                    debug!("selected {} ({}) to uninstall", install.display_name(), install.id);
                    to_uninstall.push(install);
                }
                None => warn!("no install found matching '{}'", arg),
            }
        }
    }

    if to_uninstall.is_empty() {
        echo!("No runtimes selected to uninstall.");
        return Ok(());
    }

    let prompt = if to_uninstall.len() == 1 {
        format!("Uninstall {}?", to_uninstall[0].display_name())
    } else {
        format!(
            "Uninstall these runtimes: {}?",
            to_uninstall
                .iter()
                .map(|i| i.display_name().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    };
    if !ask_yn(opts.assume_yes, &prompt) {
        return Ok(());
    }

    for install in &to_uninstall {
        let Some(prefix) = &install.prefix else { continue };
        debug!(
            "uninstalling {} from {}",
            install.display_name(),
            prefix.display()
        );
        match rmtree(prefix, &["exe", "dll", "json"]) {
            Ok(()) => {}
            Err(err) if err.downcast_ref::<FilesInUse>().is_some() => {
                error!(
                    "could not uninstall {} because it is still in use",
                    install.display_name()
                );
                return Err(err);
            }
            Err(err) => return Err(err),
        }
        echo!("Removed {}", install.display_name());
        remove_aliases_for_prefix(config, prefix);
    }

    // reconcile what remains
    let remaining = crate::installs::get_installs_with_default(&scan_config, false);
    update_all_shortcuts(session, config, &remaining, output);
    Ok(())
}
