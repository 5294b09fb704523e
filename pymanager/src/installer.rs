use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::download::{download_package, validate_package};
use crate::errors::{ArgumentError, AutomaticInstallDisabled, FilesInUse, NoInstallFound};
use crate::index::{sanitise_url, IndexDownloader};
use crate::installs::{
    get_installs_with_default, read_install_metadata, Install, INSTALL_METADATA,
};
use crate::session::Session;
use crate::shortcuts::update_all_shortcuts;
use crate::tags::{install_matches_any, tag_or_range, TagRange};
use crate::utils::{check_interrupted, ensure_tree, rmtree, unlink, CommandOutput};

/// Options for one `install` invocation.
#[derive(Debug, Default, Clone)]
pub struct InstallOptions {
    pub tags: Vec<String>,
    pub source: Option<String>,
    pub target: Option<PathBuf>,
    pub download: Option<PathBuf>,
    pub force: bool,
    pub update: bool,
    pub repair: bool,
    pub refresh: bool,
    pub by_id: bool,
    pub dry_run: bool,
    pub automatic: bool,
    pub from_script: Option<PathBuf>,
    pub assume_yes: bool,
}

enum Request {
    Range(TagRange),
    Id(String),
}

impl Request {
    fn describe(&self) -> String {
        match self {
            Request::Range(range) => range.to_string(),
            Request::Id(id) => id.clone(),
        }
    }
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

fn find_first_in_feed(
    session: &mut Session,
    source_url: &str,
    range: &TagRange,
    output: CommandOutput,
) -> Result<Option<Install>, Error> {
    for page in IndexDownloader::new(session, source_url, output) {
        if let Some(found) = page?.find_to_install(range) {
            return Ok(Some(found.clone()));
        }
    }
    Ok(None)
}

/// Finds the best entry for a request in one source.  Feed pages are
/// fetched one at a time and the walk stops at the first match;
/// `Ok(None)` means the source answered but had no match.
fn select_package(
    session: &mut Session,
    config: &Config,
    source: &str,
    request: &Request,
    output: CommandOutput,
) -> Result<Option<Install>, Error> {
    let source_url = crate::index::as_source_url(source)?;

    match request {
        Request::Id(id) => {
            for page in IndexDownloader::new(session, &source_url, output) {
                if let Some(found) = page?.find_by_id(id) {
                    return Ok(Some(found.clone()));
                }
            }
            Ok(None)
        }
        Request::Range(range) => {
            // a single bare tag first tries the default platform
            // variant; the second walk hits the session cache rather
            // than the network
            let simple = !range.as_str().contains(',')
                && !range.as_str().contains(['<', '>'])
                && range.requested_platform().is_none();
            if simple && !config.default_platform.is_empty() {
                let suffixed = format!("{}{}", range.as_str(), config.default_platform);
                if let Ok(suffixed) = tag_or_range(&suffixed) {
                    if let Some(found) =
                        find_first_in_feed(session, &source_url, &suffixed, output)?
                    {
                        return Ok(Some(found));
                    }
                }
            }
            find_first_in_feed(session, &source_url, range, output)
        }
    }
}

/// Resolves a request against the primary source and, when it has no
/// match or fails, the fallback.  A failure of every source re-raises
/// the primary's error.
fn select_from_sources(
    session: &mut Session,
    config: &Config,
    sources: &[String],
    request: &Request,
    output: CommandOutput,
) -> Result<Install, Error> {
    let mut first_err: Option<Error> = None;
    let mut answered = false;
    for source in sources {
        debug!("searching {}", sanitise_url(source));
        match select_package(session, config, source, request, output) {
            Ok(Some(found)) => return Ok(found),
            Ok(None) => answered = true,
            Err(err) => {
                debug!("capturing error in case fallbacks fail: {:#}", err);
                first_err = first_err.or(Some(err));
            }
        }
    }
    match first_err {
        Some(err) if !answered => Err(err),
        _ => Err(Error::new(NoInstallFound {
            request: request.describe(),
        })),
    }
}

/// Decides whether a selected entry should actually be installed given
/// the runtimes already present.
fn decide_install(
    entry: Install,
    request: &Request,
    installed: &[Install],
    opts: &InstallOptions,
) -> Option<Install> {
    if let Request::Id(_) = request {
        return Some(entry);
    }
    let existing = installed
        .iter()
        .find(|i| i.id.eq_ignore_ascii_case(&entry.id));
    let Some(existing) = existing else {
        return Some(entry);
    };

    if opts.force {
        warn!(
            "overwriting existing {} install because of --force",
            existing.display_name()
        );
        return Some(entry);
    }
    if opts.repair {
        // repair re-extracts the exact runtime already on disk
        return Some(existing.clone());
    }
    if opts.update {
        if entry.sort_version > existing.sort_version {
            return Some(entry);
        }
        echo!("{} is already up to date.", existing.display_name());
        return None;
    }

    let same = entry.id.eq_ignore_ascii_case(&existing.id)
        && entry.sort_version == existing.sort_version;
    let requested_other = match request {
        Request::Range(range) => {
            !install_matches_any(existing, std::slice::from_ref(range), !range.has_company())
        }
        Request::Id(_) => false,
    };
    if !same && requested_other {
        if ask_yn(
            opts.assume_yes,
            &format!(
                "Your existing {} install will be replaced by {}. Continue?",
                existing.display_name(),
                entry.display_name()
            ),
        ) {
            return Some(entry);
        }
        debug!("not overwriting existing install");
        return None;
    }

    echo!("{} is already installed.", existing.display_name());
    None
}

fn package_path(download_dir: &Path, entry: &Install) -> PathBuf {
    let ext = if entry.url.to_ascii_lowercase().ends_with(".nupkg") {
        "nupkg"
    } else {
        "zip"
    };
    download_dir.join(format!("{}-{}.{}", entry.id, entry.sort_version, ext))
}

// ---------------------------------------------------------------------
// Extraction

fn member_destination(
    dest: &Path,
    raw_name: &str,
    enclosed: Option<&Path>,
    nupkg: bool,
) -> Option<PathBuf> {
    let rel = enclosed?;
    if nupkg {
        let mut parts = Path::new(raw_name).components();
        match parts.next() {
            Some(c) if c.as_os_str().eq_ignore_ascii_case("tools") => {}
            _ => return None,
        }
        let stripped: PathBuf = parts.collect();
        if stripped.as_os_str().is_empty() {
            return None;
        }
        Some(dest.join(stripped))
    } else {
        Some(dest.join(rel))
    }
}

/// Extracts a ZIP-family archive into `dest`.  Members that resolve
/// outside the destination are refused (and reported); existing files
/// block overwrite unless repairing.
pub fn extract_package(
    package: &Path,
    dest: &Path,
    repair: bool,
    output: CommandOutput,
) -> Result<(), Error> {
    debug!("extracting {} to {}", package.display(), dest.display());
    let nupkg = package
        .extension()
        .map(|e| e.eq_ignore_ascii_case("nupkg"))
        .unwrap_or(false);

    let file = fs::File::open(package)
        .with_context(|| format!("failed to open {}", package.display()))?;
    let mut archive =
        zip::ZipArchive::new(file).context("archive is not a valid ZIP package")?;

    let bar = if output == CommandOutput::Normal {
        let bar = ProgressBar::new(archive.len() as u64);
        bar.set_style(ProgressStyle::with_template("{wide_bar} {pos:>6}/{len:6}").unwrap());
        Some(bar)
    } else {
        None
    };

    let mut out_of_prefix: Vec<String> = Vec::new();
    let mut blocked_overwrite: Vec<PathBuf> = Vec::new();

    for i in 0..archive.len() {
        check_interrupted()?;
        if let Some(bar) = &bar {
            bar.set_position(i as u64);
        }
        let mut member = archive.by_index(i)?;
        let raw_name = member.name().to_string();
        let enclosed = member.enclosed_name().map(|p| p.to_path_buf());
        let target = match member_destination(dest, &raw_name, enclosed.as_deref(), nupkg) {
            Some(target) => target,
            None => {
                if member.enclosed_name().is_none() {
                    out_of_prefix.push(raw_name);
                }
                continue;
            }
        };
        if member.is_dir() {
            fs::create_dir_all(&target).ok();
            continue;
        }
        if target.exists() {
            if repair {
                unlink(&target)?;
            } else {
                blocked_overwrite.push(target);
                continue;
            }
        }
        ensure_tree(&target)?;
        let mut out = fs::File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        io::copy(&mut member, &mut out)
            .with_context(|| format!("failed to extract {}", target.display()))?;
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if !out_of_prefix.is_empty() {
        warn!("**********************************************************************");
        warn!("Package attempted to extract outside of its prefix, but was prevented.");
        warn!("THIS PACKAGE MAY BE MALICIOUS. Take care before using it, or uninstall");
        warn!("it immediately.");
        warn!("**********************************************************************");
        for name in &out_of_prefix {
            debug!("attempted to create: {}", name);
        }
    }
    if !blocked_overwrite.is_empty() {
        warn!("**********************************************************************");
        warn!("Package attempted to overwrite existing items, but was prevented.");
        warn!("THIS PACKAGE MAY BE MALICIOUS OR CORRUPT. Take care before using it,");
        warn!("and report this issue to the provider.");
        warn!("**********************************************************************");
        for path in &blocked_overwrite {
            debug!("attempted to overwrite: {}", path.display());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Site preservation

struct PreservedSite {
    moves: Vec<(PathBuf, PathBuf)>,
    staging_root: PathBuf,
}

fn site_dirs_of(install: &Install) -> Vec<String> {
    for s in &install.shortcuts {
        if s.kind == "site-dirs" {
            if let Some(dirs) = s.dirs() {
                return dirs;
            }
        }
    }
    crate::aliases::DEFAULT_SITE_DIRS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Moves the configured site directories aside before the destination
/// is wiped for an upgrade.
fn preserve_site(
    config: &Config,
    root: &Path,
    install: &Install,
    opts: &InstallOptions,
) -> Option<PreservedSite> {
    if !root.is_dir() {
        return None;
    }
    if !config.preserve_site_on_upgrade {
        debug!("not preserving site directories because of config");
        return None;
    }
    if opts.force || opts.repair {
        debug!("not preserving site directories because of --force/--repair");
        return None;
    }

    let staging_root = root.with_file_name(format!(
        "_{}",
        root.file_name().unwrap_or_default().to_string_lossy()
    ));
    fs::create_dir_all(&staging_root).ok();

    let mut moves = Vec::new();
    let mut counter = 0usize;
    for dirname in site_dirs_of(install) {
        let dir = root.join(&dirname);
        if !dir.is_dir() {
            continue;
        }
        let staged = staging_root.join(counter.to_string());
        counter += 1;
        rmtree(&staged, &[]).ok();
        echo!("Preserving {} during update.", dirname);
        match fs::rename(&dir, &staged) {
            Ok(()) => moves.push((dir, staged)),
            Err(err) => {
                warn!("failed to preserve {} during update: {}", dir.display(), err);
            }
        }
    }
    Some(PreservedSite {
        moves,
        staging_root,
    })
}

/// Restores preserved site directories over the fresh tree, never
/// overwriting files the new install created, then drops the staging
/// area.
fn restore_site(preserved: Option<PreservedSite>) {
    let Some(preserved) = preserved else {
        return;
    };
    for (dest, staged) in &preserved.moves {
        debug!("restoring {} from {}", dest.display(), staged.display());
        if let Err(err) = restore_tree(staged, dest) {
            warn!("failed to restore {} during update: {:#}", dest.display(), err);
        } else {
            echo!("Restored {}", dest.display());
        }
    }
    rmtree(&preserved.staging_root, &[]).ok();
}

fn restore_tree(src: &Path, dest: &Path) -> Result<(), Error> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)?.filter_map(|e| e.ok()) {
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if to.exists() {
            if from.is_dir() && to.is_dir() {
                restore_tree(&from, &to)?;
            } else {
                debug!("not restoring {} because it exists", to.display());
            }
            continue;
        }
        if fs::rename(&from, &to).is_err() {
            debug!("not restoring {}", to.display());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Metadata persistence

/// Merges `__install__.json` shipped inside the archive with the feed
/// entry (archive keys win), applies the shortcut kind filters, and
/// persists the result.
fn persist_metadata(
    config: &Config,
    source: &str,
    mut entry: Install,
    dest: &Path,
) -> Result<(), Error> {
    let meta_path = dest.join(INSTALL_METADATA);
    if meta_path.is_file() {
        match read_install_metadata(&meta_path) {
            Ok(bundled) => {
                debug!("updating from {} in {}", INSTALL_METADATA, dest.display());
                let mut merged = serde_json::to_value(&bundled)?;
                let from_feed = serde_json::to_value(&entry)?;
                if let (Some(merged), Some(from_feed)) =
                    (merged.as_object_mut(), from_feed.as_object())
                {
                    for (k, v) in from_feed {
                        let empty = match merged.get(k) {
                            None => true,
                            Some(serde_json::Value::Null) => true,
                            Some(serde_json::Value::String(s)) => s.is_empty(),
                            Some(serde_json::Value::Array(a)) => a.is_empty(),
                            Some(_) => false,
                        };
                        if empty {
                            merged.insert(k.clone(), v.clone());
                        }
                    }
                }
                entry = serde_json::from_value(merged)
                    .context("bundled install metadata is not usable")?;
            }
            Err(err) => {
                error!(
                    "invalid data found in bundled install data. \
                     Please report this to the provider of your package."
                );
                return Err(err);
            }
        }
    }

    // keep the unfiltered shortcut list so --repair can re-enable kinds
    if !entry.shortcuts.is_empty() && entry.original_shortcuts.is_none() {
        entry.original_shortcuts = Some(entry.shortcuts.clone());
    }
    if let Some(original) = &entry.original_shortcuts {
        entry.shortcuts = original
            .iter()
            .filter(|s| config.shortcut_kind_enabled(&s.kind))
            .cloned()
            .collect();
    }

    entry.url = sanitise_url(&entry.url);
    if config
        .fallback_source
        .as_deref()
        .map(|f| f != source)
        .unwrap_or(true)
    {
        entry.source = Some(sanitise_url(source));
    }
    entry.prefix = Some(dest.to_path_buf());

    debug!("writing {} to {}", INSTALL_METADATA, dest.display());
    let text = serde_json::to_string(&entry)?;
    fs::write(&meta_path, text)
        .with_context(|| format!("failed to write {}", meta_path.display()))?;
    Ok(())
}

/// Runs the full pipeline for one entry: download, verify, wipe,
/// extract, persist.  Registration happens afterwards for the whole
/// installed set.
fn install_one(
    session: &mut Session,
    config: &Config,
    opts: &InstallOptions,
    source: &str,
    entry: &Install,
    target: Option<&Path>,
    output: CommandOutput,
) -> Result<(), Error> {
    if opts.repair {
        echo!("Repairing {}.", entry.display_name());
    } else if opts.update {
        echo!("Updating to {}.", entry.display_name());
    } else {
        echo!("Installing {}.", entry.display_name());
    }
    echo!(if verbose output, "Tag: {}\\{}", entry.company, entry.tag);

    if opts.dry_run {
        echo!("Skipping rest of install due to --dry-run");
        return Ok(());
    }

    let package = package_path(&config.download_dir, entry);
    let package = download_package(session, config, entry, &package, opts.force, output)?;
    validate_package(entry, &package, false)?;

    let dest = match target {
        Some(target) => target.to_path_buf(),
        None => config.install_dir.join(&entry.id),
    };

    let preserved = preserve_site(config, &dest, entry, opts);

    if !opts.repair {
        match rmtree(&dest, &["exe", "dll", "json"]) {
            Ok(()) => {}
            Err(err) if err.downcast_ref::<FilesInUse>().is_some() => {
                error!(
                    "unable to remove the previous install because files are still in use. \
                     Please ensure Python is not currently running."
                );
                return Err(err);
            }
            Err(err) => {
                error!(
                    "unable to remove the previous install. Please check your packages \
                     directory at {} for issues.",
                    dest.parent().unwrap_or(&dest).display()
                );
                return Err(err);
            }
        }
    }

    extract_package(&package, &dest, opts.repair, output)?;

    if target.is_some() {
        // a plain extraction is not a managed install
        unlink(&dest.join(INSTALL_METADATA))?;
    } else {
        persist_metadata(config, source, entry.clone(), &dest)?;
    }

    restore_site(preserved);
    echo!(if verbose output, "Install complete");
    Ok(())
}

// ---------------------------------------------------------------------
// Offline index generation

fn merge_existing_index(versions: &mut Vec<serde_json::Value>, index_json: &Path) {
    let existing: serde_json::Value = match fs::read_to_string(index_json) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => {
                warn!("existing index file appeared invalid and was overwritten");
                return;
            }
        },
        Err(_) => return,
    };
    let Some(old) = existing.get("versions").and_then(|v| v.as_array()) else {
        warn!("existing index file appeared invalid and was overwritten");
        return;
    };
    debug!("merging into existing {}", index_json.display());
    let current: Vec<String> = versions
        .iter()
        .filter_map(|v| v.get("url").and_then(|u| u.as_str()))
        .map(|u| u.to_ascii_lowercase())
        .collect();
    for entry in old {
        let url = entry
            .get("url")
            .and_then(|u| u.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !current.contains(&url) {
            versions.push(entry.clone());
        }
    }
}

fn download_to_offline_index(
    session: &mut Session,
    config: &Config,
    opts: &InstallOptions,
    entries: &[Install],
    output: CommandOutput,
) -> Result<(), Error> {
    let dir = opts.download.as_ref().unwrap();
    if opts.force {
        rmtree(dir, &[])?;
    }
    fs::create_dir_all(dir)?;

    let mut versions: Vec<serde_json::Value> = Vec::new();
    for entry in entries {
        echo!("Downloading {}", entry.display_name());
        let package = package_path(&config.download_dir, entry);
        let package = download_package(session, config, entry, &package, opts.force, output)?;
        validate_package(entry, &package, false)?;
        let name = package.file_name().unwrap().to_string_lossy().into_owned();
        let dest = dir.join(&name);
        if package != dest {
            fs::copy(&package, &dest)
                .with_context(|| format!("failed to copy {}", package.display()))?;
        }
        let mut value = serde_json::to_value(entry)?;
        value["url"] = serde_json::json!(name);
        versions.push(value);
    }

    let index_json = dir.join("index.json");
    merge_existing_index(&mut versions, &index_json);
    let doc = serde_json::json!({ "versions": versions });
    fs::write(&index_json, serde_json::to_string_pretty(&doc)?)?;
    echo!("Offline index has been generated at {}", dir.display());
    echo!(
        "Use 'py install -s {} [tags ...]' to install from this index.",
        dir.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------

fn print_cli_shortcuts(config: &Config, installs: &[Install]) {
    if !installs.iter().any(|i| !i.unmanaged) {
        return;
    }
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    seen.insert("python.exe".to_string());
    for install in installs {
        if install.unmanaged {
            continue;
        }
        let aliases: Vec<_> = install
            .alias
            .iter()
            .filter(|a| seen.insert(a.name.to_ascii_lowercase()))
            .cloned()
            .collect();
        let names = crate::installs::get_install_alias_names(&aliases, false);
        if install.is_default && !names.is_empty() {
            echo!(
                "{} will be launched by python.exe and also {}",
                install.display_name(),
                names.join(", ")
            );
        } else if install.is_default {
            echo!("{} will be launched by python.exe.", install.display_name());
        } else if !names.is_empty() {
            echo!(
                "{} will be launched by {}",
                install.display_name(),
                names.join(", ")
            );
        } else if let Some(prefix) = &install.prefix {
            echo!(
                "Installed {} to {}",
                install.display_name(),
                prefix.display()
            );
        }
    }
    let _ = config;
}

fn sources_of(config: &Config, opts: &InstallOptions) -> Vec<String> {
    let mut rv = Vec::new();
    match &opts.source {
        Some(source) => rv.push(source.clone()),
        None => {
            rv.push(config.source.clone());
            if let Some(fallback) = &config.fallback_source {
                rv.push(fallback.clone());
            }
        }
    }
    rv
}

fn parse_requests(config: &Config, opts: &InstallOptions) -> Result<Vec<Request>, Error> {
    if opts.by_id {
        if opts.from_script.is_some() {
            bail!(ArgumentError(
                "cannot use --by-id and --from-script together".into()
            ));
        }
        if opts.tags.is_empty() {
            bail!(ArgumentError("one or more IDs are required with --by-id".into()));
        }
        return Ok(opts.tags.iter().map(|t| Request::Id(t.clone())).collect());
    }

    let mut requests = Vec::new();
    for arg in &opts.tags {
        let spec = if arg.eq_ignore_ascii_case("default") {
            debug!("replacing 'default' with '{}'", config.default_install_tag);
            config.default_install_tag.clone()
        } else {
            arg.clone()
        };
        match tag_or_range(&spec) {
            Ok(range) => requests.push(Request::Range(range)),
            Err(err) => warn!("{}", err),
        }
    }

    if let Some(script) = &opts.from_script {
        let installed = get_installs_with_default(config, true);
        let spec = match crate::scripts::find_install_from_script(
            &installed, config, script, false,
        ) {
            Ok(selected) => selected.install.tag_with_company(),
            Err(_) => config.default_install_tag.clone(),
        };
        requests.push(Request::Range(tag_or_range(&spec)?));
    }

    if requests.is_empty() && opts.automatic {
        requests.push(Request::Range(tag_or_range(&config.default_install_tag)?));
    }
    Ok(requests)
}

/// The `install` command.
pub fn execute(
    session: &mut Session,
    config: &Config,
    opts: &mut InstallOptions,
    output: CommandOutput,
) -> Result<(), Error> {
    if opts.refresh {
        if !opts.tags.is_empty() {
            warn!("ignoring arguments; --refresh always refreshes all installs");
        }
        if opts.dry_run {
            echo!("Skipping shortcut refresh due to --dry-run");
            return Ok(());
        }
        echo!("Refreshing install registrations.");
        let installed = get_installs_with_default(config, false);
        update_all_shortcuts(session, config, &installed, output);
        print_cli_shortcuts(config, &installed);
        return Ok(());
    }

    if opts.force {
        // --force always means a clean install
        opts.repair = false;
        opts.update = false;
    }

    if opts.automatic && !config.automatic_install {
        debug!("automatic_install is not set - exiting");
        return Err(Error::new(AutomaticInstallDisabled));
    }

    let sources = sources_of(config, opts);
    let requests = parse_requests(config, opts)?;

    if let Some(target) = opts.target.clone() {
        if requests.len() > 1 {
            bail!(ArgumentError(
                "unable to install multiple versions with --target".into()
            ));
        }
        let request = match requests.into_iter().next() {
            Some(request) => request,
            None => Request::Range(tag_or_range(&config.default_install_tag)?),
        };
        let entry = select_from_sources(session, config, &sources, &request, output)?;
        return install_one(session, config, opts, &sources[0], &entry, Some(&target), output);
    }

    let mut installed = get_installs_with_default(config, false);
    if opts.download.is_some() {
        // offline preparation never skips based on local installs
        installed.clear();
    }

    let mut to_install: Vec<Install> = Vec::new();

    if requests.is_empty() {
        if opts.repair {
            echo!(if verbose output, "No tags provided, repairing all installs:");
            for install in &installed {
                if install.unmanaged {
                    continue;
                }
                let mut chain: Vec<String> =
                    install.source.clone().into_iter().collect();
                chain.extend(sources.iter().cloned());
                let request = Request::Id(install.id.clone());
                let repaired = select_from_sources(session, config, &chain, &request, output)
                    .and_then(|entry| {
                        install_one(session, config, opts, &chain[0], &entry, None, output)
                    });
                if let Err(err) = repaired {
                    error!("failed to repair {}: {:#}", install.display_name(), err);
                }
            }
        } else if opts.update {
            echo!(if verbose output, "No tags provided, updating all installs:");
            for install in &installed {
                if install.unmanaged {
                    continue;
                }
                let mut chain: Vec<String> =
                    install.source.clone().into_iter().collect();
                chain.extend(sources.iter().cloned());
                let request = Request::Id(install.id.clone());
                let entry = match select_from_sources(session, config, &chain, &request, output) {
                    Ok(entry) => entry,
                    Err(err) => {
                        error!(
                            "failed to find a suitable update for {}: {:#}",
                            install.display_name(),
                            err
                        );
                        continue;
                    }
                };
                if entry.sort_version > install.sort_version {
                    if let Err(err) =
                        install_one(session, config, opts, &chain[0], &entry, None, output)
                    {
                        error!("failed to update {}: {:#}", install.display_name(), err);
                    }
                } else {
                    echo!(
                        if verbose output,
                        "No new version available for {}\\{} '{}'.",
                        install.company,
                        install.tag,
                        install.display_name()
                    );
                }
            }
        } else {
            bail!(ArgumentError(
                "specify at least one tag to install, or 'default' for the latest \
                 recommended release"
                    .into()
            ));
        }
    } else {
        for request in &requests {
            let entry = select_from_sources(session, config, &sources, request, output)
                .map_err(|err| {
                    if err.downcast_ref::<NoInstallFound>().is_some() {
                        error!(
                            "failed to find a suitable install for '{}'",
                            request.describe()
                        );
                    }
                    err
                })?;
            if let Some(entry) = decide_install(entry, request, &installed, opts) {
                to_install.push(entry);
            }
        }
    }

    if opts.download.is_some() {
        return download_to_offline_index(session, config, opts, &to_install, output);
    }

    // per-install failures do not stop the remaining targets, but the
    // first one still fails the command
    let mut first_exc: Option<Error> = None;
    for entry in &to_install {
        if let Err(err) = install_one(session, config, opts, &sources[0], entry, None, output) {
            if first_exc.is_some() {
                error!("failed to install {}: {:#}", entry.display_name(), err);
            } else {
                first_exc = Some(err);
            }
        }
    }
    if let Some(err) = first_exc {
        return Err(err);
    }

    if opts.dry_run {
        echo!("Skipping shortcut refresh due to --dry-run");
        return Ok(());
    }

    // registration covers the whole installed set, not just new entries
    let installed = get_installs_with_default(config, false);
    update_all_shortcuts(session, config, &installed, output);
    if !opts.automatic {
        print_cli_shortcuts(config, &installed);
    }
    Ok(())
}
