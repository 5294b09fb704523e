use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use configparser::ini::Ini;

use crate::config::Config;
use crate::errors::NoLauncherTemplate;
use crate::installs::Install;
use crate::session::Session;
use crate::tags::Tag;
use crate::utils::{ensure_tree, unlink, CommandOutput};

pub const TARGET_SIDECAR_SUFFIX: &str = ".__target__";
pub const SCRIPT_SIDECAR_SUFFIX: &str = ".__script__.py";

/// One alias to materialize in the global launcher directory.  Holds a
/// copied prefix and the owning install's id, never a pointer back into
/// the registry.
#[derive(Debug, Clone)]
pub struct AliasInfo {
    pub install_id: String,
    pub prefix: PathBuf,
    pub platform: String,
    pub name: String,
    pub windowed: bool,
    pub target: PathBuf,
    pub script_code: Option<String>,
}

fn ensure_exe_suffix(name: &str) -> String {
    if name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".exe") {
        name.to_string()
    } else {
        format!("{}.exe", name)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_dotted_identifier(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

/// The generated script relocates argv[0] to the launcher that invoked
/// it before handing control to the declared entry point.
fn entrypoint_script(module: &str, func: &str) -> String {
    format!(
        "import sys\n\
         if len(sys.orig_argv) > 1:\n\
         \x20   sys.argv[0] = sys.orig_argv[1]\n\
         \x20   sys.path[0] = sys.argv[0].rpartition(\"\\\\\")[0]\n\
         from {module} import {func}\n\
         sys.exit({func}())\n"
    )
}

/// Parses one `entry_points.txt`, yielding `(name, windowed, module,
/// function)` for the `[console_scripts]` and `[gui_scripts]` sections.
fn parse_entry_points(contents: &str) -> Vec<(String, bool, String, String)> {
    let mut ini = Ini::new_cs();
    let map = match ini.read(contents.to_string()) {
        Ok(map) => map,
        Err(err) => {
            debug!("unparseable entry_points.txt: {}", err);
            return Vec::new();
        }
    };
    let mut rv = Vec::new();
    for (section, windowed) in [("console_scripts", false), ("gui_scripts", true)] {
        let Some(entries) = map.get(section) else {
            continue;
        };
        // the parser hands back unordered maps; keep the sweep stable
        let mut entries: Vec<_> = entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in entries {
            let Some(value) = value else { continue };
            let Some((module, func)) = value.split_once(':') else {
                continue;
            };
            let module = module.trim();
            // extras like `[extra1]` may trail the function name
            let func = func.split('[').next().unwrap_or("").trim();
            if module.is_empty() || func.is_empty() {
                continue;
            }
            if !is_dotted_identifier(module) || !is_identifier(func) {
                warn!(
                    "skipping entry point '{}' because '{}:{}' is not importable",
                    name, module, func
                );
                continue;
            }
            rv.push((name.clone(), windowed, module.to_string(), func.to_string()));
        }
    }
    rv
}

/// Scans an install's site directories for entry point declarations.
/// Every result stays paired with the originating install.
pub fn scan_entrypoints(
    install: &Install,
    dirs: &[String],
) -> Vec<(String, bool, String, String)> {
    let mut rv = Vec::new();
    let Some(prefix) = &install.prefix else {
        return rv;
    };
    for dirname in dirs {
        let root = prefix.join(dirname);
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_dist_info = path.is_dir()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_ascii_lowercase().ends_with(".dist-info"))
                    .unwrap_or(false);
            if !is_dist_info {
                continue;
            }
            let ep = path.join("entry_points.txt");
            let contents = match fs::read_to_string(&ep) {
                Ok(contents) => contents,
                Err(_) => continue,
            };
            debug!("scanning {}", ep.display());
            rv.extend(parse_entry_points(&contents));
        }
    }
    rv
}

fn tag_platform(tag: &str) -> String {
    tag.parse::<Tag>()
        .map(|t| t.platform().to_string())
        .unwrap_or_default()
}

/// The default site directories scanned when an install declares none.
pub const DEFAULT_SITE_DIRS: &[&str] = &["Lib/site-packages", "Scripts"];

fn site_dirs_for(install: &Install) -> Vec<String> {
    for shortcut in &install.shortcuts {
        if shortcut.kind == "site-dirs" {
            if let Some(dirs) = shortcut.dirs() {
                return dirs;
            }
        }
    }
    DEFAULT_SITE_DIRS.iter().map(|s| s.to_string()).collect()
}

/// Computes the desired alias set for the given installs: explicit
/// aliases with live targets, the synthesized `python`/`pythonw` pair
/// for the default install, and entry point aliases when enabled.
/// Collisions resolve first-writer-wins, case-insensitively.
pub fn compute_alias_set(
    session: &mut Session,
    config: &Config,
    installs: &[Install],
) -> Vec<AliasInfo> {
    let mut rv = Vec::new();

    for install in installs {
        if install.unmanaged {
            continue;
        }
        let Some(prefix) = install.prefix.clone() else {
            continue;
        };
        let platform = tag_platform(&install.tag);

        let mut aliases = install.alias.clone();
        if install.is_default {
            // keep a plain python.exe working even if the versioned
            // aliases are later removed
            let plain = aliases.iter().find(|a| !a.windowed).cloned();
            let windowed = aliases.iter().find(|a| a.windowed).cloned();
            if let Some(mut a) = plain.clone() {
                a.name = "python.exe".to_string();
                aliases.push(a);
            }
            if let Some(mut a) = windowed.or(plain) {
                a.name = "pythonw.exe".to_string();
                a.windowed = true;
                aliases.push(a);
            }
        }

        for alias in &aliases {
            let name = ensure_exe_suffix(&alias.name);
            let target = prefix.join(&alias.target);
            if !target.is_file() {
                warn!(
                    "skipping alias '{}' because target '{}' does not exist",
                    alias.name, alias.target
                );
                continue;
            }
            if !session.aliases_written.insert(name.to_ascii_lowercase()) {
                continue;
            }
            rv.push(AliasInfo {
                install_id: install.id.clone(),
                prefix: prefix.clone(),
                platform: platform.clone(),
                name,
                windowed: alias.windowed,
                target,
                script_code: None,
            });
        }

        if !config.shortcut_kind_enabled("site-dirs") {
            continue;
        }

        // entry points bind to the install's own alias targets
        let plain = install.alias.iter().find(|a| !a.windowed);
        let windowed = install.alias.iter().find(|a| a.windowed).or(plain);
        let Some(plain) = plain else {
            debug!("no suitable alias for {}; skipping entry points", install.id);
            continue;
        };
        let windowed = windowed.unwrap();

        for (name, wants_windowed, module, func) in
            scan_entrypoints(install, &site_dirs_for(install))
        {
            if !session.entrypoints_seen.insert(name.to_ascii_lowercase()) {
                continue;
            }
            let name = ensure_exe_suffix(&name);
            if !session.aliases_written.insert(name.to_ascii_lowercase()) {
                continue;
            }
            let source = if wants_windowed { windowed } else { plain };
            rv.push(AliasInfo {
                install_id: install.id.clone(),
                prefix: prefix.clone(),
                platform: platform.clone(),
                name,
                windowed: wants_windowed,
                target: prefix.join(&source.target),
                script_code: Some(entrypoint_script(&module, &func)),
            });
        }
    }

    rv
}

fn with_platform(launcher: &Path, platform: &str) -> PathBuf {
    let stem = launcher
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = launcher
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    launcher.with_file_name(format!("{}{}{}", stem, platform, ext))
}

/// Picks the launcher template for an alias: the install's platform
/// variant, then the default platform, then `-64`, then the plain
/// template.
fn select_launcher(config: &Config, info: &AliasInfo) -> Option<PathBuf> {
    let base = if info.windowed {
        &config.launcherw_exe
    } else {
        &config.launcher_exe
    };
    let mut candidates = Vec::new();
    if !info.platform.is_empty() {
        candidates.push(with_platform(base, &info.platform));
    }
    if !config.default_platform.is_empty() {
        candidates.push(with_platform(base, &config.default_platform));
    }
    candidates.push(with_platform(base, "-64"));
    candidates.push(base.clone());
    candidates.into_iter().find(|c| c.is_file())
}

fn read_leading_bytes(path: &Path, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Ok(file) = fs::File::open(path) {
        file.take(limit as u64).read_to_end(&mut buf).ok();
    }
    buf
}

/// Materializes one alias: the launcher copy or hard link, the
/// `__target__` sidecar, and the optional `__script__.py`.
pub fn create_alias(
    session: &mut Session,
    config: &Config,
    info: &AliasInfo,
    output: CommandOutput,
) -> Result<(), Error> {
    let p = config.global_dir.join(&info.name);
    ensure_tree(&p)?;

    let launcher = select_launcher(config, info).ok_or_else(|| {
        Error::new(NoLauncherTemplate {
            alias: info.name.clone(),
        })
    })?;
    debug!(
        "create {} linking to {} using {}",
        info.name,
        info.target.display(),
        launcher.display()
    );

    let launcher_key = launcher.to_string_lossy().into_owned();
    let launcher_bytes = match fs::read(&launcher) {
        Ok(bytes) => bytes,
        Err(err) => {
            session.warn_once(
                &format!("launcher-read:{}", launcher_key),
                &format!("failed to read launcher template at {}", launcher.display()),
            );
            return Err(err)
                .with_context(|| format!("failed to read {}", launcher.display()));
        }
    };

    let existing = read_leading_bytes(&p, launcher_bytes.len() + 1);
    if existing == launcher_bytes {
        // valid existing launcher; remember it as a hard link source
        session
            .launcher_remap
            .entry(launcher_key.clone())
            .or_insert_with(|| p.clone());
    } else {
        unlink(&p)?;
        match fs::hard_link(&launcher, &p) {
            Ok(()) => {
                debug!("created {} as hard link to {}", info.name, launcher.display());
            }
            Err(err) => {
                // 17 is ERROR_NOT_SAME_DEVICE, 18 is EXDEV; anything
                // else is unexpected but the copy fallback still applies
                if !matches!(err.raw_os_error(), Some(17) | Some(18)) {
                    debug!("failed to hard link alias: {}", err);
                }
                let mut linked = false;
                if let Some(copy) = session.launcher_remap.get(&launcher_key) {
                    if fs::hard_link(copy, &p).is_ok() {
                        debug!("created {} as hard link to {}", info.name, copy.display());
                        linked = true;
                    }
                }
                if !linked {
                    fs::write(&p, &launcher_bytes)
                        .with_context(|| format!("failed to create alias {}", info.name))?;
                    debug!("created {} as copy of {}", info.name, launcher.display());
                    session.launcher_remap.insert(launcher_key, p.clone());
                }
            }
        }
    }

    let target_sidecar = sidecar(&p, TARGET_SIDECAR_SUFFIX);
    let target_text = info.target.to_string_lossy().into_owned();
    let update = fs::read_to_string(&target_sidecar)
        .map(|existing| existing != target_text)
        .unwrap_or(true);
    if update {
        fs::write(&target_sidecar, &target_text)
            .with_context(|| format!("failed to write {}", target_sidecar.display()))?;
    }

    let script_sidecar = sidecar(&p, SCRIPT_SIDECAR_SUFFIX);
    match &info.script_code {
        Some(code) => {
            let update = fs::read_to_string(&script_sidecar)
                .map(|existing| &existing != code)
                .unwrap_or(true);
            if update {
                fs::write(&script_sidecar, code)
                    .with_context(|| format!("failed to write {}", script_sidecar.display()))?;
            }
        }
        None => {
            unlink(&script_sidecar)?;
        }
    }

    echo!(if verbose output, "Created global alias {}", info.name);
    Ok(())
}

fn sidecar(alias: &Path, suffix: &str) -> PathBuf {
    let name = alias.file_name().unwrap_or_default().to_string_lossy();
    alias.with_file_name(format!("{}{}", name, suffix))
}

/// Removes an alias executable with a rename-then-delete so an in-use
/// launcher does not wedge the sweep.
fn remove_alias_file(path: &Path) {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    let tmp = path.with_file_name(format!("{}.__del__", name));
    let removed = match fs::rename(path, &tmp) {
        Ok(()) => fs::remove_file(&tmp).is_ok(),
        Err(_) => fs::remove_file(path).is_ok(),
    };
    if !removed {
        warn!("failed to remove {}", path.display());
    }
}

/// Deletes every launcher in the global directory whose name is not in
/// the desired set, together with its sidecars.
pub fn cleanup_aliases(config: &Config, desired: &HashSet<String>, output: CommandOutput) {
    let entries = match fs::read_dir(&config.global_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        if name.ends_with(".__del__") {
            fs::remove_file(&path).ok();
            continue;
        }
        if !name.to_ascii_lowercase().ends_with(".exe") {
            continue;
        }
        if desired.contains(&name.to_ascii_lowercase()) {
            continue;
        }
        echo!(if verbose output, "Removing stale alias {}", name);
        remove_alias_file(&path);
        unlink(&sidecar(&path, TARGET_SIDECAR_SUFFIX)).ok();
        unlink(&sidecar(&path, SCRIPT_SIDECAR_SUFFIX)).ok();
    }
}

/// Reconciles the global launcher directory against the installed set.
pub fn sync_aliases(
    session: &mut Session,
    config: &Config,
    installs: &[Install],
    output: CommandOutput,
) {
    debug!("updating global aliases");
    session.aliases_written.clear();
    session.entrypoints_seen.clear();

    let desired = compute_alias_set(session, config, installs);
    let mut keep: HashSet<String> = HashSet::new();
    for info in &desired {
        match create_alias(session, config, info, output) {
            Ok(()) => {
                keep.insert(info.name.to_ascii_lowercase());
            }
            Err(err) => {
                if err.downcast_ref::<NoLauncherTemplate>().is_some() {
                    warn!(
                        "skipping {} because the launcher template was not found",
                        info.name
                    );
                } else {
                    warn!("failed to create alias {}: {:#}", info.name, err);
                }
            }
        }
    }

    cleanup_aliases(config, &keep, output);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry_points() {
        let text = "\
[console_scripts]
a = a:main
b-cli = pkg.sub:run
broken = not-a-module:main
alsobad = pkg:not a func

[gui_scripts]
aw = a:main

[other]
ignored = x:y
";
        let parsed = parse_entry_points(text);
        assert_eq!(
            parsed,
            vec![
                ("a".into(), false, "a".into(), "main".into()),
                ("b-cli".into(), false, "pkg.sub".into(), "run".into()),
                ("aw".into(), true, "a".into(), "main".into()),
            ]
        );
    }

    #[test]
    fn test_entrypoint_script_shape() {
        let script = entrypoint_script("a", "main");
        let lines: Vec<&str> = script
            .lines()
            .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
            .collect();
        assert_eq!(lines[lines.len() - 2], "from a import main");
        assert_eq!(lines[lines.len() - 1], "sys.exit(main())");
        assert!(lines[0].starts_with("import sys"));
    }

    #[test]
    fn test_identifier_checks() {
        assert!(is_identifier("main"));
        assert!(is_identifier("_private2"));
        assert!(!is_identifier("2start"));
        assert!(!is_identifier("has-dash"));
        assert!(is_dotted_identifier("pkg.sub.mod"));
        assert!(!is_dotted_identifier("pkg..mod"));
        assert!(!is_dotted_identifier(""));
    }

    #[test]
    fn test_with_platform() {
        assert_eq!(
            with_platform(Path::new("/x/launcher.exe"), "-arm64"),
            Path::new("/x/launcher-arm64.exe")
        );
    }

    #[test]
    fn test_ensure_exe_suffix() {
        assert_eq!(ensure_exe_suffix("a"), "a.exe");
        assert_eq!(ensure_exe_suffix("python3.13.exe"), "python3.13.exe");
        assert_eq!(ensure_exe_suffix("UPPER.EXE"), "UPPER.EXE");
    }

    fn test_config(root: &Path) -> Config {
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
            launcher_exe: root.join("launcher.exe"),
            launcherw_exe: root.join("launcherw.exe"),
            enable_shortcut_kinds: None,
            disable_shortcut_kinds: Vec::new(),
            welcome_on_update: false,
        }
    }

    fn fake_install(root: &Path, id: &str, tag: &str, default: bool) -> Install {
        let prefix = root.join("pkgs").join(id);
        fs::create_dir_all(&prefix).unwrap();
        fs::write(prefix.join("python.exe"), b"runtime").unwrap();
        fs::write(prefix.join("pythonw.exe"), b"runtime-w").unwrap();
        let mut install: Install = serde_json::from_value(serde_json::json!({
            "id": id,
            "company": "PythonCore",
            "tag": tag,
            "sort-version": "3.13.0",
            "executable": "python.exe",
            "alias": [
                {"name": format!("python{}.exe", tag), "target": "python.exe"},
                {"name": format!("pythonw{}.exe", tag), "target": "pythonw.exe", "windowed": 1},
            ],
        }))
        .unwrap();
        install.prefix = Some(prefix);
        install.is_default = default;
        install
    }

    #[test]
    fn test_compute_alias_set_synthesizes_default_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let install = fake_install(dir.path(), "PythonCore-3.13", "3.13", true);
        let mut session = Session::new();
        let set = compute_alias_set(&mut session, &config, &[install]);
        let names: Vec<&str> = set.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            names,
            ["python3.13.exe", "pythonw3.13.exe", "python.exe", "pythonw.exe"]
        );
        let python = set.iter().find(|i| i.name == "python.exe").unwrap();
        assert!(python.target.ends_with("python.exe"));
        let pythonw = set.iter().find(|i| i.name == "pythonw.exe").unwrap();
        assert!(pythonw.target.ends_with("pythonw.exe"));
        assert!(pythonw.windowed);
    }

    #[test]
    fn test_compute_alias_set_first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let a = fake_install(dir.path(), "PythonCore-3.13-64", "3.13", false);
        let b = fake_install(dir.path(), "PythonCore-3.13-32", "3.13", false);
        let mut session = Session::new();
        let set = compute_alias_set(&mut session, &config, &[a, b]);
        let count = set.iter().filter(|i| i.name == "python3.13.exe").count();
        assert_eq!(count, 1);
        assert_eq!(set[0].install_id, "PythonCore-3.13-64");
    }

    #[test]
    fn test_compute_alias_set_skips_missing_targets() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut install = fake_install(dir.path(), "PythonCore-3.13", "3.13", false);
        install.alias.push(crate::installs::AliasEntry {
            name: "idle3.13.exe".into(),
            target: "idle.exe".into(),
            windowed: false,
        });
        let mut session = Session::new();
        let set = compute_alias_set(&mut session, &config, &[install]);
        assert!(set.iter().all(|i| i.name != "idle3.13.exe"));
    }

    #[test]
    fn test_entrypoint_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let install = fake_install(dir.path(), "PythonCore-3.13", "3.13", false);
        let site = install
            .prefix
            .as_ref()
            .unwrap()
            .join("Lib/site-packages/A.dist-info");
        fs::create_dir_all(&site).unwrap();
        fs::write(
            site.join("entry_points.txt"),
            "[console_scripts]\na = a:main\n\n[gui_scripts]\naw = a:main\n",
        )
        .unwrap();
        let mut session = Session::new();
        let set = compute_alias_set(&mut session, &config, &[install]);
        let a = set.iter().find(|i| i.name == "a.exe").unwrap();
        assert!(a.script_code.is_some());
        assert!(!a.windowed);
        assert!(a.target.ends_with("python.exe"));
        let aw = set.iter().find(|i| i.name == "aw.exe").unwrap();
        assert!(aw.windowed);
        assert!(aw.target.ends_with("pythonw.exe"));
    }

    #[test]
    fn test_sync_aliases_materializes_and_cleans() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        fs::write(&config.launcher_exe, b"LAUNCHER").unwrap();
        fs::write(&config.launcherw_exe, b"LAUNCHERW").unwrap();
        fs::create_dir_all(&config.global_dir).unwrap();
        // a stale alias from a previous run
        fs::write(config.global_dir.join("old.exe"), b"LAUNCHER").unwrap();
        fs::write(config.global_dir.join("old.exe.__target__"), "gone").unwrap();

        let install = fake_install(dir.path(), "PythonCore-3.13", "3.13", true);
        let mut session = Session::new();
        sync_aliases(
            &mut session,
            &config,
            std::slice::from_ref(&install),
            CommandOutput::Quiet,
        );

        for name in ["python3.13.exe", "pythonw3.13.exe", "python.exe", "pythonw.exe"] {
            let alias = config.global_dir.join(name);
            assert!(alias.is_file(), "missing {}", name);
            let target = fs::read_to_string(sidecar(&alias, TARGET_SIDECAR_SUFFIX)).unwrap();
            assert!(
                Path::new(&target).starts_with(install.prefix.as_ref().unwrap()),
                "target {} outside prefix",
                target
            );
        }
        assert!(!config.global_dir.join("old.exe").exists());
        assert!(!config.global_dir.join("old.exe.__target__").exists());

        // running the sync twice is byte-for-byte idempotent
        let before: Vec<(String, Vec<u8>)> = read_dir_sorted(&config.global_dir);
        let mut session = Session::new();
        sync_aliases(
            &mut session,
            &config,
            std::slice::from_ref(&install),
            CommandOutput::Quiet,
        );
        assert_eq!(before, read_dir_sorted(&config.global_dir));
    }

    fn read_dir_sorted(dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut rv: Vec<(String, Vec<u8>)> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| {
                (
                    e.file_name().to_string_lossy().into_owned(),
                    fs::read(e.path()).unwrap(),
                )
            })
            .collect();
        rv.sort();
        rv
    }
}
