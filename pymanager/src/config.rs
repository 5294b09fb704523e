use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::{env, fs};

use anyhow::{anyhow, Context, Error};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

pub const DEFAULT_SOURCE_URL: &str = "https://www.python.org/ftp/python/index-windows.json";
pub const DEFAULT_TAG: &str = "3";
pub const DEFAULT_PLATFORM: &str = "-64";
pub const DEFAULT_PEP514_ROOT: &str = "Software\\Python";
pub const DEFAULT_START_FOLDER: &str = "Python";

static ENV_VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"%([A-Za-z0-9_]+)%").unwrap());

static CONFIG: Mutex<Option<Arc<Config>>> = Mutex::new(None);

/// Expands `%NAME%` environment references the way the configuration
/// file expects them on Windows.
pub fn expand_env_vars(string: &str) -> Cow<'_, str> {
    ENV_VAR_RE.replace_all(string, |m: &Captures| {
        env::var(&m[1]).unwrap_or_default()
    })
}

/// On-disk configuration (`pymanager.json`).  Every field is optional;
/// unset fields fall back to the defaults computed in `Config::load`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    install_dir: Option<String>,
    global_dir: Option<String>,
    download_dir: Option<String>,
    bundled_dir: Option<String>,
    default_tag: Option<String>,
    default_platform: Option<String>,
    automatic_install: Option<bool>,
    include_unmanaged: Option<bool>,
    preserve_site_on_upgrade: Option<bool>,
    virtual_env: Option<String>,
    pep514_root: Option<String>,
    start_folder: Option<String>,
    launcher_exe: Option<String>,
    launcherw_exe: Option<String>,
    welcome_on_update: Option<bool>,
    install: ConfigInstallSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigInstallSection {
    source: Option<String>,
    fallback_source: Option<String>,
    default_install_tag: Option<String>,
    enable_shortcut_kinds: Option<Vec<String>>,
    disable_shortcut_kinds: Option<Vec<String>>,
}

/// Fully resolved configuration threaded through every command.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub install_dir: PathBuf,
    pub global_dir: PathBuf,
    pub download_dir: PathBuf,
    pub bundled_dir: Option<PathBuf>,
    pub source: String,
    pub fallback_source: Option<String>,
    pub default_tag: String,
    pub default_install_tag: String,
    pub default_platform: String,
    pub automatic_install: bool,
    pub include_unmanaged: bool,
    pub preserve_site_on_upgrade: bool,
    pub virtual_env: Option<PathBuf>,
    pub pep514_root: String,
    pub start_folder: String,
    pub launcher_exe: PathBuf,
    pub launcherw_exe: PathBuf,
    pub enable_shortcut_kinds: Option<Vec<String>>,
    pub disable_shortcut_kinds: Vec<String>,
    pub welcome_on_update: bool,
}

fn default_root() -> Result<PathBuf, Error> {
    if let Some(root) = env::var_os("PYMANAGER_ROOT") {
        return Ok(PathBuf::from(root));
    }
    if cfg!(windows) {
        if let Some(local) = env::var_os("LocalAppData") {
            return Ok(PathBuf::from(local).join("Python"));
        }
    }
    home::home_dir()
        .map(|h| h.join(".pymanager"))
        .ok_or_else(|| anyhow!("cannot determine the manager's root directory"))
}

fn resolve(root: &Path, value: &str) -> PathBuf {
    let expanded = expand_env_vars(value);
    let p = Path::new(expanded.as_ref());
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

impl Config {
    /// Loads configuration from `PYMANAGER_CONFIG` or
    /// `<root>/pymanager.json`; a missing file yields the defaults.
    pub fn load() -> Result<Config, Error> {
        let root = default_root()?;
        let config_path = match env::var_os("PYMANAGER_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => root.join("pymanager.json"),
        };
        let file: ConfigFile = match fs::read_to_string(&config_path) {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("invalid configuration at {}", config_path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", config_path.display()))
            }
        };
        Config::from_file(root, file)
    }

    fn from_file(root: PathBuf, file: ConfigFile) -> Result<Config, Error> {
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| root.clone());
        let default_tag = file
            .default_tag
            .unwrap_or_else(|| DEFAULT_TAG.to_string());
        let virtual_env = file
            .virtual_env
            .map(|v| expand_env_vars(&v).into_owned())
            .or_else(|| env::var("VIRTUAL_ENV").ok())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Ok(Config {
            install_dir: resolve(&root, file.install_dir.as_deref().unwrap_or("pkgs")),
            global_dir: resolve(&root, file.global_dir.as_deref().unwrap_or("bin")),
            download_dir: resolve(&root, file.download_dir.as_deref().unwrap_or("pkgs")),
            bundled_dir: file.bundled_dir.as_deref().map(|d| resolve(&root, d)),
            source: file
                .install
                .source
                .map(|s| expand_env_vars(&s).into_owned())
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            fallback_source: file
                .install
                .fallback_source
                .map(|s| expand_env_vars(&s).into_owned()),
            default_install_tag: file
                .install
                .default_install_tag
                .unwrap_or_else(|| default_tag.clone()),
            default_tag,
            default_platform: file
                .default_platform
                .unwrap_or_else(|| DEFAULT_PLATFORM.to_string()),
            automatic_install: file.automatic_install.unwrap_or(true),
            include_unmanaged: file.include_unmanaged.unwrap_or(true),
            preserve_site_on_upgrade: file.preserve_site_on_upgrade.unwrap_or(true),
            virtual_env,
            pep514_root: file
                .pep514_root
                .unwrap_or_else(|| DEFAULT_PEP514_ROOT.to_string()),
            start_folder: file
                .start_folder
                .unwrap_or_else(|| DEFAULT_START_FOLDER.to_string()),
            launcher_exe: file
                .launcher_exe
                .map(|p| resolve(&root, &p))
                .unwrap_or_else(|| exe_dir.join("launcher.exe")),
            launcherw_exe: file
                .launcherw_exe
                .map(|p| resolve(&root, &p))
                .unwrap_or_else(|| exe_dir.join("launcherw.exe")),
            enable_shortcut_kinds: file.install.enable_shortcut_kinds,
            disable_shortcut_kinds: file.install.disable_shortcut_kinds.unwrap_or_default(),
            welcome_on_update: file.welcome_on_update.unwrap_or(false),
            root,
        })
    }

    /// Returns the current config, loading it on first use.
    pub fn current() -> Arc<Config> {
        let mut lock = CONFIG.lock().unwrap();
        if let Some(config) = &*lock {
            return config.clone();
        }
        let config = Arc::new(Config::load().expect("failed to load configuration"));
        *lock = Some(config.clone());
        config
    }

    /// Replaces the current config (used by tests and `--config`).
    pub fn make_current(config: Config) {
        *CONFIG.lock().unwrap() = Some(Arc::new(config));
    }

    /// True when a shortcut kind should be processed.
    pub fn shortcut_kind_enabled(&self, kind: &str) -> bool {
        if let Some(enabled) = &self.enable_shortcut_kinds {
            if !enabled.iter().any(|k| k.eq_ignore_ascii_case(kind)) {
                return false;
            }
        }
        !self
            .disable_shortcut_kinds
            .iter()
            .any(|k| k.eq_ignore_ascii_case(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_file(PathBuf::from("/tmp/x"), ConfigFile::default()).unwrap();
        assert_eq!(config.install_dir, Path::new("/tmp/x/pkgs"));
        assert_eq!(config.global_dir, Path::new("/tmp/x/bin"));
        assert_eq!(config.source, DEFAULT_SOURCE_URL);
        assert_eq!(config.default_tag, "3");
        assert_eq!(config.default_platform, "-64");
        assert!(config.automatic_install);
        assert!(config.shortcut_kind_enabled("pep514"));
    }

    #[test]
    fn test_shortcut_kind_filters() {
        let file: ConfigFile = serde_json::from_str(
            r#"{"install": {"enable_shortcut_kinds": ["start", "site-dirs"],
                             "disable_shortcut_kinds": ["start"]}}"#,
        )
        .unwrap();
        let config = Config::from_file(PathBuf::from("/tmp/x"), file).unwrap();
        assert!(!config.shortcut_kind_enabled("pep514"));
        assert!(!config.shortcut_kind_enabled("start"));
        assert!(config.shortcut_kind_enabled("site-dirs"));
    }

    #[test]
    fn test_expand_env_vars() {
        env::set_var("PYMANAGER_TEST_VALUE", "expanded");
        assert_eq!(
            expand_env_vars("before %PYMANAGER_TEST_VALUE% after"),
            "before expanded after"
        );
        assert_eq!(expand_env_vars("%PYMANAGER_MISSING_VALUE%"), "");
    }
}
