//! The Windows collaborators the core consumes: PEP 514 registry
//! entries, Add/Remove Programs, Start menu shortcuts, the per-user
//! PATH, and app-execution-alias inspection.  A port to another OS
//! replaces this module; the portable build compiles them as no-ops so
//! the engines above stay testable anywhere.

use std::path::Path;

use anyhow::Error;

use crate::config::Config;
use crate::installs::{Install, Shortcut};
use crate::session::Session;

#[cfg(windows)]
pub use self::imp::*;
#[cfg(not(windows))]
pub use self::stub::*;

#[cfg(windows)]
mod imp {
    use super::*;
    use std::ffi::OsString;
    use std::os::windows::ffi::{OsStrExt, OsStringExt};
    use std::path::PathBuf;
    use std::process::Command;
    use std::{env, fs, io};

    use winreg::enums::{
        RegType, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_READ, KEY_WRITE,
    };
    use winreg::{RegKey, RegValue};

    const ARP_ROOT: &str = r"Software\Microsoft\Windows\CurrentVersion\Uninstall";

    /// Convert a vector of UCS-2 chars to a null-terminated UCS-2 string in bytes
    fn to_winreg_bytes(mut v: Vec<u16>) -> Vec<u8> {
        v.push(0);
        unsafe { std::slice::from_raw_parts(v.as_ptr().cast::<u8>(), v.len() * 2).to_vec() }
    }

    /// Decodes a REG_SZ/REG_EXPAND_SZ registry value; None for other
    /// kinds, which we refuse to modify.
    fn from_winreg_value(val: &winreg::RegValue) -> Option<Vec<u16>> {
        use std::slice;
        match val.vtype {
            RegType::REG_SZ | RegType::REG_EXPAND_SZ => {
                let mut words = unsafe {
                    #[allow(clippy::cast_ptr_alignment)]
                    slice::from_raw_parts(val.bytes.as_ptr().cast::<u16>(), val.bytes.len() / 2)
                        .to_owned()
                };
                while words.last() == Some(&0) {
                    words.pop();
                }
                Some(words)
            }
            _ => None,
        }
    }

    pub fn broadcast_settings_change() {
        use std::ptr;
        use winapi::shared::minwindef::*;
        use winapi::um::winuser::{
            SendMessageTimeoutA, HWND_BROADCAST, SMTO_ABORTIFHUNG, WM_SETTINGCHANGE,
        };
        #[allow(clippy::unnecessary_cast)]
        unsafe {
            SendMessageTimeoutA(
                HWND_BROADCAST,
                WM_SETTINGCHANGE,
                0 as WPARAM,
                "Environment\0".as_ptr() as LPARAM,
                SMTO_ABORTIFHUNG,
                5000,
                ptr::null_mut(),
            );
        }
    }

    fn get_windows_path_var() -> Result<Option<Vec<u16>>, Error> {
        let root = RegKey::predef(HKEY_CURRENT_USER);
        let environment = root.open_subkey_with_flags("Environment", KEY_READ | KEY_WRITE)?;
        match environment.get_raw_value("Path") {
            Ok(val) => {
                if let Some(s) = from_winreg_value(&val) {
                    Ok(Some(s))
                } else {
                    warn!(
                        "the registry key HKEY_CURRENT_USER\\Environment\\Path is not a string. \
                         Not modifying the PATH variable"
                    );
                    Ok(None)
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(Some(Vec::new())),
            Err(e) => Err(e.into()),
        }
    }

    fn apply_new_path(new_path: Option<Vec<u16>>) -> Result<bool, Error> {
        let new_path = match new_path {
            Some(new_path) => new_path,
            None => return Ok(false),
        };
        let root = RegKey::predef(HKEY_CURRENT_USER);
        let environment = root.open_subkey_with_flags("Environment", KEY_READ | KEY_WRITE)?;
        if new_path.is_empty() {
            environment.delete_value("Path")?;
        } else {
            let reg_value = RegValue {
                bytes: to_winreg_bytes(new_path),
                vtype: RegType::REG_EXPAND_SZ,
            };
            environment.set_raw_value("Path", &reg_value)?;
        }
        broadcast_settings_change();
        Ok(true)
    }

    /// Appends the global launcher directory to the per-user PATH.
    pub fn add_global_dir_to_path(config: &Config) -> Result<bool, Error> {
        let dir: Vec<u16> = config.global_dir.as_os_str().encode_wide().collect();
        let old_path = match get_windows_path_var()? {
            Some(p) => p,
            None => return Ok(false),
        };
        if old_path
            .split(|&c| c == b';' as u16)
            .any(|p| eq_wide_ignore_case(p, &dir))
        {
            return Ok(false);
        }
        let mut new_path = old_path.clone();
        if !new_path.is_empty() && new_path.last() != Some(&(b';' as u16)) {
            new_path.push(b';' as u16);
        }
        new_path.extend_from_slice(&dir);
        apply_new_path(Some(new_path))
    }

    /// Removes every PATH entry equal to the global launcher directory.
    pub fn remove_global_dir_from_path(config: &Config) -> Result<bool, Error> {
        let dir: Vec<u16> = config.global_dir.as_os_str().encode_wide().collect();
        let old_path = match get_windows_path_var()? {
            Some(p) => p,
            None => return Ok(false),
        };
        let parts: Vec<&[u16]> = old_path.split(|&c| c == b';' as u16).collect();
        let kept: Vec<&[u16]> = parts
            .iter()
            .filter(|p| !eq_wide_ignore_case(p, &dir))
            .copied()
            .collect();
        if kept.len() == parts.len() {
            return Ok(false);
        }
        let mut new_path: Vec<u16> = Vec::new();
        for (i, p) in kept.iter().enumerate() {
            if i > 0 {
                new_path.push(b';' as u16);
            }
            new_path.extend_from_slice(p);
        }
        apply_new_path(Some(new_path))
    }

    fn eq_wide_ignore_case(a: &[u16], b: &[u16]) -> bool {
        let a = OsString::from_wide(a);
        let b = OsString::from_wide(b);
        a.to_string_lossy()
            .trim()
            .eq_ignore_ascii_case(b.to_string_lossy().trim())
    }

    /// Whether the per-user Environment\Path value mentions `dir`.
    pub fn registry_path_contains(dir: &Path) -> Option<bool> {
        let environment = RegKey::predef(HKEY_CURRENT_USER)
            .open_subkey("Environment")
            .ok()?;
        let path: String = environment.get_value("Path").ok()?;
        let expanded = crate::config::expand_env_vars(&path);
        let wanted = dir.to_string_lossy();
        Some(
            expanded
                .split(';')
                .any(|p| p.trim().eq_ignore_ascii_case(wanted.trim())),
        )
    }

    /// HKLM\...\FileSystem\LongPathsEnabled == 1
    pub fn long_paths_enabled() -> Option<bool> {
        let key = RegKey::predef(HKEY_LOCAL_MACHINE)
            .open_subkey(r"System\CurrentControlSet\Control\FileSystem")
            .ok()?;
        let value: u32 = key.get_value("LongPathsEnabled").ok()?;
        Some(value == 1)
    }

    // ------------------------------------------------------------------
    // PEP 514 registration

    fn pep514_key(config: &Config, company: &str, tag: &str) -> String {
        format!("{}\\{}\\{}", config.pep514_root, company, tag)
    }

    pub fn pep514_create(
        session: &mut Session,
        config: &Config,
        install: &Install,
    ) -> Result<(), Error> {
        let root = RegKey::predef(HKEY_CURRENT_USER);
        let path = pep514_key(config, &install.company, &install.tag);

        if let Ok(existing) = root.open_subkey(&path) {
            let managed: Result<u32, _> = existing.get_value("ManagedByPyManager");
            if !managed.map(|v| v == 1).unwrap_or(false) {
                session.warn_once(
                    &format!("pep514:{}", path),
                    &format!(
                        "a runtime is already registered at {} and will not be modified",
                        path
                    ),
                );
                return Ok(());
            }
        }

        let (key, _) = root.create_subkey(&path)?;
        key.set_value("DisplayName", &install.display_name())?;
        key.set_value("SupportUrl", &"https://www.python.org/")?;
        key.set_value("Version", &install.sort_version.to_string())?;
        key.set_value("ManagedByPyManager", &1u32)?;

        if let Some(prefix) = &install.prefix {
            let (install_path, _) = key.create_subkey("InstallPath")?;
            install_path.set_value("", &prefix.display().to_string())?;
            install_path.set_value(
                "ExecutablePath",
                &install.executable_path().display().to_string(),
            )?;
            let windowed = crate::resolver::select_executable(install, true);
            install_path.set_value("WindowedExecutablePath", &windowed.display().to_string())?;
        }
        debug!("registered {} under {}", install.id, path);
        Ok(())
    }

    pub fn pep514_cleanup(config: &Config, keep: &[(String, String)]) -> Result<(), Error> {
        let root = RegKey::predef(HKEY_CURRENT_USER);
        let base = match root.open_subkey(&config.pep514_root) {
            Ok(base) => base,
            Err(_) => return Ok(()),
        };
        let companies: Vec<String> = base.enum_keys().filter_map(|k| k.ok()).collect();
        for company in companies {
            let company_key = match base.open_subkey(&company) {
                Ok(k) => k,
                Err(_) => continue,
            };
            let tags: Vec<String> = company_key.enum_keys().filter_map(|k| k.ok()).collect();
            for tag in tags {
                let kept = keep.iter().any(|(c, t)| {
                    c.eq_ignore_ascii_case(&company) && t.eq_ignore_ascii_case(&tag)
                });
                if kept {
                    continue;
                }
                let managed = company_key
                    .open_subkey(&tag)
                    .ok()
                    .and_then(|k| k.get_value::<u32, _>("ManagedByPyManager").ok())
                    .map(|v| v == 1)
                    .unwrap_or(false);
                if !managed {
                    continue;
                }
                debug!("removing PEP 514 key {}\\{}", company, tag);
                company_key.delete_subkey_all(&tag).ok();
            }
            // drop the company container once it has no tags left
            if company_key.enum_keys().next().is_none() {
                base.delete_subkey(&company).ok();
            }
        }
        Ok(())
    }

    /// Runtimes registered by other installers, surfaced read-only.
    pub fn find_unmanaged_runtimes() -> Vec<Install> {
        let mut rv = Vec::new();
        for (hive, root) in [
            (HKEY_CURRENT_USER, r"Software\Python"),
            (HKEY_LOCAL_MACHINE, r"Software\Python"),
        ] {
            let base = match RegKey::predef(hive).open_subkey(root) {
                Ok(base) => base,
                Err(_) => continue,
            };
            for company in base.enum_keys().filter_map(|k| k.ok()) {
                let company_key = match base.open_subkey(&company) {
                    Ok(k) => k,
                    Err(_) => continue,
                };
                for tag in company_key.enum_keys().filter_map(|k| k.ok()) {
                    let tag_key = match company_key.open_subkey(&tag) {
                        Ok(k) => k,
                        Err(_) => continue,
                    };
                    let managed: Result<u32, _> = tag_key.get_value("ManagedByPyManager");
                    if managed.map(|v| v == 1).unwrap_or(false) {
                        continue;
                    }
                    let Ok(install_path) = tag_key.open_subkey("InstallPath") else {
                        continue;
                    };
                    let prefix: String = match install_path.get_value("") {
                        Ok(p) => p,
                        Err(_) => continue,
                    };
                    let executable: String = install_path
                        .get_value("ExecutablePath")
                        .unwrap_or_else(|_| {
                            format!("{}\\python.exe", prefix.trim_end_matches('\\'))
                        });
                    if !Path::new(&executable).is_file() {
                        continue;
                    }
                    let display: String = tag_key
                        .get_value("DisplayName")
                        .unwrap_or_else(|_| format!("{} {}", company, tag));
                    let sort_version = tag
                        .parse::<crate::tags::Tag>()
                        .map(|t| t.version().clone())
                        .unwrap_or_else(|_| "0".parse().unwrap());
                    rv.push(Install {
                        schema: None,
                        id: format!("__unmanaged-{}-{}", company, tag),
                        company: company.clone(),
                        tag: tag.clone(),
                        sort_version,
                        display_name: display,
                        install_for: vec![tag.clone()],
                        run_for: Vec::new(),
                        alias: Vec::new(),
                        shortcuts: Vec::new(),
                        url: String::new(),
                        hash: None,
                        executable: executable.clone(),
                        executablew: None,
                        prefix: Some(PathBuf::from(prefix)),
                        source: None,
                        is_default: false,
                        unmanaged: true,
                        original_shortcuts: None,
                        extra: serde_json::Map::new(),
                    });
                }
            }
        }
        rv
    }

    // ------------------------------------------------------------------
    // Add/Remove Programs

    pub fn arp_create(
        config: &Config,
        install: &Install,
        _shortcut: &Shortcut,
    ) -> Result<(), Error> {
        let _ = config;
        let key_path = format!("{}\\{}", ARP_ROOT, install.id);
        let (key, _) = RegKey::predef(HKEY_CURRENT_USER).create_subkey(&key_path)?;
        key.set_value("DisplayName", &install.display_name())?;
        key.set_value("DisplayVersion", &install.sort_version.to_string())?;
        key.set_value("Publisher", &install.company.as_str())?;
        let uninstall = format!(
            "\"{}\" uninstall --yes --by-id {}",
            env::current_exe()?.display(),
            install.id
        );
        key.set_value("UninstallString", &uninstall)?;
        key.set_value("NoModify", &1u32)?;
        key.set_value("NoRepair", &1u32)?;
        if let Some(prefix) = &install.prefix {
            key.set_value("InstallLocation", &prefix.display().to_string())?;
            let size = crate::shortcuts::estimated_size_kb(prefix).min(u32::MAX as u64) as u32;
            key.set_value("EstimatedSize", &size)?;
        }
        Ok(())
    }

    pub fn arp_cleanup(_config: &Config, keep: &[String]) -> Result<(), Error> {
        let root = RegKey::predef(HKEY_CURRENT_USER);
        let base = match root.open_subkey(ARP_ROOT) {
            Ok(base) => base,
            Err(_) => return Ok(()),
        };
        let entries: Vec<String> = base.enum_keys().filter_map(|k| k.ok()).collect();
        for entry in entries {
            // only touch entries that point back at this manager
            let ours = base
                .open_subkey(&entry)
                .ok()
                .and_then(|k| k.get_value::<String, _>("UninstallString").ok())
                .map(|s| s.contains("uninstall --yes --by-id"))
                .unwrap_or(false);
            if !ours {
                continue;
            }
            if keep.iter().any(|id| id.eq_ignore_ascii_case(&entry)) {
                continue;
            }
            base.delete_subkey_all(&entry).ok();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Start menu shortcuts

    fn programs_folder(config: &Config) -> Option<PathBuf> {
        let appdata = env::var_os("APPDATA")?;
        Some(
            PathBuf::from(appdata)
                .join("Microsoft\\Windows\\Start Menu\\Programs")
                .join(&config.start_folder),
        )
    }

    /// Writes a `.lnk` through the shell scripting object, the same
    /// route rustup takes; COM interop stays out of the core.
    fn create_shortcut_file(lnk: &Path, target: &Path) -> Result<(), Error> {
        let script = format!(
            "$ws = New-Object -ComObject WScript.Shell; \
             $s = $ws.CreateShortcut('{}'); \
             $s.TargetPath = '{}'; \
             $s.Save()",
            lnk.display(),
            target.display()
        );
        let status = Command::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .status()?;
        if !status.success() {
            anyhow::bail!("failed to create shortcut {}", lnk.display());
        }
        Ok(())
    }

    pub fn start_shortcut_create(
        config: &Config,
        install: &Install,
        shortcut: &Shortcut,
    ) -> Result<(), Error> {
        let Some(folder) = programs_folder(config) else {
            return Ok(());
        };
        let name = shortcut
            .get_str("Name")
            .map(String::from)
            .unwrap_or_else(|| install.display_name().to_string());
        let target = match (shortcut.get_str("Target"), &install.prefix) {
            (Some(t), Some(prefix)) => prefix.join(t),
            _ => install.executable_path(),
        };
        fs::create_dir_all(&folder)?;
        create_shortcut_file(&folder.join(format!("{}.lnk", name)), &target)
    }

    pub fn start_shortcut_cleanup(config: &Config, keep: &[String]) -> Result<(), Error> {
        let Some(folder) = programs_folder(config) else {
            return Ok(());
        };
        let entries = match fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let is_lnk = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("lnk"))
                .unwrap_or(false);
            if is_lnk && !keep.iter().any(|k| k.eq_ignore_ascii_case(&stem)) {
                fs::remove_file(&path).ok();
            }
        }
        // drop the folder once the last shortcut is gone
        fs::remove_dir(&folder).ok();
        Ok(())
    }

    // ------------------------------------------------------------------
    // App execution aliases

    /// Reads the reparse data of a WindowsApps execution alias.  The
    /// format is undocumented, so callers only substring-match on it.
    pub fn read_alias_reparse(path: &Path) -> io::Result<String> {
        use std::os::windows::fs::MetadataExt;
        use winapi::um::fileapi::{CreateFileW, OPEN_EXISTING};
        use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
        use winapi::um::ioapiset::DeviceIoControl;
        use winapi::um::winbase::{FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT};
        use winapi::um::winioctl::FSCTL_GET_REPARSE_POINT;
        use winapi::um::winnt::{FILE_ATTRIBUTE_REPARSE_POINT, MAXIMUM_REPARSE_DATA_BUFFER_SIZE};

        let md = fs::symlink_metadata(path)?;
        if md.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a reparse point",
            ));
        }

        let mut encoded: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
        let handle = unsafe {
            CreateFileW(
                encoded.as_mut_ptr(),
                0,
                0,
                std::ptr::null_mut(),
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OPEN_REPARSE_POINT,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }

        let mut buf = [0u16; MAXIMUM_REPARSE_DATA_BUFFER_SIZE as usize];
        let mut bytes_returned = 0;
        let success = unsafe {
            DeviceIoControl(
                handle,
                FSCTL_GET_REPARSE_POINT,
                std::ptr::null_mut(),
                0,
                buf.as_mut_ptr() as *mut _,
                buf.len() as u32 * 2,
                &mut bytes_returned,
                std::ptr::null_mut(),
            ) != 0
        };
        unsafe {
            CloseHandle(handle);
        }
        if !success {
            return Err(io::Error::last_os_error());
        }
        Ok(String::from_utf16_lossy(&buf))
    }

    /// The full package name when running from an MSIX container.
    pub fn current_package() -> Option<String> {
        use winapi::um::appmodel::GetCurrentPackageFullName;
        let mut len: u32 = 0;
        unsafe {
            GetCurrentPackageFullName(&mut len, std::ptr::null_mut());
        }
        if len == 0 {
            return None;
        }
        let mut buf = vec![0u16; len as usize];
        let rc = unsafe { GetCurrentPackageFullName(&mut len, buf.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        while buf.last() == Some(&0) {
            buf.pop();
        }
        Some(String::from_utf16_lossy(&buf))
    }
}

#[cfg(not(windows))]
mod stub {
    use super::*;

    pub fn broadcast_settings_change() {}

    pub fn add_global_dir_to_path(_config: &Config) -> Result<bool, Error> {
        debug!("PATH registration is only available on Windows");
        Ok(false)
    }

    pub fn remove_global_dir_from_path(_config: &Config) -> Result<bool, Error> {
        Ok(false)
    }

    pub fn registry_path_contains(_dir: &Path) -> Option<bool> {
        None
    }

    pub fn long_paths_enabled() -> Option<bool> {
        None
    }

    pub fn pep514_create(
        _session: &mut Session,
        _config: &Config,
        install: &Install,
    ) -> Result<(), Error> {
        debug!("skipping shell registration for {}", install.id);
        Ok(())
    }

    pub fn pep514_cleanup(_config: &Config, _keep: &[(String, String)]) -> Result<(), Error> {
        Ok(())
    }

    pub fn find_unmanaged_runtimes() -> Vec<Install> {
        Vec::new()
    }

    pub fn arp_create(
        _config: &Config,
        install: &Install,
        _shortcut: &Shortcut,
    ) -> Result<(), Error> {
        debug!("skipping uninstall entry for {}", install.id);
        Ok(())
    }

    pub fn arp_cleanup(_config: &Config, _keep: &[String]) -> Result<(), Error> {
        Ok(())
    }

    pub fn start_shortcut_create(
        _config: &Config,
        install: &Install,
        _shortcut: &Shortcut,
    ) -> Result<(), Error> {
        debug!("skipping start menu entry for {}", install.id);
        Ok(())
    }

    pub fn start_shortcut_cleanup(_config: &Config, _keep: &[String]) -> Result<(), Error> {
        Ok(())
    }

    pub fn read_alias_reparse(_path: &Path) -> std::io::Result<String> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "app execution aliases are a Windows feature",
        ))
    }

    pub fn current_package() -> Option<String> {
        None
    }
}
