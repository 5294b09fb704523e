use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::tags::{company_sort_key, Version};
use crate::utils::read_to_string_bom;

pub const INSTALL_METADATA: &str = "__install__.json";
pub const ACTIVE_VENV_ID: &str = "__active-virtual-env";

/// Accepts the wire format's `"windowed": 1` as well as a plain bool,
/// and writes it back out as `1` so metadata round-trips.
mod intbool {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Int(i64),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => b,
            Raw::Int(i) => i != 0,
        })
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A `run-for` entry: which in-prefix executable services which tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunFor {
    pub tag: String,
    pub target: String,
    #[serde(default, with = "intbool", skip_serializing_if = "is_false")]
    pub windowed: bool,
}

/// An `alias` entry: a name exposed in the global launcher directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AliasEntry {
    pub name: String,
    pub target: String,
    #[serde(default, with = "intbool", skip_serializing_if = "is_false")]
    pub windowed: bool,
}

/// A shortcut descriptor: `kind` plus kind-specific fields, preserved
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shortcut {
    pub kind: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Shortcut {
    pub fn new(kind: &str) -> Shortcut {
        Shortcut {
            kind: kind.to_string(),
            extra: serde_json::Map::new(),
        }
    }

    /// The `dirs` list of a `site-dirs` shortcut, if declared.
    pub fn dirs(&self) -> Option<Vec<String>> {
        let list = self.extra.get("dirs")?.as_array()?;
        Some(
            list.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
        )
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// One installable or installed runtime.  The same schema serves feed
/// entries and `__install__.json`; unknown keys ride along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Install {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<u32>,
    pub id: String,
    pub company: String,
    pub tag: String,
    pub sort_version: Version,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub install_for: Vec<String>,
    #[serde(default)]
    pub run_for: Vec<RunFor>,
    #[serde(default)]
    pub alias: Vec<AliasEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shortcuts: Vec<Shortcut>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub executable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executablew: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        default,
        rename = "default",
        with = "intbool",
        skip_serializing_if = "is_false"
    )]
    pub is_default: bool,
    #[serde(default, with = "intbool", skip_serializing_if = "is_false")]
    pub unmanaged: bool,
    #[serde(
        default,
        rename = "__original-shortcuts",
        skip_serializing_if = "Option::is_none"
    )]
    pub original_shortcuts: Option<Vec<Shortcut>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Install {
    /// The tags a request may match against: `install-for` when present,
    /// the runtime's own tag otherwise.
    pub fn matchable_tags(&self) -> Vec<&str> {
        if self.install_for.is_empty() {
            vec![self.tag.as_str()]
        } else {
            self.install_for.iter().map(|s| s.as_str()).collect()
        }
    }

    /// Absolute path of the main executable.
    pub fn executable_path(&self) -> PathBuf {
        match &self.prefix {
            Some(prefix) => prefix.join(&self.executable),
            None => PathBuf::from(&self.executable),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.id
        } else {
            &self.display_name
        }
    }

    /// The tag as shown to users: the canonical company is elided.
    pub fn tag_with_company(&self) -> String {
        if self.company.eq_ignore_ascii_case(crate::tags::DEFAULT_COMPANY)
            || self.company == "---"
            || self.company.is_empty()
        {
            self.tag.clone()
        } else {
            format!("{}\\{}", self.company, self.tag)
        }
    }
}

/// Reads one `__install__.json`, tolerating a BOM.
pub fn read_install_metadata(path: &Path) -> Result<Install, Error> {
    let text = read_to_string_bom(path)?;
    let install: Install = serde_json::from_str(&text)
        .with_context(|| format!("invalid install metadata at {}", path.display()))?;
    Ok(install)
}

fn scan_managed(install_dir: &Path) -> Vec<Install> {
    let mut rv = Vec::new();
    let iter = match fs::read_dir(install_dir) {
        Ok(iter) => iter,
        Err(_) => return rv,
    };
    for entry in iter.filter_map(|e| e.ok()) {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let meta = dir.join(INSTALL_METADATA);
        if !meta.is_file() {
            continue;
        }
        let mut install = match read_install_metadata(&meta) {
            Ok(install) => install,
            Err(err) => {
                debug!("skipping {}: {:#}", meta.display(), err);
                continue;
            }
        };
        if install.prefix.is_none() {
            install.prefix = Some(dir.clone());
        }
        if !install.executable_path().is_file() {
            debug!(
                "skipping {} because {} is missing",
                install.id,
                install.executable_path().display()
            );
            continue;
        }
        rv.push(install);
    }
    rv
}

fn active_virtual_env(config: &Config) -> Option<Install> {
    let venv = config.virtual_env.as_deref()?;
    let bin = if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    };
    if !bin.is_file() {
        return None;
    }
    Some(Install {
        schema: None,
        id: ACTIVE_VENV_ID.to_string(),
        company: "---".to_string(),
        tag: String::new(),
        sort_version: "0".parse().unwrap(),
        display_name: "Active virtual environment".to_string(),
        install_for: Vec::new(),
        run_for: Vec::new(),
        alias: Vec::new(),
        shortcuts: Vec::new(),
        url: String::new(),
        hash: None,
        executable: bin.file_name().unwrap().to_string_lossy().into_owned(),
        executablew: None,
        prefix: Some(bin.parent().unwrap().to_path_buf()),
        source: None,
        is_default: false,
        unmanaged: true,
        original_shortcuts: None,
        extra: serde_json::Map::new(),
    })
}

/// Enumerates installed runtimes in presentation order: the active
/// virtual environment first, stable PythonCore newest-first, other
/// companies newest-first, prereleases last.  Ties keep scan order.
pub fn get_installs(config: &Config, include_unmanaged: bool) -> Vec<Install> {
    let mut installs = scan_managed(&config.install_dir);

    if include_unmanaged && config.include_unmanaged {
        for found in crate::windows::find_unmanaged_runtimes() {
            if !installs.iter().any(|i| i.id.eq_ignore_ascii_case(&found.id)) {
                installs.push(found);
            }
        }
    }

    installs.sort_by_key(|i| {
        (
            i.sort_version.is_prerelease(),
            company_sort_key(&i.company),
            Reverse(i.sort_version.clone()),
        )
    });

    if include_unmanaged && config.include_unmanaged {
        if let Some(venv) = active_virtual_env(config) {
            installs.insert(0, venv);
        }
    }

    installs
}

/// Like `get_installs`, but marks an in-memory default when no install
/// carries the persisted marker.  The chosen default is never written
/// back to disk.
pub fn get_installs_with_default(config: &Config, include_unmanaged: bool) -> Vec<Install> {
    let mut installs = get_installs(config, include_unmanaged);
    if !installs.iter().any(|i| i.is_default) {
        let pick = crate::resolver::pick_default(&installs, config);
        if let Some(id) = pick {
            for i in &mut installs {
                if i.id == id {
                    debug!("default install will be {}", i.id);
                    i.is_default = true;
                    break;
                }
            }
        }
    }
    installs
}

// ---------------------------------------------------------------------
// Friendly alias names for display: `python3.13.exe` and
// `pythonw3.13-64.exe` collapse to `python[w]3.13[-64].exe`.

fn split_alias_name(name: &str) -> (String, String, String, String, String) {
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if name[idx..].eq_ignore_ascii_case(".exe") => {
            (&name[..idx], name[idx..].to_string())
        }
        _ => (name, String::new()),
    };
    let mut base = stem;
    let mut plat = String::new();
    for p in ["-32", "-64", "-arm64"] {
        if let Some(b) = base.strip_suffix(p) {
            base = b;
            plat = p.to_string();
            break;
        }
    }
    let ver_start = base
        .rfind(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map(|i| i + 1)
        .unwrap_or(0);
    let ver = base[ver_start..].to_string();
    let mut base = base[..ver_start].to_string();
    if !plat.is_empty() && ver.is_empty() {
        // a platform without a version is part of the plain name
        return (stem.to_string(), String::new(), String::new(), String::new(), ext);
    }
    let mut w = String::new();
    if !ver.is_empty() && base.to_ascii_lowercase().ends_with('w') {
        base.pop();
        w = "w".to_string();
    }
    (base, w, ver, plat, ext)
}

fn make_opt_part(values: &[String]) -> String {
    let has_empty = values.iter().any(|v| v.is_empty());
    let mut non_empty: Vec<&str> = values
        .iter()
        .filter(|v| !v.is_empty())
        .map(|v| v.as_str())
        .collect();
    non_empty.sort_unstable();
    non_empty.dedup();
    if non_empty.is_empty() {
        String::new()
    } else if non_empty.len() == 1 && !has_empty {
        non_empty[0].to_string()
    } else {
        format!("[{}]", non_empty.join("|"))
    }
}

fn alias_name_sortkey(name: &str) -> String {
    let mut rv = String::new();
    let mut digits = String::new();
    for c in name.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else {
            if !digits.is_empty() {
                rv.push_str(&format!("{:0>20}", digits));
                digits.clear();
            }
            if c != '[' && c != ']' {
                rv.push(c);
            }
        }
    }
    if !digits.is_empty() {
        rv.push_str(&format!("{:0>20}", digits));
    }
    rv
}

/// Collapses alias names for display.  Windowed aliases are only
/// included on request.
pub fn get_install_alias_names(aliases: &[AliasEntry], windowed: bool) -> Vec<String> {
    let mut groups: BTreeMap<(String, String, String), (Vec<String>, Vec<String>)> =
        BTreeMap::new();
    for a in aliases {
        if a.windowed && !windowed {
            continue;
        }
        let (base, w, ver, plat, ext) = split_alias_name(&a.name);
        let entry = groups
            .entry((base.to_ascii_lowercase(), ver.clone(), ext.clone()))
            .or_insert_with(|| (Vec::new(), Vec::new()));
        entry.0.push(w);
        entry.1.push(plat);
    }
    let mut rv: Vec<String> = groups
        .into_iter()
        .map(|((base, ver, ext), (ws, plats))| {
            format!(
                "{}{}{}{}{}",
                base,
                make_opt_part(&ws),
                ver,
                make_opt_part(&plats),
                ext
            )
        })
        .collect();
    rv.sort_by_key(|n| alias_name_sortkey(n));
    rv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake(id: &str, company: &str, tag: &str, version: &str) -> Install {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "company": company,
            "tag": tag,
            "sort-version": version,
        }))
        .unwrap()
    }

    #[test]
    fn test_install_wire_roundtrip() {
        let raw = serde_json::json!({
            "schema": 1,
            "id": "PythonCore-3.13-64",
            "company": "PythonCore",
            "tag": "3.13-64",
            "sort-version": "3.13.1",
            "display-name": "Python 3.13 (64-bit)",
            "install-for": ["3.13-64", "3.13"],
            "run-for": [
                {"tag": "3.13-64", "target": "python.exe"},
                {"tag": "3.13-64", "target": "pythonw.exe", "windowed": 1}
            ],
            "alias": [
                {"name": "python3.13.exe", "target": "python.exe"},
                {"name": "pythonw3.13.exe", "target": "pythonw.exe", "windowed": 1}
            ],
            "url": "https://example.com/file.zip",
            "hash": {"sha256": "abc123"},
            "executable": "python.exe",
            "custom-key": {"nested": true}
        });
        let install: Install = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(install.id, "PythonCore-3.13-64");
        assert_eq!(install.run_for[1].windowed, true);
        assert_eq!(install.alias[0].windowed, false);
        // unknown keys survive verbatim
        let back = serde_json::to_value(&install).unwrap();
        assert_eq!(back["custom-key"], raw["custom-key"]);
        assert_eq!(back["run-for"][1]["windowed"], serde_json::json!(1));
    }

    #[test]
    fn test_matchable_tags_fallback() {
        let mut i = fake("PythonCore-3.13", "PythonCore", "3.13", "3.13.0");
        assert_eq!(i.matchable_tags(), vec!["3.13"]);
        i.install_for = vec!["3.13-64".into(), "3.13".into()];
        assert_eq!(i.matchable_tags(), vec!["3.13-64", "3.13"]);
    }

    #[test]
    fn test_enumeration_order() {
        let mut installs = vec![
            fake("PythonCore-1.0", "PythonCore", "1.0", "1.0"),
            fake("PythonCore-1.0-64", "PythonCore", "1.0-64", "1.0"),
            fake("PythonCore-1.0-32", "PythonCore", "1.0-32", "1.0"),
            fake("Company-2.1", "Company", "2.1", "2.1"),
            fake("Company-1.1", "Company", "1.1", "1.1"),
            fake("PythonCore-3.0a1-64", "PythonCore", "3.0a1-64", "3.0a1"),
            fake("PythonCore-2.0-64", "PythonCore", "2.0-64", "2.0"),
        ];
        installs.sort_by_key(|i| {
            (
                i.sort_version.is_prerelease(),
                company_sort_key(&i.company),
                std::cmp::Reverse(i.sort_version.clone()),
            )
        });
        let ids: Vec<&str> = installs.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "PythonCore-2.0-64",
                "PythonCore-1.0",
                "PythonCore-1.0-64",
                "PythonCore-1.0-32",
                "Company-2.1",
                "Company-1.1",
                "PythonCore-3.0a1-64",
            ]
        );
    }

    #[test]
    fn test_alias_key_split() {
        assert_eq!(
            split_alias_name("pythonw3-64.exe"),
            (
                "python".into(),
                "w".into(),
                "3".into(),
                "-64".into(),
                ".exe".into()
            )
        );
        assert_eq!(
            split_alias_name("pythonw3.exe"),
            ("python".into(), "w".into(), "3".into(), "".into(), ".exe".into())
        );
        assert_eq!(
            split_alias_name("python3-64.exe"),
            ("python".into(), "".into(), "3".into(), "-64".into(), ".exe".into())
        );
    }

    #[test]
    fn test_alias_opt_part() {
        assert_eq!(make_opt_part(&[]), "");
        assert_eq!(make_opt_part(&["x".into()]), "x");
        assert_eq!(make_opt_part(&["x".into(), "".into()]), "[x]");
        assert_eq!(
            make_opt_part(&["".into(), "y".into(), "x".into()]),
            "[x|y]"
        );
    }

    #[test]
    fn test_alias_name_sortkey() {
        assert_eq!(
            alias_name_sortkey("pythonw3-64.exe"),
            "pythonw00000000000000000003-00000000000000000064.exe"
        );
        assert_eq!(
            alias_name_sortkey("python[w]3[-64].exe"),
            "pythonw00000000000000000003-00000000000000000064.exe"
        );
    }

    #[test]
    fn test_alias_display_names() {
        let mut aliases: Vec<AliasEntry> = ["py3.exe", "PY3-64.exe", "PYW3.exe", "pyw3-64.exe"]
            .iter()
            .map(|n| AliasEntry {
                name: n.to_string(),
                target: "python.exe".into(),
                windowed: false,
            })
            .collect();
        aliases.extend(
            ["xy3.exe", "XY3-64.exe", "XYW3.exe", "xyw3-64.exe"]
                .iter()
                .map(|n| AliasEntry {
                    name: n.to_string(),
                    target: "pythonw.exe".into(),
                    windowed: true,
                }),
        );
        assert_eq!(
            get_install_alias_names(&aliases, false),
            vec!["py[w]3[-64].exe"]
        );
        assert_eq!(
            get_install_alias_names(&aliases, true),
            vec!["py[w]3[-64].exe", "xy[w]3[-64].exe"]
        );
    }
}
