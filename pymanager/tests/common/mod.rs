#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use insta_cmd::get_cargo_bin;
use sha2::{Digest, Sha256};

/// An isolated manager root with its own feed, launcher templates, and
/// configuration.  Every test gets a fresh one.
pub struct Space {
    #[allow(dead_code)]
    tmp: tempfile::TempDir,
    root: PathBuf,
    feed_dir: PathBuf,
}

/// One runtime offered by the test feed.
pub struct FeedRuntime {
    pub company: String,
    pub tag: String,
    pub sort_version: String,
    pub extra_members: Vec<(String, Vec<u8>)>,
    pub break_hash: bool,
}

impl FeedRuntime {
    pub fn new(tag: &str, sort_version: &str) -> FeedRuntime {
        FeedRuntime {
            company: "PythonCore".into(),
            tag: tag.into(),
            sort_version: sort_version.into(),
            extra_members: Vec::new(),
            break_hash: false,
        }
    }

    pub fn with_member(mut self, name: &str, data: &[u8]) -> FeedRuntime {
        self.extra_members.push((name.into(), data.to_vec()));
        self
    }

    pub fn with_broken_hash(mut self) -> FeedRuntime {
        self.break_hash = true;
        self
    }

    fn id(&self) -> String {
        format!("{}-{}", self.company, self.tag)
    }

    fn short_tag(&self) -> String {
        // "3.13-64" -> "3.13" for alias names and install-for
        self.tag
            .split('-')
            .next()
            .unwrap_or(&self.tag)
            .to_string()
    }
}

impl Space {
    pub fn new() -> Space {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("root");
        let feed_dir = tmp.path().join("feed");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&feed_dir).unwrap();

        fs::write(root.join("launcher.exe"), b"LAUNCHER-TEMPLATE").unwrap();
        fs::write(root.join("launcherw.exe"), b"LAUNCHERW-TEMPLATE").unwrap();

        let config = serde_json::json!({
            "include_unmanaged": false,
            "launcher_exe": root.join("launcher.exe"),
            "launcherw_exe": root.join("launcherw.exe"),
        });
        fs::write(
            root.join("pymanager.json"),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        Space {
            tmp,
            root,
            feed_dir,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn install_dir(&self) -> PathBuf {
        self.root.join("pkgs")
    }

    pub fn global_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn scratch(&self) -> PathBuf {
        let dir = self.tmp.path().join("scratch");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn py_cmd(&self) -> Command {
        let mut cmd = Command::new(get_cargo_bin("py"));
        cmd.env("PYMANAGER_ROOT", &self.root);
        cmd.env_remove("PYMANAGER_CONFIG");
        cmd.env_remove("PYMANAGER_DEBUG");
        cmd.env_remove("PYMANAGER_VERBOSE");
        cmd.env_remove("VIRTUAL_ENV");
        cmd
    }

    fn make_zip(&self, name: &str, members: &[(String, Vec<u8>)]) -> PathBuf {
        let path = self.feed_dir.join(name);
        let file = fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::FileOptions = Default::default();
        for (member, data) in members {
            writer.start_file(member.as_str(), options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    /// Builds runtime archives plus an index.json, returning the
    /// feed's `file://` URL.
    pub fn write_feed(&self, runtimes: &[FeedRuntime]) -> String {
        let mut versions = Vec::new();
        for rt in runtimes {
            let short = rt.short_tag();
            let mut members: Vec<(String, Vec<u8>)> = vec![
                ("python.exe".into(), b"fake-runtime-console".to_vec()),
                ("pythonw.exe".into(), b"fake-runtime-windowed".to_vec()),
            ];
            members.extend(rt.extra_members.iter().cloned());
            let archive = self.make_zip(&format!("{}.zip", rt.id()), &members);
            let digest = if rt.break_hash {
                "0".repeat(64)
            } else {
                hex::encode(Sha256::digest(fs::read(&archive).unwrap()))
            };
            let url = url::Url::from_file_path(&archive).unwrap().to_string();
            versions.push(serde_json::json!({
                "schema": 1,
                "id": rt.id(),
                "company": rt.company.clone(),
                "tag": rt.tag.clone(),
                "sort-version": rt.sort_version.clone(),
                "display-name": format!("Python {}", rt.tag),
                "install-for": [rt.tag.clone(), short.clone()],
                "run-for": [
                    {"tag": rt.tag.clone(), "target": "python.exe"},
                    {"tag": rt.tag.clone(), "target": "pythonw.exe", "windowed": 1},
                ],
                "alias": [
                    {"name": format!("python{}.exe", short), "target": "python.exe"},
                    {"name": format!("pythonw{}.exe", short), "target": "pythonw.exe",
                     "windowed": 1},
                ],
                "url": url,
                "hash": {"sha256": digest},
                "executable": "python.exe",
            }));
        }
        let index = self.feed_dir.join("index.json");
        fs::write(
            &index,
            serde_json::to_string_pretty(&serde_json::json!({ "versions": versions })).unwrap(),
        )
        .unwrap();
        url::Url::from_file_path(&index).unwrap().to_string()
    }

    /// Drops a managed install into place without going through the
    /// installer, for tests that only need the registry.
    pub fn write_fake_install(&self, id: &str, tag: &str, sort_version: &str) {
        let prefix = self.install_dir().join(id);
        fs::create_dir_all(&prefix).unwrap();
        fs::write(prefix.join("python.exe"), b"fake-runtime-console").unwrap();
        let meta = serde_json::json!({
            "id": id,
            "company": "PythonCore",
            "tag": tag,
            "sort-version": sort_version,
            "display-name": format!("Python {}", tag),
            "install-for": [tag],
            "executable": "python.exe",
            "prefix": prefix,
        });
        fs::write(
            prefix.join("__install__.json"),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();
    }

    /// Sorted `(name, bytes)` pairs for every file in a directory.
    pub fn dir_contents(&self, dir: &Path) -> Vec<(String, Vec<u8>)> {
        let mut rv: Vec<(String, Vec<u8>)> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| {
                    (
                        e.file_name().to_string_lossy().into_owned(),
                        fs::read(e.path()).unwrap(),
                    )
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        rv.sort();
        rv
    }
}
