use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::digest::DynDigest;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use url::Url;

use crate::config::Config;
use crate::errors::HashMismatch;
use crate::index::{extract_url_auth, sanitise_url};
use crate::installs::Install;
use crate::session::Session;
use crate::utils::{ensure_tree, interrupted, unlink, CommandOutput};

fn new_hasher(name: &str) -> Option<Box<dyn DynDigest>> {
    match name.to_ascii_lowercase().as_str() {
        "sha224" => Some(Box::new(Sha224::new())),
        "sha256" => Some(Box::new(Sha256::new())),
        "sha384" => Some(Box::new(Sha384::new())),
        "sha512" => Some(Box::new(Sha512::new())),
        _ => None,
    }
}

/// Computes every hash listed for the entry in one streaming pass and
/// compares case-insensitively.
fn multihash(path: &Path, hashes: &std::collections::BTreeMap<String, String>) -> Result<(), Error> {
    let mut hashers = Vec::new();
    for (algorithm, expected) in hashes {
        if expected.is_empty() {
            continue;
        }
        let hasher = new_hasher(algorithm)
            .with_context(|| format!("unsupported hash algorithm '{}'", algorithm))?;
        hashers.push((hasher, algorithm.clone(), expected.clone()));
    }
    if hashers.is_empty() {
        return Ok(());
    }

    let mut file = fs::File::open(path)
        .with_context(|| format!("failed to open {} for verification", path.display()))?;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        for (hasher, _, _) in &mut hashers {
            hasher.update(&buf[..n]);
        }
    }

    for (mut hasher, algorithm, expected) in hashers {
        let actual = hex::encode(hasher.finalize_reset());
        if !actual.eq_ignore_ascii_case(&expected) {
            return Err(Error::new(HashMismatch {
                algorithm,
                actual,
                expected: expected.to_ascii_lowercase(),
            }));
        }
        debug!("{} digest of {} matched", algorithm, path.display());
    }
    Ok(())
}

/// Verifies a downloaded file against the entry's hash map.  On mismatch
/// the file is deleted unless `keep` is set.
pub fn validate_package(entry: &Install, path: &Path, keep: bool) -> Result<(), Error> {
    let hashes = match &entry.hash {
        Some(hashes) => hashes,
        None => {
            debug!(
                "skipping hash validation of {}; no hash in the feed entry",
                path.display()
            );
            return Ok(());
        }
    };
    match multihash(path, hashes) {
        Ok(()) => Ok(()),
        Err(err) => {
            if !keep && err.downcast_ref::<HashMismatch>().is_some() {
                unlink(path).ok();
            }
            Err(err)
        }
    }
}

/// Credentials for a download, discovered in order: embedded in the URL,
/// inherited from the configured source, or taken from the environment.
fn find_credentials(url: &str, config: &Config) -> Option<(String, String)> {
    if let Some(auth) = extract_url_auth(url) {
        debug!("found credentials in the download URL");
        return Some(auth);
    }
    if let Some(auth) = extract_url_auth(&config.source) {
        if sanitise_url(url).starts_with(sanitise_url(&config.source).trim_end_matches("index.json"))
        {
            debug!("found credentials in the configured source");
            return Some(auth);
        }
    }
    let user = std::env::var("PYMANAGER_USERNAME").unwrap_or_default();
    if !user.is_empty() {
        debug!("found credentials in the environment");
        let password = std::env::var("PYMANAGER_PASSWORD").unwrap_or_default();
        return Some((user, password));
    }
    None
}

fn curl_retrieve<W: Write>(
    url: &str,
    auth: Option<(String, String)>,
    output: CommandOutput,
    mut sink: W,
) -> Result<(), Error> {
    let mut handle = curl::easy::Easy::new();
    handle.url(url)?;
    handle.progress(true)?;
    handle.follow_location(true)?;
    if let Some((user, password)) = auth {
        handle.username(&user)?;
        handle.password(&password)?;
    }

    // on windows we want to disable revocation checks so MITM proxies
    // keep working; this is schannel specific behavior.
    #[cfg(windows)]
    {
        handle.ssl_options(curl::easy::SslOpt::new().no_revoke(true))?;
    }

    {
        let mut transfer = handle.transfer();
        let mut pb = None;
        transfer.progress_function(move |down_len, down_pos, _, _| {
            if interrupted() {
                return false;
            }
            if output == CommandOutput::Quiet {
                return true;
            }
            let (down_len, down_pos) = (down_len as u64, down_pos as u64);
            if down_len > 0 {
                if down_pos < down_len {
                    if pb.is_none() {
                        let pb_config = ProgressBar::new(down_len);
                        pb_config.set_style(
                            ProgressStyle::with_template("{wide_bar} {bytes:>7}/{total_bytes:7}")
                                .unwrap(),
                        );
                        pb = Some(pb_config);
                    }
                    pb.as_ref().unwrap().set_position(down_pos);
                } else if pb.is_some() {
                    pb.take().unwrap().finish_and_clear();
                }
            }
            true
        })?;
        transfer.write_function(|data| {
            sink.write_all(data).unwrap();
            Ok(data.len())
        })?;
        transfer
            .perform()
            .with_context(|| format!("download of {} failed", sanitise_url(url)))?;
    }
    let code = handle.response_code()?;
    if !(200..300).contains(&code) && code != 0 {
        bail!("failed to download {}: HTTP {}", sanitise_url(url), code);
    }
    Ok(())
}

/// Fetches a URL into memory.  `file://` and bare paths stay local.
pub fn fetch_url_bytes(url: &str, output: CommandOutput) -> Result<Vec<u8>, Error> {
    if let Some(path) = local_path(url) {
        return fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut buf = Vec::new();
    curl_retrieve(url, None, output, &mut buf)?;
    Ok(buf)
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Ok(parsed) = Url::parse(url) {
        if parsed.scheme() == "file" {
            return parsed.to_file_path().ok();
        }
        if parsed.scheme().len() > 1 {
            return None;
        }
    }
    Some(PathBuf::from(url))
}

/// Downloads a feed entry to `dest`, honouring the cache and any bundled
/// pre-downloaded copy.  Returns the path actually holding the verified
/// archive, which may be the bundled file rather than `dest`.
pub fn download_package(
    session: &mut Session,
    config: &Config,
    entry: &Install,
    dest: &Path,
    force: bool,
    output: CommandOutput,
) -> Result<PathBuf, Error> {
    debug!(
        "starting download of {} to {}",
        sanitise_url(&entry.url),
        dest.display()
    );

    if let Some(cached) = session.download_cache.get(&entry.url) {
        if cached.is_file() {
            return Ok(cached.clone());
        }
    }

    if !force && dest.is_file() {
        match validate_package(entry, dest, true) {
            Ok(()) => {
                echo!(if verbose output, "Download was found in the cache.");
                session
                    .download_cache
                    .insert(entry.url.clone(), dest.to_path_buf());
                return Ok(dest.to_path_buf());
            }
            Err(_) => {
                echo!(if output, "Cached file could not be verified. Downloading it again.");
            }
        }
    }

    if let Some(bundled_dir) = &config.bundled_dir {
        if let Some(name) = dest.file_name() {
            let bundled = bundled_dir.join(name);
            if bundled.is_file() && validate_package(entry, &bundled, true).is_ok() {
                echo!(if verbose output, "Using bundled file at {}", bundled.display());
                session
                    .download_cache
                    .insert(entry.url.clone(), bundled.clone());
                return Ok(bundled);
            }
        }
    }

    unlink(dest)?;
    ensure_tree(dest)?;

    if let Some(src) = local_path(&entry.url) {
        fs::copy(&src, dest)
            .with_context(|| format!("failed to copy {}", src.display()))?;
    } else {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let auth = find_credentials(&entry.url, config);
        curl_retrieve(&entry.url, auth, output, tmp.as_file_mut())?;
        tmp.persist(dest)
            .with_context(|| format!("failed to move download into {}", dest.display()))?;
    }

    validate_package(entry, dest, false)?;
    debug!("downloaded to {}", dest.display());
    session
        .download_cache
        .insert(entry.url.clone(), dest.to_path_buf());
    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_hash(algorithm: &str, digest: &str) -> Install {
        serde_json::from_value(serde_json::json!({
            "id": "PythonCore-3.13-64",
            "company": "PythonCore",
            "tag": "3.13-64",
            "sort-version": "3.13.0",
            "install-for": ["3.13-64"],
            "url": "https://example.com/f.zip",
            "hash": {algorithm: digest},
        }))
        .unwrap()
    }

    #[test]
    fn test_multihash_match() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.zip");
        fs::write(&file, b"hello world").unwrap();
        // sha256 of "hello world", uppercased to prove case-insensitivity
        let entry = entry_with_hash(
            "sha256",
            "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9",
        );
        validate_package(&entry, &file, false).unwrap();
        assert!(file.is_file());
    }

    #[test]
    fn test_multihash_mismatch_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.zip");
        fs::write(&file, b"hello world").unwrap();
        let entry = entry_with_hash("sha256", "00");
        let err = validate_package(&entry, &file, false).unwrap_err();
        assert!(err.downcast_ref::<HashMismatch>().is_some());
        assert!(!file.exists());
    }

    #[test]
    fn test_multihash_unknown_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.zip");
        fs::write(&file, b"hello world").unwrap();
        let entry = entry_with_hash("md4", "00");
        assert!(validate_package(&entry, &file, true).is_err());
    }

    #[test]
    fn test_local_path() {
        assert!(local_path("https://example.com/x.zip").is_none());
        assert!(local_path("file:///tmp/x.zip").is_some());
        assert_eq!(local_path("pkgs/x.zip"), Some(PathBuf::from("pkgs/x.zip")));
    }

    #[test]
    fn test_download_from_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.zip");
        fs::write(&src, b"archive-bytes").unwrap();
        let url = Url::from_file_path(&src).unwrap().to_string();
        let mut entry = entry_with_hash(
            "sha256",
            // sha256 of "archive-bytes"
            &hex::encode(Sha256::digest(b"archive-bytes")),
        );
        entry.url = url;
        let mut session = Session::new();
        let config = test_config(dir.path());
        let dest = dir.path().join("cache").join("dl.zip");
        let got = download_package(
            &mut session,
            &config,
            &entry,
            &dest,
            false,
            CommandOutput::Quiet,
        )
        .unwrap();
        assert_eq!(got, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"archive-bytes");
        // second call hits the in-process cache
        let again = download_package(
            &mut session,
            &config,
            &entry,
            &dest,
            false,
            CommandOutput::Quiet,
        )
        .unwrap();
        assert_eq!(again, dest);
    }

    fn test_config(root: &Path) -> Config {
        Config {
            root: root.to_path_buf(),
            install_dir: root.join("pkgs"),
            global_dir: root.join("bin"),
            download_dir: root.join("pkgs"),
            bundled_dir: None,
            source: "https://example.com/index.json".into(),
            fallback_source: None,
            default_tag: "3".into(),
            default_install_tag: "3".into(),
            default_platform: "-64".into(),
            automatic_install: true,
            include_unmanaged: false,
            preserve_site_on_upgrade: true,
            virtual_env: None,
            pep514_root: crate::config::DEFAULT_PEP514_ROOT.into(),
            start_folder: crate::config::DEFAULT_START_FOLDER.into(),
            launcher_exe: root.join("launcher.exe"),
            launcherw_exe: root.join("launcherw.exe"),
            enable_shortcut_kinds: None,
            disable_shortcut_kinds: Vec::new(),
            welcome_on_update: false,
        }
    }
}
