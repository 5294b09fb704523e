use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{bail, Error};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::Config;
use crate::errors::NoInstallFound;
use crate::installs::Install;
use crate::resolver::{get_install_to_run, select_executable, SelectedRuntime};
use crate::utils::path_matches;

/// Only the leading chunk of a script is examined for the shebang and
/// an encoding declaration.
const MAX_SCRIPT_PREFIX: usize = 4096;

static CODING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"coding[:=]\s*([-\w.]+)").unwrap());

/// Extracts the codec named by a `# coding:` comment line, if any.
pub fn parse_coding_comment(line: &str) -> Option<String> {
    if !line.trim_start().starts_with('#') {
        return None;
    }
    CODING_RE
        .captures(line)
        .map(|c| c[1].to_string())
}

fn decode(bytes: &[u8], codec: &str) -> Result<String, Error> {
    match codec {
        "utf-8" | "utf-8-sig" | "ascii" => Ok(String::from_utf8_lossy(bytes).into_owned()),
        "latin-1" | "latin1" | "iso-8859-1" => {
            Ok(bytes.iter().map(|&b| b as char).collect())
        }
        other => bail!("unknown script encoding '{}'", other),
    }
}

/// Reads the first line of a script, honouring a BOM and a `# coding:`
/// comment on line 1 or 2 (decoding restarts with the named codec).
fn read_first_line(path: &Path) -> Result<Option<String>, Error> {
    let mut buf = vec![0u8; MAX_SCRIPT_PREFIX];
    let mut file = fs::File::open(path)?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);

    let bytes = if buf.starts_with(b"\xef\xbb\xbf") {
        &buf[3..]
    } else {
        &buf[..]
    };
    let codec = "utf-8-sig";

    let text = decode(bytes, codec)?;
    let first = |text: &str| -> Option<String> {
        let line = match memchr::memchr(b'\n', text.as_bytes()) {
            Some(idx) => &text[..idx],
            None => text,
        };
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    };

    let line1 = match first(&text) {
        Some(line) => line,
        None => return Ok(None),
    };
    if line1.starts_with("#!") {
        return Ok(Some(line1));
    }

    // no shebang on line 1; a coding comment on the first two lines
    // restarts the decoder before giving up
    for line in text.lines().take(2) {
        if let Some(new_codec) = parse_coding_comment(line) {
            if new_codec != codec {
                let text = decode(bytes, &new_codec)?;
                return Ok(first(&text).filter(|l| l.starts_with("#!")));
            }
            break;
        }
    }
    Ok(None)
}

/// The command token named by a shebang line.
///
/// `#!/usr/bin/env X`, `#!/usr/bin/env -S X args`, `#!<path>/X args` and
/// `#!X args` all yield `X` (for the path forms, the full path is kept so
/// exact executable matching can use it).
fn shebang_command(line: &str) -> Option<String> {
    let rest = line.strip_prefix("#!")?.trim();
    if rest.is_empty() {
        return None;
    }
    let mut tokens = rest.split_whitespace();
    let first = tokens.next()?;
    let env_like = first == "/usr/bin/env" || first.ends_with("/env");
    if env_like {
        for token in tokens {
            if token.starts_with('-') {
                continue;
            }
            return Some(token.to_string());
        }
        return None;
    }
    Some(first.to_string())
}

fn basename(token: &str) -> &str {
    token
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(token)
}

fn strip_exe(name: &str) -> &str {
    if name.len() >= 4 && name[name.len() - 4..].eq_ignore_ascii_case(".exe") {
        &name[..name.len() - 4]
    } else {
        name
    }
}

/// Maps a shebang command token to an installed runtime.
///
/// Match order: exact executable path, alias name, `python`/`py`
/// translation to a canonical tag, and finally a plain tag or range.
pub fn find_shebang_command(
    installs: &[Install],
    config: &Config,
    command: &str,
    windowed: bool,
) -> Result<SelectedRuntime, Error> {
    let token_path = Path::new(command);

    // 1. the token matches an installed executable exactly; the windowed
    // flag never overrides an explicitly named binary
    for install in installs {
        if path_matches(&install.executable_path(), token_path) {
            return Ok(SelectedRuntime {
                executable: install.executable_path(),
                install: install.clone(),
                windowed,
            });
        }
    }

    let name = strip_exe(basename(command));

    // 2. the token is an alias name; a windowed alias pins its own
    // target, others defer to the run-for table
    for install in installs {
        for alias in &install.alias {
            if !strip_exe(&alias.name).eq_ignore_ascii_case(name) {
                continue;
            }
            let executable = if alias.windowed {
                match &install.prefix {
                    Some(prefix) => prefix.join(&alias.target),
                    None => select_executable(install, true),
                }
            } else {
                select_executable(install, windowed)
            };
            return Ok(SelectedRuntime {
                executable,
                install: install.clone(),
                windowed: windowed || alias.windowed,
            });
        }
    }

    // 3. python/py names translate to the canonical company
    for prefix in ["python", "py"] {
        if name.len() < prefix.len() || !name[..prefix.len()].eq_ignore_ascii_case(prefix) {
            continue;
        }
        let rest = &name[prefix.len()..];
        let (rest, wants_windowed) = match rest.strip_prefix(['w', 'W']) {
            Some(r) => (r, true),
            None => (rest, windowed),
        };
        if rest.is_empty() {
            return get_install_to_run(installs, config, None, wants_windowed);
        }
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let request = format!("{}\\{}", crate::tags::DEFAULT_COMPANY, rest);
            return get_install_to_run(installs, config, Some(&request), wants_windowed);
        }
    }

    // 4. anything else is tried as a tag or range
    if crate::tags::tag_or_range(command).is_ok() {
        return get_install_to_run(installs, config, Some(command), windowed);
    }

    Err(Error::new(NoInstallFound {
        request: command.to_string(),
    }))
}

/// Picks a runtime from a script's first line.  Raises a lookup failure
/// when the script has no usable shebang; the caller may fall back to
/// the configured default tag.
pub fn find_install_from_script(
    installs: &[Install],
    config: &Config,
    script: &Path,
    windowed: bool,
) -> Result<SelectedRuntime, Error> {
    let line = read_first_line(script)?;
    let command = line
        .as_deref()
        .and_then(shebang_command)
        .ok_or_else(|| {
            Error::new(NoInstallFound {
                request: script.display().to_string(),
            })
        })?;
    debug!("shebang names '{}'", command);
    find_shebang_command(installs, config, &command, windowed)
}

// ---------------------------------------------------------------------
// Windows command line quoting.  `split_args(quote_args(argv)) == argv`
// for every argv without NULs.

fn maybe_quote(arg: &str) -> String {
    // an argument that arrives fully quoted is reduced to its content
    // and requoted, so `"a b"` stays stable
    if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
        return force_quote(&arg[1..arg.len() - 1]);
    }
    let needs_quotes = arg.is_empty()
        || arg.chars().any(|c| c == ' ' || c == '\t' || c == '\n');
    if needs_quotes {
        force_quote(arg)
    } else if arg.contains('"') {
        escape_body(arg, false)
    } else {
        arg.to_string()
    }
}

fn force_quote(arg: &str) -> String {
    format!("\"{}\"", escape_body(arg, true))
}

/// Doubles backslash runs that precede a quote (and, when the result
/// will be wrapped in quotes, a trailing run), and escapes the quotes.
fn escape_body(arg: &str, quoted: bool) -> String {
    let mut rv = String::with_capacity(arg.len());
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                rv.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                rv.push('"');
                backslashes = 0;
            }
            other => {
                rv.extend(std::iter::repeat('\\').take(backslashes));
                rv.push(other);
                backslashes = 0;
            }
        }
    }
    let trailing = if quoted { backslashes * 2 } else { backslashes };
    rv.extend(std::iter::repeat('\\').take(trailing));
    rv
}

/// Joins an argv into one command line under the Windows quoting rules.
pub fn quote_args<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| maybe_quote(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a command line back into an argv (the inverse of
/// `quote_args`).
pub fn split_args(cmdline: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut in_quotes = false;
    let mut chars = cmdline.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                in_arg = true;
                let mut backslashes = 1;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    backslashes += 1;
                }
                if chars.peek() == Some(&'"') {
                    current.extend(std::iter::repeat('\\').take(backslashes / 2));
                    if backslashes % 2 == 1 {
                        chars.next();
                        current.push('"');
                    }
                } else {
                    current.extend(std::iter::repeat('\\').take(backslashes));
                }
            }
            '"' => {
                in_arg = true;
                in_quotes = !in_quotes;
            }
            ' ' | '\t' | '\n' if !in_quotes => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            other => {
                in_arg = true;
                current.push(other);
            }
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake_install(v: &str, company: &str) -> Install {
        let mut install: Install = serde_json::from_value(serde_json::json!({
            "id": format!("test-{}", v),
            "company": company,
            "tag": v,
            "sort-version": v,
            "executable": format!("test-binary-{}.exe", v),
        }))
        .unwrap();
        install.prefix = Some(PathBuf::from(format!("./pkgs/test-{}", v)));
        install
    }

    fn installs() -> Vec<Install> {
        let mut one = fake_install("1.0", "Test");
        one.run_for = serde_json::from_value(serde_json::json!([
            {"tag": "1.0", "target": "test-binary-1.0.exe"},
            {"tag": "1.0", "target": "test-binary-1.0-win.exe", "windowed": 1},
        ]))
        .unwrap();
        one.alias = serde_json::from_value(serde_json::json!([
            {"name": "test1.0.exe", "target": "test-binary-1.0.exe"},
            {"name": "testw1.0.exe", "target": "test-binary-w-1.0.exe", "windowed": 1},
        ]))
        .unwrap();

        let mut two = fake_install("1.1", "Test");
        two.is_default = true;
        two.run_for = serde_json::from_value(serde_json::json!([
            {"tag": "1.1", "target": "test-binary-1.1.exe"},
            {"tag": "1.1", "target": "test-binary-1.1-win.exe", "windowed": 1},
        ]))
        .unwrap();
        two.alias = serde_json::from_value(serde_json::json!([
            {"name": "test1.1.exe", "target": "test-binary-1.1.exe"},
            {"name": "testw1.1.exe", "target": "test-binary-w-1.1.exe", "windowed": 1},
        ]))
        .unwrap();

        let core = fake_install("1.3.1", "PythonCore");
        let other = fake_install("1.3.2", "PythonOther");
        let mut old = fake_install("2.0", "Test");
        old.alias = serde_json::from_value(serde_json::json!([
            {"name": "test2.0.exe", "target": "test-binary-2.0.exe"},
        ]))
        .unwrap();

        vec![one, two, core, other, old]
    }

    fn config() -> Config {
        Config {
            root: PathBuf::from("/tmp/pym"),
            install_dir: PathBuf::from("/tmp/pym/pkgs"),
            global_dir: PathBuf::from("/tmp/pym/bin"),
            download_dir: PathBuf::from("/tmp/pym/pkgs"),
            bundled_dir: None,
            source: String::new(),
            fallback_source: None,
            default_tag: "1".into(),
            default_install_tag: "1".into(),
            default_platform: String::new(),
            automatic_install: true,
            include_unmanaged: true,
            preserve_site_on_upgrade: true,
            virtual_env: None,
            pep514_root: String::new(),
            start_folder: String::new(),
            launcher_exe: PathBuf::new(),
            launcherw_exe: PathBuf::new(),
            enable_shortcut_kinds: None,
            disable_shortcut_kinds: Vec::new(),
            welcome_on_update: false,
        }
    }

    fn from_script(script: &str, windowed: bool) -> Option<SelectedRuntime> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test-script.py");
        std::fs::write(&path, script).unwrap();
        find_install_from_script(&installs(), &config(), &path, windowed).ok()
    }

    #[test]
    fn test_read_shebang() {
        let cases: &[(&str, Option<&str>)] = &[
            ("", None),
            ("#! /usr/bin/test1.0\n#! /usr/bin/test2.0\n", Some("1.0")),
            ("#! /usr/bin/test2.0\n#! /usr/bin/test1.0\n", Some("2.0")),
            ("#! /usr/bin/test1.0.exe\n#! /usr/bin/test2.0\n", Some("1.0")),
            ("#!test1.0.exe\n", Some("1.0")),
            ("#!test1.1.exe\n", Some("1.1")),
            ("#!test1.2.exe\n", None),
            ("#!test-binary-1.1.exe\n", Some("1.1")),
            ("#!.\\pkgs\\test-1.1\\test-binary-1.1.exe\n", Some("1.1")),
            ("#!.\\pkgs\\test-1.0\\test-binary-1.1.exe\n", None),
            ("#! /usr/bin/env test1.0\n", Some("1.0")),
            ("#! /usr/bin/env test2.0\n", Some("2.0")),
            ("#! /usr/bin/env -S test2.0\n", Some("2.0")),
            ("#! /usr/bin/python1.3.1", Some("1.3.1")),
            ("#! /usr/bin/env python1.3.1", Some("1.3.1")),
            ("#! /usr/bin/python1.3.2", None),
        ];
        for (script, expect) in cases {
            let got = from_script(script, false).map(|s| s.install.tag.clone());
            assert_eq!(got.as_deref(), *expect, "script: {:?}", script);
        }
    }

    #[test]
    fn test_read_shebang_windowed() {
        let cases: &[(&str, Option<&str>, bool)] = &[
            ("#! /usr/bin/test1.0\n", Some("test-binary-1.0.exe"), false),
            ("#! /usr/bin/test1.0\n", Some("test-binary-1.0-win.exe"), true),
            ("#! /usr/bin/testw1.0\n", Some("test-binary-w-1.0.exe"), false),
            ("#! /usr/bin/testw1.0\n", Some("test-binary-w-1.0.exe"), true),
            ("#! /usr/bin/test2.0\n", Some("test-binary-2.0.exe"), false),
            ("#! /usr/bin/test2.0\n", Some("test-binary-2.0.exe"), true),
            ("#! /usr/bin/testw2.0\n", None, false),
            ("#! /usr/bin/testw2.0\n", None, true),
            ("#!test-binary-1.1.exe\n", Some("test-binary-1.1.exe"), false),
            ("#!test-binary-1.1.exe\n", Some("test-binary-1.1.exe"), true),
            ("#! /usr/bin/python\n", Some("test-binary-1.1.exe"), false),
            ("#! /usr/bin/python\n", Some("test-binary-1.1-win.exe"), true),
            ("#! /usr/bin/pythonw\n", Some("test-binary-1.1-win.exe"), false),
            ("#! /usr/bin/pythonw\n", Some("test-binary-1.1-win.exe"), true),
        ];
        for (script, expect, windowed) in cases {
            let got = from_script(script, *windowed);
            match expect {
                Some(name) => {
                    let exe = got
                        .unwrap_or_else(|| panic!("no match for {:?}", script))
                        .executable;
                    assert!(
                        path_matches(&exe, Path::new(name)),
                        "script {:?} gave {:?}",
                        script,
                        exe
                    );
                }
                None => assert!(got.is_none(), "script: {:?}", script),
            }
        }
    }

    #[test]
    fn test_default_py_shebang() {
        let t = |name: &str| {
            find_shebang_command(&installs(), &config(), name, false)
                .unwrap()
                .executable
        };
        assert!(path_matches(&t("python"), Path::new("test-binary-1.1.exe")));
        assert!(path_matches(&t("py"), Path::new("test-binary-1.1.exe")));
        assert!(path_matches(
            &t("pythonw"),
            Path::new("test-binary-1.1-win.exe")
        ));
        assert!(path_matches(&t("pyw"), Path::new("test-binary-1.1-win.exe")));
    }

    #[test]
    fn test_coding_comment() {
        let cases: &[(&str, Option<&str>)] = &[
            ("# not a coding comment", None),
            ("# coding: utf-8-sig", Some("utf-8-sig")),
            ("# coding: utf-8", Some("utf-8")),
            ("# coding: ascii", Some("ascii")),
            ("# actually a coding: comment", Some("comment")),
            ("print('no comment here')", None),
        ];
        for (line, expect) in cases {
            assert_eq!(
                parse_coding_comment(line).as_deref(),
                *expect,
                "line: {:?}",
                line
            );
        }
    }

    #[test]
    fn test_quote_one_arg() {
        let cases: &[(&str, &str)] = &[
            ("abc", "abc"),
            ("a b c", "\"a b c\""),
            ("abc ", "\"abc \""),
            (" abc", "\" abc\""),
            ("a1\\b\\c", "a1\\b\\c"),
            ("a2\\ b", "\"a2\\ b\""),
            ("a3\\b\\", "a3\\b\\"),
            ("a4 b\\", "\"a4 b\\\\\""),
            ("a5 b\\\\", "\"a5 b\\\\\\\\\""),
            ("a1\"b", "a1\\\"b"),
            ("a2\\\"b", "a2\\\\\\\"b"),
            ("a3\\\\\"b", "a3\\\\\\\\\\\"b"),
            ("a5 \"b", "\"a5 \\\"b\""),
            ("a6\\ \"b", "\"a6\\ \\\"b\""),
            ("a7 \\\"b", "\"a7 \\\\\\\"b\""),
        ];
        for (arg, expect) in cases {
            assert_eq!(&maybe_quote(arg), expect, "arg: {:?}", arg);
        }
    }

    #[test]
    fn test_quote_one_quoted_arg() {
        assert_eq!(maybe_quote("\"a1 b\""), "\"a1 b\"");
        assert_eq!(maybe_quote("\"a2\" b\""), "\"a2\\\" b\"");
    }

    #[test]
    fn test_quote_args_roundtrip() {
        let cases: &[(&[&str], &str)] = &[
            (&["a1", "b", "c"], "a1 b c"),
            (&["a2 b", "c d"], "\"a2 b\" \"c d\""),
            (&["a3\"b", "c\"d", "e f"], "a3\\\"b c\\\"d \"e f\""),
            (&["a4\"b c\"d", "e f"], "\"a4\\\"b c\\\"d\" \"e f\""),
            (&["a5\\b\\", "c\\d"], "a5\\b\\ c\\d"),
            (&["a6\\b\\ c\\", "d\\e"], "\"a6\\b\\ c\\\\\" d\\e"),
        ];
        for (args, expect) in cases {
            assert_eq!(&quote_args(args), expect, "args: {:?}", args);
            assert_eq!(&split_args(expect), args, "cmdline: {:?}", expect);
        }
    }
}
