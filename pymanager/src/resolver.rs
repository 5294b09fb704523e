use std::cmp::Reverse;
use std::path::PathBuf;

use anyhow::Error;

use crate::config::Config;
use crate::errors::NoInstallFound;
use crate::installs::Install;
use crate::tags::{company_sort_key, tag_or_range, Tag, TagRange};

/// A resolved runtime: the install plus the executable that services the
/// request.  Enumerations return owned values; nothing points back into
/// the registry.
#[derive(Debug, Clone)]
pub struct SelectedRuntime {
    pub install: Install,
    pub executable: PathBuf,
    pub windowed: bool,
}

fn platform_preference(tag: &Tag, requested: Option<&str>, default_platform: &str) -> u8 {
    match requested {
        // a platform-bearing request already filtered the candidates
        Some(_) => 0,
        None => {
            if tag.platform().eq_ignore_ascii_case(default_platform) {
                0
            } else {
                1
            }
        }
    }
}

/// Ranks installs whose `install-for` tags satisfy the range.
///
/// Order: exact platform-bearing tag matches, then stable over
/// prerelease, then the configured default platform, then newest
/// `sort-version`, PythonCore first, lexically smaller id.
pub fn get_matching_installs<'a>(
    installs: &'a [Install],
    range: &TagRange,
    default_platform: &str,
    single_tag: bool,
) -> Vec<(&'a Install, Tag)> {
    let loose_company = !range.has_company();
    let requested_platform = range.requested_platform();

    let mut matched: Vec<(&Install, Tag)> = Vec::new();
    for install in installs {
        let mut best: Option<Tag> = None;
        for raw in install.matchable_tags() {
            let tag: Tag = match raw.parse() {
                Ok(tag) => tag,
                Err(_) => continue,
            };
            if !range.satisfied_by_loose(&install.company, &tag, loose_company) {
                continue;
            }
            best = match best {
                None => Some(tag),
                Some(current) => {
                    let a = platform_preference(&tag, requested_platform, default_platform);
                    let b = platform_preference(&current, requested_platform, default_platform);
                    if a < b {
                        Some(tag)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        if let Some(tag) = best {
            matched.push((install, tag));
        }
    }

    let exact_request = if requested_platform.is_some() {
        // strip any Company\ scope before comparing tags
        let spec = range.as_str();
        let spec = spec.rsplit('\\').next().unwrap_or(spec);
        spec.parse::<Tag>().ok().map(|t| t.to_string())
    } else {
        None
    };

    matched.sort_by_key(|(install, tag)| {
        let exact = exact_request
            .as_deref()
            .map(|r| install.matchable_tags().iter().any(|t| t.eq_ignore_ascii_case(r)))
            .unwrap_or(false);
        (
            !exact,
            install.sort_version.is_prerelease(),
            platform_preference(tag, requested_platform, default_platform),
            Reverse(install.sort_version.clone()),
            company_sort_key(&install.company),
            install.id.clone(),
        )
    });

    if single_tag {
        matched.truncate(1);
    }
    matched
}

/// The id of the install to mark as the in-memory default, if any.
pub fn pick_default(installs: &[Install], config: &Config) -> Option<String> {
    let range = tag_or_range(&config.default_tag).ok()?;
    let managed: Vec<Install> = installs.iter().filter(|i| !i.unmanaged).cloned().collect();
    let matched = get_matching_installs(&managed, &range, &config.default_platform, true);
    matched.first().map(|(i, _)| i.id.clone())
}

/// Picks the executable servicing a request, honouring the windowed
/// flag.  When no windowed variant exists the plain executable is
/// returned unchanged.
pub fn select_executable(install: &Install, windowed: bool) -> PathBuf {
    if windowed {
        if let Some(prefix) = &install.prefix {
            if let Some(run) = install.run_for.iter().find(|r| r.windowed) {
                return prefix.join(&run.target);
            }
        }
        if let Some(exew) = &install.executablew {
            if let Some(prefix) = &install.prefix {
                return prefix.join(exew);
            }
        }
    }
    install.executable_path()
}

/// Resolves the install to run for an optional tag request.
pub fn get_install_to_run(
    installs: &[Install],
    config: &Config,
    tag: Option<&str>,
    windowed: bool,
) -> Result<SelectedRuntime, Error> {
    if installs.is_empty() {
        return Err(Error::new(crate::errors::NoInstalls));
    }

    let request = match tag {
        Some(t) if !t.is_empty() => {
            if t.eq_ignore_ascii_case("default") {
                config.default_install_tag.clone()
            } else {
                t.to_string()
            }
        }
        _ => config.default_tag.clone(),
    };

    if tag.map_or(true, |t| t.is_empty()) {
        // the active virtual environment services untagged requests
        if let Some(venv) = installs
            .iter()
            .find(|i| i.id == crate::installs::ACTIVE_VENV_ID)
        {
            return Ok(SelectedRuntime {
                executable: venv.executable_path(),
                install: venv.clone(),
                windowed,
            });
        }
        // then an explicitly defaulted install
        if let Some(install) = installs.iter().find(|i| i.is_default) {
            return Ok(SelectedRuntime {
                executable: select_executable(install, windowed),
                install: install.clone(),
                windowed,
            });
        }
    }

    let range = tag_or_range(&request)?;
    let matched = get_matching_installs(installs, &range, &config.default_platform, true);
    match matched.first() {
        Some((install, _)) => Ok(SelectedRuntime {
            executable: select_executable(install, windowed),
            install: (*install).clone(),
            windowed,
        }),
        None => Err(Error::new(NoInstallFound { request })),
    }
}
