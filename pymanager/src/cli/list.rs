use anyhow::{bail, Error};
use clap::Parser;

use crate::config::Config;
use crate::errors::ArgumentError;
use crate::index::IndexDownloader;
use crate::installs::{get_install_alias_names, get_installs_with_default, Install};
use crate::session::Session;
use crate::tags::{install_matches_any, tag_or_range, TagRange};
use crate::utils::CommandOutput;

/// Shows installed Python runtimes, optionally filtered or formatted.
#[derive(Parser, Debug)]
pub struct Args {
    /// Filter results (Company\Tag with optional <, <=, >, >= prefix).
    filters: Vec<String>,
    /// Specify list format: table, json, jsonl, id, exe, prefix, url.
    #[arg(short, long, default_value = "table")]
    format: String,
    /// Only display the first result that matches the filter.
    #[arg(short = '1', long)]
    one: bool,
    /// List runtimes available to install from the default index.
    #[arg(long)]
    online: bool,
    /// List runtimes from a particular index.
    #[arg(short, long)]
    source: Option<String>,
    /// Only list Python installs managed by the tool.
    #[arg(long)]
    only_managed: bool,
    /// Enables verbose diagnostics.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Turns off all output.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn tag_with_company(config: &Config, install: &Install) -> String {
    let mut tag = install.tag.clone();
    if !config.default_platform.is_empty() {
        if let Some(base) = tag.strip_suffix(&config.default_platform) {
            tag = format!("{}[{}]", base, config.default_platform);
        }
    }
    if install.company.eq_ignore_ascii_case(crate::tags::DEFAULT_COMPANY)
        || install.company == "---"
        || install.company.is_empty()
    {
        tag
    } else {
        format!("{}\\{}", install.company, tag)
    }
}

fn ljust(s: &str, width: usize) -> String {
    if s.len() <= width {
        format!("{:<width$}", s)
    } else {
        format!("{}...", &s[..width.saturating_sub(3)])
    }
}

fn format_table(config: &Config, installs: &[Install]) {
    let headers = ["Tag", " ", "Name", "Managed By", "Version", "Alias"];
    let mut seen_alias = std::collections::HashSet::new();
    let rows: Vec<(bool, [String; 6])> = installs
        .iter()
        .map(|i| {
            let aliases: Vec<_> = i
                .alias
                .iter()
                .filter(|a| seen_alias.insert(a.name.to_ascii_lowercase()))
                .cloned()
                .collect();
            (
                i.unmanaged,
                [
                    tag_with_company(config, i),
                    if i.is_default { "*".into() } else { " ".into() },
                    i.display_name().to_string(),
                    i.company.clone(),
                    i.sort_version.to_string(),
                    get_install_alias_names(&aliases, false).join(", "),
                ],
            )
        })
        .collect();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for (_, row) in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len()).min(60);
        }
    }

    let header_line = headers
        .iter()
        .enumerate()
        .map(|(idx, h)| ljust(h, widths[idx]))
        .collect::<Vec<_>>()
        .join("  ");
    echo!("{}", header_line.trim_end());

    let mut any_shown = false;
    for (unmanaged, row) in &rows {
        if *unmanaged {
            continue;
        }
        let line = row
            .iter()
            .enumerate()
            .map(|(idx, cell)| ljust(cell, widths[idx]))
            .collect::<Vec<_>>()
            .join("  ");
        echo!("{}", line.trim_end());
        any_shown = true;
    }
    if !any_shown {
        echo!("-- No runtimes. Use 'py install <version>' to install one. --");
    }
    let mut shown_header = false;
    for (unmanaged, row) in &rows {
        if !*unmanaged {
            continue;
        }
        if !shown_header {
            echo!();
            echo!("* These runtimes were found, but cannot be updated or uninstalled. *");
            shown_header = true;
        }
        let line = row
            .iter()
            .enumerate()
            .map(|(idx, cell)| ljust(cell, widths[idx]))
            .collect::<Vec<_>>()
            .join("  ");
        echo!("{}", line.trim_end());
    }
}

fn format_legacy(config: &Config, installs: &[Install], paths: bool) {
    let mut seen_default = false;
    for install in installs {
        let tag = if install.id == crate::installs::ACTIVE_VENV_ID {
            seen_default = true;
            "  *".to_string()
        } else {
            let mut tag = format!(" -V:{}", tag_with_company(config, install));
            if !seen_default && install.is_default {
                tag = format!("{} *", tag);
                seen_default = true;
            }
            tag
        };
        let detail = if paths {
            install.executable_path().display().to_string()
        } else {
            install.display_name().to_string()
        };
        echo!("{:<17} {}", tag, detail);
    }
}

fn format_installs(config: &Config, format: &str, installs: &[Install]) -> Result<(), Error> {
    match format {
        "table" => format_table(config, installs),
        "json" => {
            echo!("{}", serde_json::to_string(&serde_json::json!({ "versions": installs }))?);
        }
        "jsonl" => {
            for install in installs {
                echo!("{}", serde_json::to_string(install)?);
            }
        }
        "id" => {
            for install in installs {
                // internal ids are not useful output
                if install.id.starts_with("__") {
                    continue;
                }
                echo!("{}", install.id);
            }
        }
        "exe" => {
            for install in installs {
                echo!("{}", install.executable_path().display());
            }
        }
        "prefix" => {
            for install in installs {
                if let Some(prefix) = &install.prefix {
                    echo!("{}", prefix.display());
                }
            }
        }
        "url" => {
            for install in installs {
                if !install.url.is_empty() {
                    echo!("{}", install.url);
                }
            }
        }
        "legacy" => format_legacy(config, installs, false),
        "legacy-paths" => format_legacy(config, installs, true),
        other => {
            bail!(ArgumentError(format!(
                "'{}' is not a valid format; expected one of: exe, id, json, jsonl, \
                 prefix, table, url",
                other
            )));
        }
    }
    Ok(())
}

fn installs_from_index(
    session: &mut Session,
    source: &str,
    filters: &[TagRange],
    output: CommandOutput,
) -> Result<Vec<Install>, Error> {
    let url = crate::index::as_source_url(source)?;
    let mut installs = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for page in IndexDownloader::new(session, &url, output) {
        let page = page?;
        installs.extend(page.find_all(filters, &mut seen).cloned());
    }
    Ok(installs)
}

pub fn execute(cmd: Args) -> Result<(), Error> {
    let output = super::apply_verbosity(cmd.verbose, cmd.quiet);
    let config = Config::current();
    super::show_welcome(&config, output);

    let mut filters = Vec::new();
    for arg in &cmd.filters {
        let spec = if arg.eq_ignore_ascii_case("default") {
            config.default_tag.clone()
        } else {
            arg.clone()
        };
        match tag_or_range(&spec) {
            Ok(range) => filters.push(range),
            Err(err) => warn!("{}", err),
        }
    }

    let mut installs = if cmd.online || cmd.source.is_some() {
        let mut session = Session::new();
        let source = cmd.source.clone().unwrap_or_else(|| config.source.clone());
        installs_from_index(&mut session, &source, &filters, output)?
    } else {
        let mut installs = get_installs_with_default(&config, !cmd.only_managed);
        if !filters.is_empty() {
            installs.retain(|i| install_matches_any(i, &filters, true));
        }
        if cmd.only_managed {
            installs.retain(|i| !i.unmanaged);
        }
        installs
    };

    if cmd.one {
        let default = installs.iter().position(|i| i.is_default).unwrap_or(0);
        if !installs.is_empty() {
            installs = vec![installs.swap_remove(default)];
        }
    }

    format_installs(&config, &cmd.format, &installs)
}
