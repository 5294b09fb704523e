use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use anyhow::Error;
use clap::Parser;

use crate::config::Config;
use crate::errors::{NoInstallFound, NoInstalls, QuietExit};
use crate::installer::{self, InstallOptions};
use crate::installs::get_installs_with_default;
use crate::resolver::{get_install_to_run, SelectedRuntime};
use crate::session::Session;
use crate::utils::{exec_spawn, CommandOutput};

/// Launches the specified (or default) runtime, installing it first if
/// needed.
///
/// A leading `-V:<TAG>` selects a runtime by tag; `-3<VERSION>` is
/// shorthand for `-V:PythonCore\3<VERSION>`.  Remaining arguments are
/// passed to the runtime unchanged.
#[derive(Parser, Debug)]
pub struct Args {
    /// Arguments for the runtime, optionally preceded by -V:<TAG> or
    /// -3<VERSION>.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,
}

fn split_version_selector(args: &[OsString]) -> (Option<String>, usize) {
    let Some(first) = args.first().and_then(|a| a.to_str()) else {
        return (None, 0);
    };
    if let Some(tag) = first.strip_prefix("-V:") {
        return (Some(tag.to_string()), 1);
    }
    if first.starts_with("-3") {
        let version = &first[1..];
        if version
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == 't')
        {
            return (
                Some(format!("{}\\{}", crate::tags::DEFAULT_COMPANY, version)),
                1,
            );
        }
    }
    (None, 0)
}

fn resolve(
    config: &Config,
    tag: Option<&str>,
    script: Option<&Path>,
) -> Result<SelectedRuntime, Error> {
    let installs = get_installs_with_default(config, true);
    if tag.is_none() {
        if let Some(script) = script {
            if let Ok(selected) =
                crate::scripts::find_install_from_script(&installs, config, script, false)
            {
                return Ok(selected);
            }
        }
    }
    get_install_to_run(&installs, config, tag, false)
}

pub fn execute(cmd: Args) -> Result<(), Error> {
    let config = Config::current();
    let (tag, consumed) = split_version_selector(&cmd.args);
    let run_args = &cmd.args[consumed..];

    // a script argument can pick the runtime through its shebang
    let script = run_args
        .first()
        .map(Path::new)
        .filter(|p| p.is_file())
        .map(|p| p.to_path_buf());

    // stdout belongs to the launched runtime; any of our own chatter
    // goes to stderr
    let _guard = crate::tui::redirect_to_stderr(true);

    let selected = match resolve(&config, tag.as_deref(), script.as_deref()) {
        Ok(selected) => selected,
        Err(err)
            if err.downcast_ref::<NoInstallFound>().is_some()
                || err.downcast_ref::<NoInstalls>().is_some() =>
        {
            // the requested runtime is not installed yet
            let mut session = Session::new();
            let mut opts = InstallOptions {
                tags: tag.clone().into_iter().collect(),
                automatic: true,
                assume_yes: true,
                ..Default::default()
            };
            installer::execute(&mut session, &config, &mut opts, CommandOutput::Normal)?;
            resolve(&config, tag.as_deref(), script.as_deref())?
        }
        Err(err) => return Err(err),
    };

    if crate::tui::log_level() >= 3 {
        let mut display: Vec<String> =
            vec![selected.executable.display().to_string()];
        display.extend(run_args.iter().map(|a| a.to_string_lossy().into_owned()));
        debug!("launching: {}", crate::scripts::quote_args(&display));
    }
    if !selected.executable.is_file() {
        error!(
            "executable {} is missing; try 'py install --repair'",
            selected.executable.display()
        );
        return Err(Error::new(QuietExit(1)));
    }

    let mut command = Command::new(&selected.executable);
    command.args(run_args);
    match exec_spawn(&mut command)? {}
}
