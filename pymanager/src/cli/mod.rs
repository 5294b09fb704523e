use std::env;
use std::ffi::OsString;

use anyhow::Error;
use clap::Parser;

mod exec;
mod install;
mod list;
mod uninstall;

use git_testament::git_testament;

use crate::config::Config;
use crate::utils::CommandOutput;

git_testament!(TESTAMENT);

#[derive(Parser, Debug)]
#[command(name = "py", arg_required_else_help = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
    /// Print the version
    #[arg(long)]
    version: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Show installed Python runtimes
    List(list::Args),
    /// Download and install Python runtimes
    Install(install::Args),
    /// Remove runtimes from this machine
    Uninstall(uninstall::Args),
    /// Launch a runtime, installing it first if needed
    Exec(exec::Args),
}

/// The pre-manager launcher accepted a handful of flag-style commands;
/// they keep working by rewriting into the modern equivalents.
fn rewrite_legacy_args(mut argv: Vec<OsString>) -> Vec<OsString> {
    let legacy: Option<&[&str]> = match argv.get(1).and_then(|a| a.to_str()) {
        Some("--list") | Some("-0") => Some(&["list", "-f", "legacy"]),
        Some("--list-paths") | Some("-0p") => Some(&["list", "-f", "legacy-paths"]),
        _ => None,
    };
    if let Some(replacement) = legacy {
        argv.splice(1..2, replacement.iter().map(|s| OsString::from(*s)));
    }
    argv
}

pub fn execute() -> Result<(), Error> {
    crate::utils::init_ctrlc();
    if env::var_os("PYMANAGER_DEBUG").is_some() {
        crate::tui::set_log_level(3);
    }
    if env::var("PYTHON_COLORS").as_deref() == Ok("0") {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let argv = rewrite_legacy_args(env::args_os().collect());
    let args = Args::parse_from(argv);
    if args.version {
        return print_version();
    }
    let cmd = match args.command {
        Some(cmd) => cmd,
        None => unreachable!(),
    };

    match cmd {
        Command::List(cmd) => list::execute(cmd),
        Command::Install(cmd) => install::execute(cmd),
        Command::Uninstall(cmd) => uninstall::execute(cmd),
        Command::Exec(cmd) => exec::execute(cmd),
    }
}

fn print_version() -> Result<(), Error> {
    eprintln!("Python installation manager {}", env!("CARGO_PKG_VERSION"));
    eprintln!("commit: {}", TESTAMENT.commit);
    eprintln!(
        "platform: {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    Ok(())
}

/// Shows the post-update notice at most once per version, stamped under
/// the download directory.
pub(crate) fn show_welcome(config: &Config, output: CommandOutput) {
    if !config.welcome_on_update || output == CommandOutput::Quiet {
        return;
    }
    let stamp = config.download_dir.join("last_welcome.txt");
    let current = env!("CARGO_PKG_VERSION");
    if let Ok(text) = std::fs::read_to_string(&stamp) {
        if text.lines().next().map(str::trim) == Some(current) {
            return;
        }
    }
    if crate::utils::ensure_tree(&stamp).is_ok()
        && std::fs::write(&stamp, format!("{}\n", current)).is_ok()
    {
        echo!(
            "Python install manager was successfully updated to {}.",
            current
        );
        echo!("Run 'py install --refresh' to update any existing shortcuts.");
    }
}

pub(crate) fn apply_verbosity(verbose: u8, quiet: bool) -> CommandOutput {
    if verbose >= 2 {
        crate::tui::set_log_level(3);
    } else if verbose == 1 {
        crate::tui::set_log_level(2);
    } else if quiet {
        crate::tui::set_log_level(0);
    }
    CommandOutput::from_quiet_and_verbose(quiet, verbose > 0)
}
