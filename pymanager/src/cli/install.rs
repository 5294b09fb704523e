use std::path::PathBuf;

use anyhow::Error;
use clap::Parser;

use crate::config::Config;
use crate::installer::{self, InstallOptions};
use crate::session::Session;

/// Downloads new Python runtimes and sets up shortcuts and other
/// registration.
#[derive(Parser, Debug)]
pub struct Args {
    /// One or more tags to install (Company\Tag format), or 'default'.
    tags: Vec<String>,
    /// Specify index.json to use.
    #[arg(short, long)]
    source: Option<String>,
    /// Extract the runtime to a location instead of installing.
    #[arg(short, long)]
    target: Option<PathBuf>,
    /// Prepare an offline index with one or more runtimes.
    #[arg(short, long)]
    download: Option<PathBuf>,
    /// Re-download and overwrite an existing install.
    #[arg(short, long)]
    force: bool,
    /// Overwrite an existing install if a newer version is available.
    #[arg(short, long, alias = "upgrade")]
    update: bool,
    /// Re-extract the current version and recreate its registration.
    #[arg(long)]
    repair: bool,
    /// Update shortcuts and aliases for all installed versions.
    #[arg(long)]
    refresh: bool,
    /// Require TAG to exactly match the install ID. (For advanced use.)
    #[arg(long)]
    by_id: bool,
    /// Choose the runtime but do not install it.
    #[arg(long)]
    dry_run: bool,
    /// Re-run the system configuration helper.
    #[arg(long)]
    configure: bool,
    /// Select the runtime to install from a script's shebang.
    #[arg(long, value_name = "SCRIPT")]
    from_script: Option<PathBuf>,
    /// Only process these shortcut kinds.
    #[arg(long, value_delimiter = ',')]
    enable_shortcut_kinds: Option<Vec<String>>,
    /// Skip these shortcut kinds.
    #[arg(long, value_delimiter = ',')]
    disable_shortcut_kinds: Option<Vec<String>>,
    /// Set when the manager performs an automatic install.
    #[arg(long, hide = true)]
    automatic: bool,
    /// Always accept confirmation prompts.
    #[arg(short = 'y', long)]
    yes: bool,
    /// Enables verbose diagnostics.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Turns off all output.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

pub fn execute(cmd: Args) -> Result<(), Error> {
    let output = super::apply_verbosity(cmd.verbose, cmd.quiet);

    let mut config = (*Config::current()).clone();
    if let Some(enable) = &cmd.enable_shortcut_kinds {
        config.enable_shortcut_kinds = Some(enable.clone());
    }
    if let Some(disable) = &cmd.disable_shortcut_kinds {
        config.disable_shortcut_kinds = disable.clone();
    }
    // installs never run against the active venv
    config.virtual_env = None;

    super::show_welcome(&config, output);
    let mut session = Session::new();

    if cmd.configure {
        return crate::firstrun::first_run(&mut session, &config, true, cmd.yes, output);
    }

    let mut opts = InstallOptions {
        tags: cmd.tags,
        source: cmd.source,
        target: cmd.target,
        download: cmd.download,
        force: cmd.force,
        update: cmd.update,
        repair: cmd.repair,
        refresh: cmd.refresh,
        by_id: cmd.by_id,
        dry_run: cmd.dry_run,
        automatic: cmd.automatic,
        from_script: cmd.from_script,
        assume_yes: cmd.yes,
    };
    installer::execute(&mut session, &config, &mut opts, output)
}
