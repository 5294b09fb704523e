use anyhow::Error;
use clap::Parser;

use crate::config::Config;
use crate::session::Session;
use crate::uninstaller::{self, UninstallOptions};

/// Removes one or more runtimes from this machine.
#[derive(Parser, Debug)]
pub struct Args {
    /// One or more runtimes to uninstall (Company\Tag format).  Each tag
    /// removes a single runtime, even if it matches more than one.
    tags: Vec<String>,
    /// Remove all runtimes, shortcuts, and cached files.  Ignores tags.
    #[arg(long)]
    purge: bool,
    /// Require TAG to exactly match the install ID. (For advanced use.)
    #[arg(long)]
    by_id: bool,
    /// Always accept confirmation prompts.
    #[arg(short = 'y', long, visible_alias = "force")]
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
    let config = Config::current();
    super::show_welcome(&config, output);

    let mut session = Session::new();
    let opts = UninstallOptions {
        tags: cmd.tags,
        purge: cmd.purge,
        by_id: cmd.by_id,
        assume_yes: cmd.yes,
    };
    uninstaller::execute(&mut session, &config, &opts, output)
}
