#[macro_use]
mod tui;

mod aliases;
mod cli;
mod config;
mod download;
mod errors;
mod firstrun;
mod index;
mod installer;
mod installs;
mod resolver;
mod scripts;
mod session;
mod shortcuts;
mod tags;
mod uninstaller;
mod utils;
mod windows;

use crate::errors::{ArgumentError, QuietExit};

pub fn main() {
    let result = cli::execute();
    if let Err(err) = result {
        if err.downcast_ref::<QuietExit>().is_none() {
            error!("{:#}", err);
            if err.downcast_ref::<ArgumentError>().is_some() {
                elog!("Run 'py help' for usage.");
            } else {
                elog!("Please check any output above, and try again with -vv for more information.");
            }
        }
        std::process::exit(errors::exit_code(&err));
    }
}
