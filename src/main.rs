mod alter;
mod cli;
mod config;
mod database;
mod ddl;
mod error;
mod export;
mod find;
mod import;
mod schema;
mod search;
mod stats;
mod utils;

use log::error;

use crate::cli::Cli;

fn main() {
    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
