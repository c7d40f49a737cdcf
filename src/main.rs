use clap::Parser;

use classroom_restore::cli::{self, Cli};

fn main() {
    env_logger::init();
    let cli = Cli::parse();
    std::process::exit(cli::run(cli));
}
