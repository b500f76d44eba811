//! Provides the main entry point to the program.
use human_panic::{metadata, setup_panic};
use swinggrid::cli::run_cli;
use swinggrid::log;

fn main() {
    setup_panic!(metadata!().support(
        "Open an issue describing what you were doing when the crash occurred, attaching the \
        crash report file."
    ));

    if let Err(err) = run_cli() {
        if log::is_logger_initialised() {
            ::log::error!("{err:?}");
        } else {
            eprintln!("Error: {err:?}");
        }

        std::process::exit(1);
    }
}
