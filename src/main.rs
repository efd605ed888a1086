//! scriptline CLI binary
//!
//! All logic is in the library; main.rs only invokes cli::run().

fn main() {
    // cli::run() prints everything, errors included; main only maps the exit code
    let code = scriptline::cli::run();
    if code != scriptline::ExitCode::SUCCESS {
        std::process::exit(code.as_i32());
    }
}
