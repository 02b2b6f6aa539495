//! Thin CLI entry point; all real logic lives in the `zipcraft` library.

fn main() {
    std::process::exit(zipcraft::cli::run());
}
