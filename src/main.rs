use clap::Parser;
use log::error;

use atf2ael::driver::{self, AtfConverter, Cli, ExternalAtfConverter};

/// `-In`/`-Out` style flags are single-dash, multi-letter (matching the
/// reference tool, spec §6.3) rather than clap's double-dash convention;
/// normalize argv before handing it to the derive parser so usage errors
/// (unknown/missing flags) still come out of clap itself as exit code 2.
fn normalize_argv(args: impl Iterator<Item = String>) -> Vec<String> {
    args.map(|a| {
        let bytes = a.as_bytes();
        let is_single_dash_word =
            bytes.len() > 2 && bytes[0] == b'-' && bytes[1] != b'-' && bytes[1].is_ascii_alphabetic();
        if is_single_dash_word {
            format!("-{a}")
        } else {
            a
        }
    })
    .collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let argv = normalize_argv(std::env::args());
    let cli = Cli::parse_from(argv);

    let converter: Box<dyn AtfConverter> = Box::new(ExternalAtfConverter::default());
    if let Err(err) = driver::run(&cli, converter.as_ref()) {
        error!("{err}");
        std::process::exit(driver::exit_code_for(&err));
    }
}
