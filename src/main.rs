use std::time::Instant;

use log::LevelFilter;

use overhead_slurp::args::get_args;
use overhead_slurp::errors::OverheadSlurpError;
use overhead_slurp::parser::ParserOptions;
use overhead_slurp::slurp::slurp_recording;

fn main() {
    std::process::exit(match main_result() {
        Ok(_) => 0,
        Err(err) => {
            eprintln!("error: {}", err);
            1
        }
    });
}

fn main_result() -> Result<(), OverheadSlurpError> {
    let now = Instant::now();
    let args = get_args()?;
    init_logger(args.debug);

    let options = ParserOptions {
        hide_experimentals: args.hide_experimentals,
    };
    let recorder = slurp_recording(&args.file_path, args.top, options)?;
    println!("{}", recorder.render_summary());

    println!("File successfully processed in {:?}", now.elapsed());
    Ok(())
}

fn log_level(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Logs to stderr, `RUST_LOG` refines the level picked by `--debug`.
fn init_logger(debug: bool) {
    let result = env_logger::Builder::new()
        .filter_level(log_level(debug))
        .parse_default_env()
        .format_timestamp(None)
        .try_init();
    // only fails if a logger is already installed
    if let Err(e) = result {
        eprintln!("logger not installed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_selects_level() {
        assert_eq!(log_level(true), LevelFilter::Debug);
        assert_eq!(log_level(false), LevelFilter::Warn);
    }

    #[test]
    fn logger_is_installed_once() {
        init_logger(true);
        let installed = log::max_level();
        if std::env::var_os("RUST_LOG").is_none() {
            assert_eq!(installed, LevelFilter::Debug);
        }
        // a second installation is reported, not fatal
        init_logger(false);
        assert_eq!(log::max_level(), installed);
    }
}
