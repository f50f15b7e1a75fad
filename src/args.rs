use std::path::Path;

use clap::{crate_authors, crate_description, crate_name, crate_version, value_parser};
use clap::{Arg, ArgAction, Command};

use crate::errors::OverheadSlurpError;
use crate::errors::OverheadSlurpError::*;

#[derive(Debug, Clone)]
pub struct Args {
    pub file_path: String,
    pub top: usize,
    pub hide_experimentals: bool,
    pub debug: bool,
}

fn command() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!("\n"))
        .about(crate_description!())
        .arg(
            Arg::new("recordingFile")
                .help("binary flight recording file")
                .long("recordingFile")
                .short('r')
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new("top")
                .help("the top results to display")
                .long("top")
                .short('t')
                .num_args(1)
                .default_value("20")
                .value_parser(value_parser!(usize))
                .required(false),
        )
        .arg(
            Arg::new("hideExperimental")
                .help("hide experimental event types and fields")
                .long("hideExperimental")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .help("debug info")
                .long("debug")
                .short('d')
                .action(ArgAction::SetTrue),
        )
}

pub fn get_args() -> Result<Args, OverheadSlurpError> {
    args_from(std::env::args_os())
}

fn args_from<I, T>(raw: I) -> Result<Args, OverheadSlurpError>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = command().try_get_matches_from(raw)?;

    let file_path = matches
        .get_one::<String>("recordingFile")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();
    if !Path::new(&file_path).is_file() {
        return Err(InputFileNotFound { name: file_path });
    }

    let top = matches.get_one::<usize>("top").copied().unwrap_or(20);
    if top == 0 {
        return Err(InvalidTopPositiveInt);
    }

    Ok(Args {
        file_path,
        top,
        hide_experimentals: matches.get_flag("hideExperimental"),
        debug: matches.get_flag("debug"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_command() {
        command().debug_assert();
    }

    #[test]
    fn rejects_missing_file() {
        let result = args_from(["overhead-slurp", "-r", "/no/such/recording.jfr"]);
        assert!(matches!(result, Err(InputFileNotFound { .. })));
    }

    #[test]
    fn rejects_zero_top() {
        let result = args_from(["overhead-slurp", "-r", "Cargo.toml", "--top", "0"]);
        assert!(matches!(result, Err(InvalidTopPositiveInt)));
    }

    #[test]
    fn reads_flags() {
        let args = args_from(["overhead-slurp", "-r", "Cargo.toml", "--hideExperimental"]).unwrap();
        assert_eq!(args.top, 20);
        assert!(args.hide_experimentals);
        assert!(!args.debug);
    }

    #[test]
    fn requires_recording() {
        assert!(matches!(
            args_from(["overhead-slurp"]),
            Err(ClapError { .. })
        ));
    }
}
