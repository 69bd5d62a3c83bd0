use std::ffi::OsString;
use std::path::PathBuf;

use crate::app::{ApplicationCommand, ApplicationConfig};
use crate::bootstrap::BootstrapMode;
use crate::error::Error;
use clap::{arg, command, value_parser, ArgMatches, Command};

fn parse_config_file_location(value: &str) -> Result<ApplicationConfig, String> {
    let path = PathBuf::from(value);

    if !path.is_file() {
        return Err(format!("Configuration file {value} does not exists"));
    }

    ApplicationConfig::from_file(&path).map_err(|error| error.to_string())
}

fn parse_bootstrap_mode(value: &str) -> Result<BootstrapMode, String> {
    value.parse().map_err(|error: Error| error.to_string())
}

fn cli_command() -> Command {
    command!()
        .propagate_version(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(arg!(--"config" <CONFIG>).value_parser(parse_config_file_location))
        .subcommand(Command::new("position").about("Current binary log position of the source"))
        .subcommand(
            Command::new("status")
                .about("Checkpoint, queue length and bootstrap state of every database"),
        )
        .subcommand(
            Command::new("bootstrap")
                .about("Loads schema and rows from a mysqldump XML dump")
                .arg(
                    arg!(--"mode" <MODE>)
                        .required(false)
                        .value_parser(parse_bootstrap_mode),
                )
                .arg(
                    arg!(--"file" <FILE> "Existing dump to ingest instead of running mysqldump")
                        .required(false)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("load-data").about("Bulk loads configured tables through a tab-delimited export"),
        )
        .subcommand(
            Command::new("start").about("Captures binary log changes and applies them to the sink"),
        )
}

fn command_from_matches(matches: &ArgMatches) -> Result<ApplicationCommand, Error> {
    let configuration = matches
        .get_one::<ApplicationConfig>("config")
        .cloned()
        .ok_or_else(|| Error::Configuration("--config is required".into()))?;

    match matches.subcommand() {
        Some(("position", _)) => Ok(ApplicationCommand::Position(configuration)),
        Some(("status", _)) => Ok(ApplicationCommand::Status(configuration)),
        Some(("bootstrap", args)) => Ok(ApplicationCommand::Bootstrap(
            configuration,
            args.get_one::<BootstrapMode>("mode")
                .copied()
                .unwrap_or(BootstrapMode::Complete),
            args.get_one::<PathBuf>("file").cloned(),
        )),
        Some(("load-data", _)) => Ok(ApplicationCommand::LoadData(configuration)),
        Some(("start", _)) => Ok(ApplicationCommand::Start(configuration)),
        Some((other, _)) => Err(Error::Configuration(format!("unknown command {other}"))),
        None => Err(Error::Configuration("command is required".into())),
    }
}

pub fn command_from_cli() -> Result<ApplicationCommand, Error> {
    command_from_matches(&cli_command().get_matches())
}

pub fn command_from_args<I, T>(args: I) -> Result<ApplicationCommand, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = cli_command()
        .try_get_matches_from(args)
        .map_err(|error| Error::Configuration(error.to_string()))?;

    command_from_matches(&matches)
}
