use clap::{
    builder::{
        styling::{AnsiColor, Effects, Styles},
        ValueParser,
    },
    Arg, ArgAction, ColorChoice, Command,
};
use std::path::PathBuf;

pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

fn check_command() -> Command {
    Command::new("check")
        .about("Report removed and unknown fields in the config file")
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print one JSON object per field")
                .action(ArgAction::SetTrue),
        )
}

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    Command::new("authgate")
        .about("Authenticate service for the identity-aware proxy")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand(check_command())
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the JSON config file")
                .env("AUTHGATE_CONFIG")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("authenticate-service-url")
                .long("authenticate-service-url")
                .help("Public URL of the authenticate service, example: https://authenticate.example.com")
                .env("AUTHGATE_AUTHENTICATE_SERVICE_URL"),
        )
        .arg(
            Arg::new("shared-secret")
                .long("shared-secret")
                .help("Base64 encoded 32 byte secret shared between services")
                .env("AUTHGATE_SHARED_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("cookie-secret")
                .long("cookie-secret")
                .help("Base64 encoded 32 byte secret used to protect session cookies")
                .env("AUTHGATE_COOKIE_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("signing-key")
                .long("signing-key")
                .help("Base64 encoded PEM or DER public/private RSA key")
                .env("AUTHGATE_SIGNING_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("installation-id")
                .long("installation-id")
                .help("Installation id sent to the data broker")
                .env("AUTHGATE_INSTALLATION_ID"),
        )
        .arg(
            Arg::new("services")
                .long("services")
                .help("Comma separated list of services this process runs")
                .env("AUTHGATE_SERVICES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("outbound-port")
                .long("outbound-port")
                .help("Local port of the data broker listener")
                .default_value("5443")
                .env("AUTHGATE_OUTBOUND_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .env("AUTHGATE_LOG_LEVEL")
                .global(true)
                .action(ArgAction::Count)
                .value_parser(validator_log_level()),
        )
}
