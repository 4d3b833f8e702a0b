use crate::cli::actions::{check, server, Action};
use crate::config::DEFAULT_OUTBOUND_PORT;
use anyhow::{Context, Result};
use clap::ArgMatches;
use secrecy::SecretString;
use std::path::PathBuf;

fn secret(matches: &ArgMatches, name: &str) -> Option<SecretString> {
    matches
        .get_one::<String>(name)
        .map(|s| SecretString::from(s.clone()))
}

pub fn handler(matches: &ArgMatches) -> Result<Action> {
    if let Some(sub_m) = matches.subcommand_matches("check") {
        let config_path = sub_m
            .get_one::<PathBuf>("config")
            .cloned()
            .context("missing required argument: --config")?;

        return Ok(Action::Check(check::Args {
            config_path,
            json: sub_m.get_flag("json"),
        }));
    }

    Ok(Action::Server(server::Args {
        config_path: matches.get_one::<PathBuf>("config").cloned(),
        authenticate_service_url: matches
            .get_one::<String>("authenticate-service-url")
            .cloned(),
        shared_secret: secret(matches, "shared-secret"),
        cookie_secret: secret(matches, "cookie-secret"),
        signing_key: secret(matches, "signing-key"),
        installation_id: matches.get_one::<String>("installation-id").cloned(),
        services: matches
            .get_many::<String>("services")
            .map(|values| values.cloned().collect()),
        outbound_port: matches
            .get_one::<u16>("outbound-port")
            .copied()
            .unwrap_or(DEFAULT_OUTBOUND_PORT),
    }))
}
