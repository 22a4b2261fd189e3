use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use yastatsd_config::{Config, OverridableConfig};

use crate::cliapp::make_app;
use crate::setup;

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .map_or(Path::new("config"), PathBuf::as_path);

    let mut config = Config::from_path(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    config.apply_override(extract_config_args(&matches))?;

    match matches.subcommand() {
        Some(("config", matches)) => manage_config(&config, matches),
        // Running is the default when no subcommand is given.
        _ => run(config),
    }
}

/// Extracts config overrides from the command line and environment.
fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    let value = |name: &str| matches.get_one::<String>(name).cloned();

    OverridableConfig {
        port: value("port"),
        host: value("host"),
        flush_interval: value("flush_interval"),
        graphite_host: value("graphite_host"),
        graphite_port: value("graphite_port"),
        log_level: value("log_level"),
    }
}

fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", matches)) => {
            if matches.get_flag("check") {
                setup::check_config(config)?;
            }

            let yaml = config.to_yaml_string()?;
            #[allow(clippy::print_stdout)]
            {
                print!("{yaml}");
            }
            Ok(())
        }
        _ => unreachable!(),
    }
}

pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    yastatsd_log::init(config.logging());
    setup::dump_spawn_infos(&config);

    yastatsd_server::run(config)?;

    Ok(())
}
