// This module implements the definition of the command line app.
use clap::builder::ValueParser;
use clap::{Arg, ArgAction, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "A statsd-compatible metrics aggregation daemon.";

fn config_arg() -> Arg {
    Arg::new("config")
        .value_name("CONFIG")
        .long("config")
        .short('c')
        .global(true)
        .env("YASTATSD_CONFIG")
        .value_parser(ValueParser::path_buf())
        .help("The path to the config folder.")
}

/// Options that override values of the config file.
fn override_args() -> [Arg; 6] {
    [
        Arg::new("port")
            .value_name("PORT")
            .long("port")
            .short('p')
            .env("YASTATSD_PORT")
            .help("The UDP port to receive metrics on."),
        Arg::new("host")
            .value_name("HOST")
            .long("host")
            .short('H')
            .env("YASTATSD_HOST")
            .help("The network interface to bind to."),
        Arg::new("flush_interval")
            .value_name("SECONDS")
            .long("flush-interval")
            .env("YASTATSD_FLUSH_INTERVAL")
            .help("The length of a flush window in seconds."),
        Arg::new("graphite_host")
            .value_name("HOST")
            .long("graphite-host")
            .env("YASTATSD_GRAPHITE_HOST")
            .help("The Graphite host to send aggregates to."),
        Arg::new("graphite_port")
            .value_name("PORT")
            .long("graphite-port")
            .env("YASTATSD_GRAPHITE_PORT")
            .help("The port of Graphite's plaintext protocol."),
        Arg::new("log_level")
            .value_name("LEVEL")
            .long("log-level")
            .env("YASTATSD_LOG_LEVEL")
            .help("The log level: off, error, warn, info, debug or trace."),
    ]
}

pub fn make_app() -> Command {
    Command::new("yastatsd")
        .disable_help_subcommand(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(config_arg())
        .args(override_args().map(|arg| arg.global(true)))
        .subcommand(
            Command::new("run")
                .about("Run the daemon")
                .after_help(
                    "This runs yastatsd in the foreground until it's shut down. It binds to \
                     the UDP port and network interface configured in the config file. This is \
                     the default if no subcommand is given.",
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the config")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(
                    Command::new("show")
                        .about("Show the entire config for debugging purposes")
                        .after_help(
                            "This dumps out the entire config including the values which are \
                             not in the config file but filled in from defaults.",
                        )
                        .arg(
                            Arg::new("check")
                                .long("check")
                                .action(ArgAction::SetTrue)
                                .help("Validate the config and fail on invalid values."),
                        ),
                ),
        )
}
