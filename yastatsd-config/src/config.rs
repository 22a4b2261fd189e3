use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use yastatsd_log::{Level, LogConfig};

/// The flush interval used when none is configured.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// The shortest flush interval a ticker can run with.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|cause| cause.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
}

/// An error for values that are syntactically valid but out of range.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct OutOfRange(&'static str);

trait ConfigObject: DeserializeOwned + Serialize + Default {
    /// The basename of the config file, including the file extension.
    fn name() -> &'static str;

    /// The full filename of the config file.
    fn path(base: &Path) -> PathBuf {
        base.join(Self::name())
    }

    /// Loads the config file from a file within the given directory location.
    ///
    /// A missing file yields the default configuration.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => {
                return Err(ConfigError::wrap(error, ConfigErrorKind::CouldNotOpenFile).file(&path));
            }
        };

        // An empty YAML document deserializes to unit, not to an empty map.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path))
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The UDP port to receive metrics on.
    pub port: Option<String>,
    /// The interface to bind the UDP socket to.
    pub host: Option<String>,
    /// The flush interval in seconds.
    pub flush_interval: Option<String>,
    /// The Graphite host to send aggregates to.
    pub graphite_host: Option<String>,
    /// The Graphite plaintext port.
    pub graphite_port: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

/// A peer that receives a verbatim copy of every datagram.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Repeater {
    /// The hostname or IP address of the peer.
    pub host: String,
    /// The UDP port of the peer.
    pub port: u16,
}

impl fmt::Display for Repeater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Settings of the metrics listener and aggregation.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct Daemon {
    /// The interface to bind the UDP socket to.
    host: IpAddr,
    /// The UDP port to receive metrics on.
    port: u16,
    /// The length of a flush window in seconds.
    flush_interval: f64,
    /// Percentile thresholds reported for every timer.
    percent_thresholds: Vec<u8>,
    /// Peers receiving a copy of every datagram.
    repeaters: Vec<Repeater>,
    /// Seconds to wait for the final flush on graceful shutdown.
    shutdown_timeout: u64,
}

impl Default for Daemon {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8125,
            flush_interval: DEFAULT_FLUSH_INTERVAL.as_secs_f64(),
            percent_thresholds: vec![90],
            repeaters: Vec::new(),
            shutdown_timeout: 5,
        }
    }
}

/// Settings of the Graphite sink.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GraphiteConfig {
    /// Whether aggregates are sent to Graphite.
    ///
    /// Defaults to `true`.
    pub enabled: bool,
    /// The Graphite host.
    ///
    /// Defaults to `localhost`.
    pub host: String,
    /// The port of Graphite's plaintext protocol.
    ///
    /// Defaults to `2003`.
    pub port: u16,
    /// Prefix of counter paths.
    pub counter_prefix: String,
    /// Prefix of timer paths.
    pub timer_prefix: String,
    /// Prefix of gauge paths.
    pub gauge_prefix: String,
    /// Prefix of the `*.count` summary paths.
    pub summary_prefix: String,
    /// Seconds between reconnection attempts.
    ///
    /// Defaults to `5` seconds.
    pub conn_retry_interval: u64,
}

impl GraphiteConfig {
    /// Returns the `host:port` address of Graphite.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for GraphiteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "localhost".to_owned(),
            port: 2003,
            counter_prefix: "stats".to_owned(),
            timer_prefix: "stats.timers".to_owned(),
            gauge_prefix: "stats.gauges".to_owned(),
            summary_prefix: "statsd".to_owned(),
            conn_retry_interval: 5,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct ConfigValues {
    #[serde(default)]
    yastatsd: Daemon,
    #[serde(default)]
    graphite: GraphiteConfig,
    #[serde(default)]
    logging: LogConfig,
}

impl ConfigObject for ConfigValues {
    fn name() -> &'static str {
        "config.yml"
    }
}

/// Config struct.
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    ///
    /// If the folder does not contain a `config.yml`, the defaults are used.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path)?,
            path,
        })
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let daemon = &mut self.values.yastatsd;

        if let Some(host) = overrides.host {
            daemon.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            daemon.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(flush_interval) = overrides.flush_interval {
            daemon.flush_interval = flush_interval
                .parse()
                .map_err(|err| ConfigError::for_field(err, "flush_interval"))?;
        }

        let graphite = &mut self.values.graphite;

        if let Some(host) = overrides.graphite_host {
            graphite.host = host;
        }

        if let Some(port) = overrides.graphite_port {
            graphite.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "graphite_port"))?;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse::<Level>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        Ok(self)
    }

    /// Checks value ranges that cannot be expressed in the types.
    ///
    /// An invalid configuration must prevent the daemon from starting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let daemon = &self.values.yastatsd;

        let flush_interval = Duration::try_from_secs_f64(daemon.flush_interval).ok();
        if flush_interval.is_none_or(|interval| interval < MIN_FLUSH_INTERVAL) {
            return Err(ConfigError::for_field(
                OutOfRange("flush interval must be at least one millisecond"),
                "flush_interval",
            ));
        }

        if daemon
            .percent_thresholds
            .iter()
            .any(|&pct| pct == 0 || pct > 100)
        {
            return Err(ConfigError::for_field(
                OutOfRange("percent thresholds must be between 1 and 100"),
                "percent_thresholds",
            ));
        }

        let graphite = &self.values.graphite;
        if graphite.enabled {
            if graphite.host.is_empty() {
                return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("graphite.host"));
            }

            if graphite.conn_retry_interval == 0 {
                return Err(ConfigError::for_field(
                    OutOfRange("retry interval must be at least one second"),
                    "graphite.conn_retry_interval",
                ));
            }
        }

        Ok(())
    }

    /// Returns the path of the config folder.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the socket address to receive metrics on.
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.values.yastatsd.host, self.values.yastatsd.port)
    }

    /// Returns the length of a flush window.
    ///
    /// Invalid values fall back to the default, but are rejected by [`validate`](Self::validate).
    pub fn flush_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.values.yastatsd.flush_interval)
            .ok()
            .filter(|interval| *interval >= MIN_FLUSH_INTERVAL)
            .unwrap_or(DEFAULT_FLUSH_INTERVAL)
    }

    /// Returns the percentile thresholds reported for timers.
    pub fn percent_thresholds(&self) -> &[u8] {
        &self.values.yastatsd.percent_thresholds
    }

    /// Returns the peers receiving a copy of every datagram.
    pub fn repeaters(&self) -> &[Repeater] {
        &self.values.yastatsd.repeaters
    }

    /// Returns the time to wait for the final flush on graceful shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.yastatsd.shutdown_timeout)
    }

    /// Returns the Graphite sink configuration if it is enabled.
    pub fn graphite(&self) -> Option<&GraphiteConfig> {
        Some(&self.values.graphite).filter(|graphite| graphite.enabled)
    }

    /// Returns the interval between reconnection attempts to Graphite.
    pub fn conn_retry_interval(&self) -> Duration {
        Duration::from_secs(self.values.graphite.conn_retry_interval)
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.udp_addr(), "0.0.0.0:8125".parse().unwrap());
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.percent_thresholds(), &[90]);
        assert!(config.repeaters().is_empty());
        assert_eq!(config.conn_retry_interval(), Duration::from_secs(5));
        assert_eq!(config.graphite().unwrap().addr(), "localhost:2003");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r###"
yastatsd:
    port: 9125
    flush_interval: 2.5
    percent_thresholds: [50, 90, 99]
    repeaters:
        - host: peer1
          port: 8125
graphite:
    host: graphite.internal
    counter_prefix: ""
logging:
    level: debug
"###;

        let values: ConfigValues = serde_yaml::from_str(yaml).unwrap();
        let config = Config {
            values,
            path: PathBuf::new(),
        };

        assert_eq!(config.udp_addr().port(), 9125);
        assert_eq!(config.flush_interval(), Duration::from_millis(2500));
        assert_eq!(config.percent_thresholds(), &[50, 90, 99]);
        assert_eq!(config.repeaters()[0].to_string(), "peer1:8125");

        let graphite = config.graphite().unwrap();
        assert_eq!(graphite.host, "graphite.internal");
        assert_eq!(graphite.port, 2003);
        assert_eq!(graphite.counter_prefix, "");
        assert_eq!(graphite.timer_prefix, "stats.timers");
        assert_eq!(config.logging().level, Level::Debug);
    }

    #[test]
    fn test_graphite_disabled() {
        let config = Config::from_json_value(serde_json::json!({
            "graphite": {"enabled": false, "conn_retry_interval": 0}
        }))
        .unwrap();

        assert!(config.graphite().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.udp_addr().port(), 8125);
        assert_eq!(config.path(), dir.path());
    }

    #[test]
    fn test_from_path_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.yml"), "\n").unwrap();

        let config = Config::from_path(dir.path()).unwrap();
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_path_bad_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "yastatsd:\n  port: not-a-port\n").unwrap();

        let error = Config::from_path(dir.path()).unwrap_err();
        assert_eq!(error.kind(), ConfigErrorKind::BadYaml);
        assert!(error.source().is_some());
        assert_eq!(
            error.to_string(),
            format!("could not parse yaml config file (file {})", path.display())
        );
    }

    #[test]
    fn test_apply_override() {
        let mut config = Config::default();
        config
            .apply_override(OverridableConfig {
                port: Some("9000".to_owned()),
                host: Some("127.0.0.1".to_owned()),
                flush_interval: Some("1".to_owned()),
                graphite_host: Some("carbon".to_owned()),
                graphite_port: Some("2004".to_owned()),
                log_level: Some("trace".to_owned()),
            })
            .unwrap();

        assert_eq!(config.udp_addr(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.graphite().unwrap().addr(), "carbon:2004");
        assert_eq!(config.logging().level, Level::Trace);
    }

    #[test]
    fn test_apply_override_invalid() {
        let mut config = Config::default();
        let error = config
            .apply_override(OverridableConfig {
                port: Some("70000".to_owned()),
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
        insta::assert_snapshot!(error, @"invalid config value (field port)");
    }

    #[test]
    fn test_validate_flush_interval() {
        for interval in [0.0, -1.0, 0.0000001, f64::NAN, f64::INFINITY] {
            let mut config = Config::default();
            config.values.yastatsd.flush_interval = interval;

            let error = config.validate().unwrap_err();
            assert_eq!(error.kind(), ConfigErrorKind::InvalidValue);
            assert_eq!(
                error.to_string(),
                "invalid config value (field flush_interval)"
            );
        }
    }

    #[test]
    fn test_validate_thresholds() {
        for thresholds in [vec![0], vec![90, 101]] {
            let mut config = Config::default();
            config.values.yastatsd.percent_thresholds = thresholds;
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_validate_retry_interval() {
        let config = Config::from_json_value(serde_json::json!({
            "graphite": {"conn_retry_interval": 0}
        }))
        .unwrap();

        let error = config.validate().unwrap_err();
        assert_eq!(
            error.to_string(),
            "invalid config value (field graphite.conn_retry_interval)"
        );
    }

    #[test]
    fn test_to_yaml_string() {
        let yaml = Config::default().to_yaml_string().unwrap();
        let values: ConfigValues = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(values.yastatsd.port, 8125);
        assert_eq!(values.graphite, GraphiteConfig::default());
    }
}
