use anyhow::Result;
use itertools::Itertools;
use yastatsd_config::Config;

/// Validates the configuration before anything is started.
pub fn check_config(config: &Config) -> Result<()> {
    config.validate()?;

    if config.graphite().is_none() && config.repeaters().is_empty() {
        anyhow::bail!(
            "neither graphite nor repeaters are configured, all received metrics would be lost"
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        yastatsd_log::info!("launching yastatsd without config folder");
    } else {
        yastatsd_log::info!(
            "launching yastatsd from config folder {}",
            config.path().display()
        );
    }

    yastatsd_log::info!("  udp address: {}", config.udp_addr());
    yastatsd_log::info!("  flush interval: {:?}", config.flush_interval());
    yastatsd_log::info!(
        "  percent thresholds: {}",
        config.percent_thresholds().iter().join(", ")
    );

    match config.graphite() {
        Some(graphite) => yastatsd_log::info!("  graphite: {}", graphite.addr()),
        None => yastatsd_log::info!("  graphite: -"),
    }

    if config.repeaters().is_empty() {
        yastatsd_log::info!("  repeaters: -");
    } else {
        yastatsd_log::info!("  repeaters: {}", config.repeaters().iter().join(", "));
    }

    yastatsd_log::info!("  log level: {}", config.logging().level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_config_requires_output() {
        let config = Config::from_json_value(serde_json::json!({
            "graphite": {"enabled": false},
        }))
        .unwrap();

        let error = check_config(&config).unwrap_err();
        assert!(error.to_string().contains("neither graphite nor repeaters"));
    }

    #[test]
    fn test_check_config_with_repeater_only() {
        let config = Config::from_json_value(serde_json::json!({
            "yastatsd": {"repeaters": [{"host": "10.0.0.2", "port": 8125}]},
            "graphite": {"enabled": false},
        }))
        .unwrap();

        assert!(check_config(&config).is_ok());
    }

    #[test]
    fn test_check_config_rejects_invalid_values() {
        let config = Config::from_json_value(serde_json::json!({
            "yastatsd": {"percent_thresholds": [0]},
        }))
        .unwrap();

        assert!(check_config(&config).is_err());
    }
}
