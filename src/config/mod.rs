//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::proximity::INFECTION_RANGE;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,
    /// Allowed client origins for CORS; any origin when unset
    pub client_origin: Option<String>,
    /// Game rules
    pub game: GameConfig,
}

/// Tunable game rules
#[derive(Clone, Debug, PartialEq)]
pub struct GameConfig {
    /// Players needed before a countdown starts
    pub min_players: usize,
    /// Delay between reaching `min_players` and the round starting
    pub countdown: Duration,
    /// Round length
    pub round: Duration,
    /// Pause after a round before the next countdown is considered
    pub restart_delay: Duration,
    /// Tag distance on the ground plane
    pub infection_range: f32,
    /// Infect on proximity after each movement, not only on explicit requests
    pub proximity_sweep: bool,
    /// Fixed seed for picking the initial infected player
    pub rng_seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            countdown: Duration::from_millis(5000),
            round: Duration::from_millis(60000),
            restart_delay: Duration::from_millis(5000),
            infection_range: INFECTION_RANGE,
            proximity_sweep: true,
            rng_seed: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let defaults = GameConfig::default();
        let game = GameConfig {
            min_players: parse_or(&lookup, "MIN_PLAYERS", defaults.min_players)?,
            countdown: millis_or(&lookup, "COUNTDOWN_MS", defaults.countdown)?,
            round: millis_or(&lookup, "ROUND_MS", defaults.round)?,
            restart_delay: millis_or(&lookup, "RESTART_DELAY_MS", defaults.restart_delay)?,
            infection_range: parse_or(&lookup, "INFECTION_RANGE", defaults.infection_range)?,
            proximity_sweep: parse_or(&lookup, "PROXIMITY_SWEEP", defaults.proximity_sweep)?,
            rng_seed: lookup("SESSION_SEED")
                .map(|raw| parse("SESSION_SEED", &raw))
                .transpose()?,
        };

        if game.min_players == 0 {
            return Err(ConfigError::Invalid {
                var: "MIN_PLAYERS",
                value: "0".to_string(),
            });
        }
        if !game.infection_range.is_finite() || game.infection_range <= 0.0 {
            return Err(ConfigError::Invalid {
                var: "INFECTION_RANGE",
                value: game.infection_range.to_string(),
            });
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            log_json: log_json(&lookup)?,

            client_origin: lookup("CLIENT_ORIGIN").filter(|origin| !origin.trim().is_empty()),

            game,
        })
    }
}

/// `LOG_FORMAT` is `text` (default) or `json`
fn log_json<F>(lookup: &F) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup("LOG_FORMAT") {
        None => Ok(false),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(false),
            "json" => Ok(true),
            _ => Err(ConfigError::Invalid {
                var: "LOG_FORMAT",
                value: raw,
            }),
        },
    }
}

fn parse<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: raw.to_string(),
    })
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => parse(var, &raw),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) => parse::<u64>(var, &raw).map(Duration::from_millis),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_game_rules() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert!(config.client_origin.is_none());
        assert_eq!(config.game, GameConfig::default());
        assert_eq!(config.game.min_players, 2);
        assert_eq!(config.game.countdown, Duration::from_millis(5000));
        assert_eq!(config.game.round, Duration::from_millis(60000));
        assert_eq!(config.game.restart_delay, Duration::from_millis(5000));
        assert_eq!(config.game.infection_range, 2.5);
    }

    #[test]
    fn game_rules_are_overridable() {
        let config = load(&[
            ("PORT", "3000"),
            ("MIN_PLAYERS", "3"),
            ("COUNTDOWN_MS", "100"),
            ("ROUND_MS", "2000"),
            ("RESTART_DELAY_MS", "300"),
            ("INFECTION_RANGE", "4.0"),
            ("PROXIMITY_SWEEP", "false"),
            ("SESSION_SEED", "99"),
        ])
        .unwrap();

        assert_eq!(config.server_addr.port(), 3000);
        assert_eq!(config.game.min_players, 3);
        assert_eq!(config.game.countdown, Duration::from_millis(100));
        assert_eq!(config.game.round, Duration::from_millis(2000));
        assert_eq!(config.game.restart_delay, Duration::from_millis(300));
        assert_eq!(config.game.infection_range, 4.0);
        assert!(!config.game.proximity_sweep);
        assert_eq!(config.game.rng_seed, Some(99));
    }

    #[test]
    fn log_format_selects_json() {
        assert!(load(&[("LOG_FORMAT", "json")]).unwrap().log_json);
        assert!(load(&[("LOG_FORMAT", "JSON")]).unwrap().log_json);
        assert!(!load(&[("LOG_FORMAT", "text")]).unwrap().log_json);
        assert!(matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError::Invalid { var: "LOG_FORMAT", .. })
        ));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("ROUND_MS", "soon")]),
            Err(ConfigError::Invalid { var: "ROUND_MS", .. })
        ));
        assert!(matches!(
            load(&[("MIN_PLAYERS", "0")]),
            Err(ConfigError::Invalid { var: "MIN_PLAYERS", .. })
        ));
        assert!(matches!(
            load(&[("INFECTION_RANGE", "-1")]),
            Err(ConfigError::Invalid { var: "INFECTION_RANGE", .. })
        ));
        assert!(matches!(
            load(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::InvalidAddress)
        ));
    }
}
