use std::path::PathBuf;

use anyhow::Context;
use fortune_types::{GameConfig, GameKind, VariantConfig};

/// Streaks are walked from here unless a genesis round is configured
/// (2026-01-01T00:00:00Z).
const DEFAULT_GENESIS_MS: u64 = 1_767_225_600_000;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tick_ms: u64,
    pub db_path: PathBuf,
    /// Credited to a participant the first time they join.
    pub starting_balance: u64,
    pub wheel: GameConfig,
    pub crash: GameConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut wheel = load_game("ROUND_SERVER_WHEEL_CONFIG", GameConfig::wheel)?;
        let mut crash = load_game("ROUND_SERVER_CRASH_CONFIG", GameConfig::crash)?;

        let wheel_cycle = wheel.phases.total_cycle_ms().max(1);
        if let VariantConfig::Wheel(variant) = &mut wheel.variant {
            if let Ok(salt) = std::env::var("ROUND_SERVER_WHEEL_SALT") {
                variant.seed_salt = salt;
            }
            let fallback = if variant.genesis_round == 0 {
                DEFAULT_GENESIS_MS / wheel_cycle
            } else {
                variant.genesis_round
            };
            variant.genesis_round = read_u64("ROUND_SERVER_WHEEL_GENESIS_ROUND", fallback);
        }
        if let VariantConfig::Crash(variant) = &mut crash.variant {
            if let Ok(salt) = std::env::var("ROUND_SERVER_CRASH_SALT") {
                variant.seed_salt = salt;
            }
        }

        wheel
            .validate_for(GameKind::Wheel)
            .context("invalid wheel config")?;
        crash
            .validate_for(GameKind::Crash)
            .context("invalid crash config")?;

        Ok(Self {
            host: std::env::var("ROUND_SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: read_u16("ROUND_SERVER_PORT", 9124),
            tick_ms: read_ms("ROUND_SERVER_TICK_MS", 250).max(1),
            db_path: std::env::var("ROUND_SERVER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("round-server.sqlite")),
            starting_balance: read_u64("ROUND_SERVER_STARTING_BALANCE", 1_000),
            wheel,
            crash,
        })
    }
}

/// Load a game table from the JSON file named by `key`, or use the default.
fn load_game(key: &str, fallback: fn() -> GameConfig) -> anyhow::Result<GameConfig> {
    let Ok(path) = std::env::var(key) else {
        return Ok(fallback());
    };
    let raw = std::fs::read_to_string(&path).with_context(|| format!("read {key}={path}"))?;
    GameConfig::from_json(&raw).with_context(|| format!("parse {key}={path}"))
}

fn read_ms(key: &str, fallback: u64) -> u64 {
    read_u64(key, fallback)
}

fn read_u64(key: &str, fallback: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(fallback)
}

fn read_u16(key: &str, fallback: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_game_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.json");
        let mut config = GameConfig::crash();
        config.history_cap = 9;
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let key = "ROUND_SERVER_TEST_CRASH_CONFIG";
        std::env::set_var(key, &path);
        let loaded = load_game(key, GameConfig::wheel).unwrap();
        std::env::remove_var(key);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_game_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wheel.json");
        std::fs::write(&path, "{ not json").unwrap();

        let key = "ROUND_SERVER_TEST_BAD_CONFIG";
        std::env::set_var(key, &path);
        let result = load_game(key, GameConfig::wheel);
        std::env::remove_var(key);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_key_uses_fallback() {
        let loaded = load_game("ROUND_SERVER_TEST_UNSET", GameConfig::wheel).unwrap();
        assert_eq!(loaded, GameConfig::wheel());
    }

    #[test]
    fn test_read_helpers_fall_back() {
        std::env::set_var("ROUND_SERVER_TEST_PORT", "not-a-port");
        assert_eq!(read_u16("ROUND_SERVER_TEST_PORT", 7), 7);
        std::env::remove_var("ROUND_SERVER_TEST_PORT");
        std::env::set_var("ROUND_SERVER_TEST_TICK", "125");
        assert_eq!(read_ms("ROUND_SERVER_TEST_TICK", 1_000), 125);
        std::env::remove_var("ROUND_SERVER_TEST_TICK");
    }
}
