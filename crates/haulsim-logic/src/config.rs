//! Simulation configuration.
//!
//! Every field has a default from [`crate::constants`], and every struct is
//! `#[serde(default)]`, so a JSON file only needs the values it overrides:
//!
//! ```
//! use haulsim_logic::config::SimConfig;
//!
//! let config = SimConfig::from_json(r#"{ "movement": { "grid_size": 32 } }"#).unwrap();
//! assert_eq!(config.movement.grid_size, 32);
//! assert_eq!(config.movement.stuck_threshold_ms, 3000);
//! ```

use crate::constants::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} must be {requirement}")]
    Invalid {
        field: &'static str,
        requirement: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub movement: MovementConfig,
    pub hauling: HaulingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Upper bound (inclusive) of every axis.
    pub grid_size: i32,
    pub tick_interval_ms: u32,
    pub stuck_threshold_ms: u32,
    pub path_refresh_interval_ms: u32,
    pub path_cache_ttl_ms: u64,
    pub path_cache_capacity: usize,
    pub max_path_steps: usize,
    /// Agents block the cells they stand on for other agents.
    pub agents_block: bool,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            tick_interval_ms: MOVEMENT_TICK_MS,
            stuck_threshold_ms: STUCK_THRESHOLD_MS,
            path_refresh_interval_ms: PATH_REFRESH_INTERVAL_MS,
            path_cache_ttl_ms: PATH_CACHE_TTL_MS,
            path_cache_capacity: PATH_CACHE_CAPACITY,
            max_path_steps: MAX_PATH_STEPS,
            agents_block: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaulingConfig {
    pub scan_interval_ms: u32,
    pub arrival_threshold: f32,
    pub retention_ms: u64,
    pub reservation_timeout_ms: u64,
    /// `None` disables the active-time limit.
    pub task_timeout_ms: Option<u64>,
    pub priority_weight: f32,
    pub max_haul_quantity: u32,
    pub max_pending_tasks: usize,
}

impl Default for HaulingConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: NEED_SCAN_INTERVAL_MS,
            arrival_threshold: ARRIVAL_THRESHOLD,
            retention_ms: TERMINAL_RETENTION_MS,
            reservation_timeout_ms: RESERVATION_TIMEOUT_MS,
            task_timeout_ms: Some(TASK_TIMEOUT_MS),
            priority_weight: PRIORITY_WEIGHT,
            max_haul_quantity: MAX_HAUL_QUANTITY,
            max_pending_tasks: MAX_PENDING_TASKS,
        }
    }
}

impl SimConfig {
    /// Parse and validate a (possibly partial) JSON config.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.movement;
        let h = &self.hauling;
        check(m.grid_size >= 0, "movement.grid_size", "non-negative")?;
        check(m.tick_interval_ms > 0, "movement.tick_interval_ms", "positive")?;
        check(
            m.stuck_threshold_ms >= m.tick_interval_ms,
            "movement.stuck_threshold_ms",
            "at least one tick interval",
        )?;
        check(
            m.path_refresh_interval_ms > 0,
            "movement.path_refresh_interval_ms",
            "positive",
        )?;
        check(
            m.path_cache_capacity > 0,
            "movement.path_cache_capacity",
            "positive",
        )?;
        check(h.scan_interval_ms > 0, "hauling.scan_interval_ms", "positive")?;
        check(
            h.arrival_threshold.is_finite() && h.arrival_threshold >= 0.0,
            "hauling.arrival_threshold",
            "a finite non-negative distance",
        )?;
        check(
            h.priority_weight.is_finite() && h.priority_weight > 0.0,
            "hauling.priority_weight",
            "a finite positive weight",
        )?;
        check(h.max_haul_quantity > 0, "hauling.max_haul_quantity", "positive")?;
        check(h.max_pending_tasks > 0, "hauling.max_pending_tasks", "positive")?;
        Ok(())
    }
}

fn check(ok: bool, field: &'static str, requirement: &'static str) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid { field, requirement })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.movement.tick_interval_ms, 100);
        assert_eq!(config.movement.path_refresh_interval_ms, 500);
        assert_eq!(config.hauling.scan_interval_ms, 2000);
        assert_eq!(config.hauling.retention_ms, 30_000);
        assert!((config.hauling.arrival_threshold - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_json_gives_defaults() {
        let config = SimConfig::from_json("{}").unwrap();
        assert_eq!(config, SimConfig::default());
    }

    #[test]
    fn partial_override() {
        let config = SimConfig::from_json(
            r#"{ "hauling": { "scan_interval_ms": 500, "task_timeout_ms": null } }"#,
        )
        .unwrap();
        assert_eq!(config.hauling.scan_interval_ms, 500);
        assert_eq!(config.hauling.task_timeout_ms, None);
        assert_eq!(config.hauling.max_haul_quantity, MAX_HAUL_QUANTITY);
    }

    #[test]
    fn rejects_zero_tick() {
        let err = SimConfig::from_json(r#"{ "movement": { "tick_interval_ms": 0 } }"#)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "movement.tick_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SimConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("invalid config JSON"));
    }

    #[test]
    fn json_roundtrip() {
        let mut config = SimConfig::default();
        config.movement.agents_block = true;
        let raw = serde_json::to_string(&config).unwrap();
        assert_eq!(SimConfig::from_json(&raw).unwrap(), config);
    }
}
