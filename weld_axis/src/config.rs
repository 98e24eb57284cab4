//! Daemon configuration and the persistence seam.
//!
//! # TOML Example
//!
//! ```toml
//! [controller]
//! cycle_time_us = 1000
//! startup_delay_ms = 2000
//! rt_priority = 80
//!
//! [[axes]]
//! tag = "X"
//! vendor_id = 0xFB
//! product_code = 0x63500000
//! soft_limits_active = true
//! soft_lower_limit = -1000
//! soft_upper_limit = 1000
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, error};
use weld_common::axis::config::{AxisConfig, HomingDirection};
use weld_common::axis::types::{AxisIdentity, AxisTag};
use weld_common::bus::DeviceAddress;
use weld_common::config::{ConfigError, LogLevel};
use weld_common::consts::{CYCLE_TIME_US, DEFAULT_RT_PRIORITY, DEFAULT_STARTUP_DELAY_MS};
use weld_common::drive::family::DriveFamily;

// ─── Controller Section ─────────────────────────────────────────────

/// Timing and scheduling of the cyclic thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSettings {
    pub cycle_time_us: u64,
    /// Delay before the first tick.
    pub startup_delay_ms: u64,
    /// Start ticking on the next whole second after the delay.
    pub align_to_second: bool,
    pub rt_priority: i32,
    pub cpu_core: Option<usize>,
    /// Extra DEBUG lines at request entry points.
    pub debug_info: bool,
    pub log_level: LogLevel,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            cycle_time_us: CYCLE_TIME_US,
            startup_delay_ms: DEFAULT_STARTUP_DELAY_MS,
            align_to_second: true,
            rt_priority: DEFAULT_RT_PRIORITY,
            cpu_core: None,
            debug_info: false,
            log_level: LogLevel::Info,
        }
    }
}

impl CycleSettings {
    /// Settings for tests and tools: no startup delay, no alignment.
    pub fn immediate() -> Self {
        Self {
            startup_delay_ms: 0,
            align_to_second: false,
            ..Self::default()
        }
    }
}

// ─── Axis Entries ───────────────────────────────────────────────────

fn default_percent() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

/// One `[[axes]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisEntry {
    pub tag: AxisTag,
    pub vendor_id: u32,
    pub product_code: u32,
    #[serde(default)]
    pub instance: u16,
    #[serde(default = "default_true")]
    pub homeable: bool,
    #[serde(default)]
    pub soft_limits_active: bool,
    #[serde(default)]
    pub soft_lower_limit: i32,
    #[serde(default)]
    pub soft_upper_limit: i32,
    #[serde(default = "default_true")]
    pub homing_direction_positive: bool,
    #[serde(default)]
    pub mounting_right_top: bool,
    #[serde(default = "default_percent")]
    pub velocity_percent: i32,
    #[serde(default = "default_percent")]
    pub acceleration_percent: i32,
}

impl AxisEntry {
    pub fn address(&self) -> DeviceAddress {
        DeviceAddress::new(self.vendor_id, self.product_code, self.instance)
    }

    pub fn identity(&self) -> AxisIdentity {
        AxisIdentity::new(self.tag, self.address(), self.homeable)
    }

    /// Build the runtime settings, mapping percentages through the family.
    pub fn axis_config(&self) -> AxisConfig {
        let family = DriveFamily::detect(self.vendor_id, self.product_code);
        let profile = family.profile();
        let mut config = AxisConfig::for_family(profile)
            .with_homing_direction(HomingDirection::from_positive(self.homing_direction_positive));
        if family != DriveFamily::Unknown {
            config.velocity = profile.velocity_raw(self.velocity_percent);
            config.acceleration = profile.acceleration_raw(self.acceleration_percent);
            config.deceleration = config.acceleration;
        }
        config.soft_limits_active = self.soft_limits_active;
        config.soft_lower_limit = self.soft_lower_limit;
        config.soft_upper_limit = self.soft_upper_limit;
        config.mounting_right_top = self.mounting_right_top;
        config.homeable = self.homeable;
        config
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_lower_limit > self.soft_upper_limit {
            return Err(ConfigError::ValidationError(format!(
                "axis {}: soft_lower_limit {} > soft_upper_limit {}",
                self.tag, self.soft_lower_limit, self.soft_upper_limit
            )));
        }
        for (name, value) in [
            ("velocity_percent", self.velocity_percent),
            ("acceleration_percent", self.acceleration_percent),
        ] {
            if !(1..=100).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "axis {}: {name} {value} outside 1..=100",
                    self.tag
                )));
            }
        }
        Ok(())
    }
}

/// Top-level daemon configuration (`weld_axis.toml`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub controller: CycleSettings,
    #[serde(default)]
    pub axes: Vec<AxisEntry>,
}

impl ControllerConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `cycle_time_us` is zero
    /// - two axes share a tag
    /// - an axis has inverted soft limits or a percentage outside 1..=100
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.cycle_time_us == 0 {
            return Err(ConfigError::ValidationError(
                "cycle_time_us must be > 0".to_string(),
            ));
        }
        let mut seen = Vec::with_capacity(self.axes.len());
        for axis in &self.axes {
            if seen.contains(&axis.tag) {
                return Err(ConfigError::ValidationError(format!(
                    "axis {} configured twice",
                    axis.tag
                )));
            }
            seen.push(axis.tag);
            axis.validate()?;
        }
        Ok(())
    }
}

// ─── Persistence ────────────────────────────────────────────────────

/// Value of a persisted setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i32),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

/// A setting change that the caller should persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub key: String,
    pub value: ConfigValue,
}

impl ConfigChange {
    pub fn int(key: String, value: i32) -> Self {
        Self {
            key,
            value: ConfigValue::Int(value),
        }
    }

    pub fn bool(key: String, value: bool) -> Self {
        Self {
            key,
            value: ConfigValue::Bool(value),
        }
    }
}

/// External key/value store for persisted axis settings.
pub trait ConfigStore: Send + Sync {
    fn store(&self, change: &ConfigChange);

    /// Store `change` if there is one.
    fn persist(&self, change: Option<ConfigChange>) {
        if let Some(change) = change {
            self.store(&change);
        }
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<BTreeMap<String, ConfigValue>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.values.lock().get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }

    /// Serialize all stored values as JSON.
    pub fn to_json(&self) -> String {
        match serde_json::to_string(&*self.values.lock()) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize config store: {e}");
                String::from("{}")
            }
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn store(&self, change: &ConfigChange) {
        debug!(key = %change.key, value = %change.value, "persist setting");
        self.values.lock().insert(change.key.clone(), change.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld_common::config::ConfigLoader;
    use weld_common::drive::family::{PRODUCT_EPOS4, VENDOR_MAXON};

    const TOML: &str = r#"
[controller]
startup_delay_ms = 0
debug_info = true

[[axes]]
tag = "X"
vendor_id = 0xFB
product_code = 0x63500000
soft_limits_active = true
soft_lower_limit = -1000
soft_upper_limit = 1000
velocity_percent = 50

[[axes]]
tag = "Z"
vendor_id = 0xAB
product_code = 0x380
homing_direction_positive = false
"#;

    #[test]
    fn parse_and_validate() {
        let cfg = ControllerConfig::from_toml(TOML).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.controller.cycle_time_us, 1000);
        assert!(cfg.controller.debug_info);
        assert_eq!(cfg.axes.len(), 2);

        let x = &cfg.axes[0];
        assert_eq!(x.address(), DeviceAddress::new(VENDOR_MAXON, PRODUCT_EPOS4, 0));
        let axis = x.axis_config();
        assert_eq!(axis.velocity, 52 * 50 + 200);
        assert_eq!(axis.soft_limits(), (-1000, 1000));

        let z = cfg.axes[1].axis_config();
        assert_eq!(z.homing_method, 17);
        assert_eq!(z.velocity, 1_700_000);
    }

    #[test]
    fn duplicate_tag_rejected() {
        let mut cfg = ControllerConfig::from_toml(TOML).unwrap();
        let dup = cfg.axes[0].clone();
        cfg.axes.push(dup);
        assert!(matches!(cfg.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn zero_cycle_time_rejected() {
        let mut cfg = ControllerConfig::default();
        cfg.controller.cycle_time_us = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn percent_out_of_range_rejected() {
        let mut cfg = ControllerConfig::from_toml(TOML).unwrap();
        cfg.axes[0].acceleration_percent = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn memory_store_persists_changes() {
        let store = MemoryConfigStore::new();
        store.persist(None);
        assert!(store.is_empty());
        store.persist(Some(ConfigChange::int("X_Axis_Velocity".into(), 80)));
        store.persist(Some(ConfigChange::bool("AxisX_SoftLimitsActive".into(), true)));
        assert_eq!(store.get("X_Axis_Velocity"), Some(ConfigValue::Int(80)));
        assert_eq!(store.len(), 2);
        assert!(store.to_json().contains("\"AxisX_SoftLimitsActive\":true"));
    }
}
