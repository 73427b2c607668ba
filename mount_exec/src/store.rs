//! # Non-volatile store
//!
//! Persistent settings (calibrated clock interval, PEC table, park position,
//! backlash, guide rates) are kept in a key/value store. Values are stored as
//! JSON so that the same records can be written to flash on a board or to a
//! file on a host.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const KEY_SIDEREAL_INTERVAL: &str = "sidereal_interval";
pub const KEY_PEC_TABLE: &str = "pec_table";
pub const KEY_PEC_RECORDED: &str = "pec_recorded";
pub const KEY_PARK_POSITION: &str = "park_position";
pub const KEY_PARK_STATUS: &str = "park_status";
pub const KEY_BACKLASH_AXIS1: &str = "backlash_axis1";
pub const KEY_BACKLASH_AXIS2: &str = "backlash_axis2";
pub const KEY_GUIDE_RATE: &str = "guide_rate";
pub const KEY_PULSE_GUIDE_RATE: &str = "pulse_guide_rate";

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Key/value storage which survives a power cycle.
pub trait NvStore {
    fn read_value(&self, key: &str) -> Option<Value>;

    fn write_value(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Volatile store, used by the simulator and in tests.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    values: HashMap<String, Value>,
}

/// Store backed by a single pretty-printed JSON file, rewritten on every
/// write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: HashMap<String, Value>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Could not access the store file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not (de)serialise the value for key \"{0}\": {1}")]
    Serde(String, serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read a typed value from the store.
///
/// A key holding a value which no longer deserialises into `T` (for example
/// after a format change) is reported as an error rather than silently
/// treated as absent.
pub fn load<T: DeserializeOwned>(store: &dyn NvStore, key: &str) -> Result<Option<T>, StoreError> {
    match store.read_value(key) {
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| StoreError::Serde(key.into(), e)),
        None => Ok(None),
    }
}

/// Read a typed value, falling back to `default` if it is absent or invalid.
pub fn load_or<T: DeserializeOwned>(store: &dyn NvStore, key: &str, default: T) -> T {
    match load(store, key) {
        Ok(Some(v)) => v,
        Ok(None) => default,
        Err(e) => {
            warn!("Ignoring stored value: {}", e);
            default
        }
    }
}

/// Write a typed value to the store.
pub fn save<T: Serialize>(store: &mut dyn NvStore, key: &str, value: &T) -> Result<(), StoreError> {
    let v = serde_json::to_value(value).map_err(|e| StoreError::Serde(key.into(), e))?;
    store.write_value(key, v)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl NvStore for MemStore {
    fn read_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn write_value(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.into(), value);
        Ok(())
    }
}

impl JsonFileStore {
    /// Open the store at `path`. A missing file is an empty store and will be
    /// created on the first write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let values = if path.exists() {
            let s = std::fs::read_to_string(&path)?;
            serde_json::from_str(&s).map_err(|e| StoreError::Serde("<file>".into(), e))?
        } else {
            HashMap::new()
        };

        Ok(Self { path, values })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let s = serde_json::to_string_pretty(&self.values)
            .map_err(|e| StoreError::Serde("<file>".into(), e))?;
        std::fs::write(&self.path, s)?;
        Ok(())
    }
}

impl NvStore for JsonFileStore {
    fn read_value(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn write_value(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        // Skip the file write if nothing changed, flash has limited endurance
        // and the file stands in for it.
        if self.values.get(key) == Some(&value) {
            return Ok(());
        }
        self.values.insert(key.into(), value);
        self.flush()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
