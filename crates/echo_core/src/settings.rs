//! Persistent Settings
//!
//! The controller reads its starting values through a [`SettingsPort`] and
//! writes every user change back. Values are plain JSON so any key-value
//! store can sit behind the port.
//!
//! # Storage Locations (`JsonFileSettings::default_path`)
//! - Linux: `~/.config/echoheart/settings.json`
//! - Windows: `%APPDATA%\echoheart\config\settings.json`
//! - macOS: `~/Library/Application Support/com.echoheart.echoheart/settings.json`

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use echo_dsp::{clamp_gain_db, clamp_master_gain, EqBand, NUM_EQ_BANDS};
use echo_platform::ListenMode;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};

pub const KEY_LOW_GAIN: &str = "low_gain_db";
pub const KEY_MID_GAIN: &str = "mid_gain_db";
pub const KEY_HIGH_GAIN: &str = "high_gain_db";
pub const KEY_MASTER_GAIN: &str = "master_gain";
pub const KEY_LISTEN_MODE: &str = "listen_mode";

/// Settings key holding a band's gain
pub fn band_key(band: EqBand) -> &'static str {
    match band {
        EqBand::Low => KEY_LOW_GAIN,
        EqBand::Mid => KEY_MID_GAIN,
        EqBand::High => KEY_HIGH_GAIN,
    }
}

/// Key-value persistence
pub trait SettingsPort: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> EngineResult<()>;

    /// Number stored under `key`, or `default` when missing or not a finite number
    fn get_f32(&self, key: &str, default: f32) -> f32 {
        self.get(key)
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    /// String stored under `key`, or `default`
    fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| default.to_owned())
    }
}

/// In-memory store, for tests and headless runs
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, Value>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let store = Self::new();
        store
            .values
            .lock()
            .extend(values.into_iter().map(|(k, v)| (k.to_string(), v)));
        store
    }
}

impl SettingsPort for MemorySettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> EngineResult<()> {
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every `set`
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileSettings {
    /// Open the store at `path`; a missing or corrupt file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = Self::read(&path).unwrap_or_default();
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// Open the store in the platform config directory
    pub fn open_default() -> EngineResult<Self> {
        let path = Self::default_path()
            .ok_or_else(|| EngineError::Settings("Could not determine config path".into()))?;
        Ok(Self::open(path))
    }

    /// Get the platform-specific settings file path
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "echoheart", "echoheart")
            .map(|proj| proj.config_dir().join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Option<Map<String, Value>> {
        if !path.exists() {
            debug!("No settings file at {:?}", path);
            return None;
        }
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) => {
                error!("Failed to open settings file: {}", e);
                return None;
            }
        };
        match serde_json::from_reader::<_, Value>(file) {
            Ok(Value::Object(map)) => {
                info!("Settings loaded from {:?}", path);
                Some(map)
            }
            Ok(_) => {
                warn!("Settings file {:?} is not a JSON object, ignoring", path);
                None
            }
            Err(e) => {
                error!("Failed to parse settings file: {}", e);
                None
            }
        }
    }

    fn write(&self, values: &Map<String, Value>) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::Settings(e.to_string()))?;
        }
        let file = fs::File::create(&self.path).map_err(|e| EngineError::Settings(e.to_string()))?;
        serde_json::to_writer_pretty(file, values).map_err(|e| EngineError::Settings(e.to_string()))?;
        debug!("Settings saved to {:?}", self.path);
        Ok(())
    }
}

impl SettingsPort for JsonFileSettings {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> EngineResult<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.write(&values)
    }
}

/// Typed snapshot of the persisted user values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoSettings {
    pub eq_gains_db: [f32; NUM_EQ_BANDS],
    pub master_gain: f32,
    pub listen_mode: ListenMode,
}

impl Default for EchoSettings {
    fn default() -> Self {
        Self {
            eq_gains_db: [0.0; NUM_EQ_BANDS],
            master_gain: 1.0,
            listen_mode: ListenMode::Ambient,
        }
    }
}

impl EchoSettings {
    /// Read every key, falling back to defaults and clamping to valid ranges
    pub fn load(port: &dyn SettingsPort) -> Self {
        let defaults = Self::default();
        let eq_gains_db = core::array::from_fn(|i| {
            clamp_gain_db(port.get_f32(band_key(EqBand::ALL[i]), defaults.eq_gains_db[i]))
        });
        let master_gain = clamp_master_gain(port.get_f32(KEY_MASTER_GAIN, defaults.master_gain));
        let listen_mode = port
            .get_str(KEY_LISTEN_MODE, defaults.listen_mode.as_str())
            .parse()
            .unwrap_or_else(|e| {
                warn!("Ignoring stored listen mode: {}", e);
                defaults.listen_mode
            });

        Self {
            eq_gains_db,
            master_gain,
            listen_mode,
        }
    }

    /// Write every value through the port
    pub fn save(&self, port: &dyn SettingsPort) -> EngineResult<()> {
        for band in EqBand::ALL {
            port.set(band_key(band), Value::from(self.eq_gains_db[band.index()]))?;
        }
        port.set(KEY_MASTER_GAIN, Value::from(self.master_gain))?;
        port.set(KEY_LISTEN_MODE, Value::from(self.listen_mode.as_str()))?;
        Ok(())
    }
}
