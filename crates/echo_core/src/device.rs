//! Audio Device Enumeration
//!
//! Used for `--list-devices` and for logging what the driver opened. Output
//! devices carry the port type guessed from their name, which is also what
//! the desktop session uses to decide whether headphones are present.

use cpal::traits::{DeviceTrait, HostTrait};
use echo_platform::{classify_device_name, PortType};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Type of audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Input,
    Output,
}

/// Input or output device as the host reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDevice {
    /// Human-readable device name (cpal has no separate id)
    pub name: String,

    pub device_type: DeviceType,

    /// Whether this is the system default device
    pub is_default: bool,

    /// Guessed port type
    pub port_type: PortType,

    /// Native format, when the device reports one
    pub default_sample_rate: Option<u32>,
    pub default_channels: Option<u16>,
}

impl AudioDevice {
    /// Whether playing through this device cannot feed back into the microphone
    pub fn is_headphone_class(&self) -> bool {
        self.device_type == DeviceType::Output && self.port_type.is_headphone_class()
    }

    /// Every input and output device of the default host
    pub fn enumerate_all() -> EngineResult<Vec<AudioDevice>> {
        let host = cpal::default_host();

        let default_input = host.default_input_device().and_then(|d| d.name().ok());
        let default_output = host.default_output_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();

        if let Ok(inputs) = host.input_devices() {
            devices.extend(
                inputs.filter_map(|d| Self::describe(&d, DeviceType::Input, default_input.as_deref())),
            );
        }
        if let Ok(outputs) = host.output_devices() {
            devices.extend(
                outputs.filter_map(|d| Self::describe(&d, DeviceType::Output, default_output.as_deref())),
            );
        }

        if devices.is_empty() {
            return Err(EngineError::NoDevicesFound);
        }
        Ok(devices)
    }

    /// Get the default input device (the microphone that will be captured)
    pub fn default_input() -> EngineResult<AudioDevice> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(EngineError::NoDevicesFound)?;
        let name = device
            .name()
            .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;
        Self::describe(&device, DeviceType::Input, Some(&name))
            .ok_or(EngineError::DeviceNotFound(name))
    }

    /// Get the default output device
    pub fn default_output() -> EngineResult<AudioDevice> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(EngineError::NoDevicesFound)?;
        let name = device
            .name()
            .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;
        Self::describe(&device, DeviceType::Output, Some(&name))
            .ok_or(EngineError::DeviceNotFound(name))
    }

    fn describe(
        device: &cpal::Device,
        device_type: DeviceType,
        default_name: Option<&str>,
    ) -> Option<Self> {
        let name = device.name().ok()?;

        let native = match device_type {
            DeviceType::Input => device.default_input_config().ok(),
            DeviceType::Output => device.default_output_config().ok(),
        };

        Some(AudioDevice {
            is_default: default_name == Some(name.as_str()),
            port_type: classify_device_name(&name),
            default_sample_rate: native.as_ref().map(|c| c.sample_rate().0),
            default_channels: native.as_ref().map(|c| c.channels()),
            device_type,
            name,
        })
    }
}
