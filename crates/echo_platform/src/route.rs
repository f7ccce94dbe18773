//! Output Routes
//!
//! An [`AudioRoute`] is the set of outputs the session currently plays to.
//! Pass-through is only safe when one of them acoustically isolates the
//! listener from the microphone, otherwise the output feeds back into the
//! capture.

use serde::{Deserialize, Serialize};

/// Kind of output port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    Headphones,
    Headset,
    BluetoothA2dp,
    BluetoothLe,
    BluetoothHfp,
    BuiltInSpeaker,
    BuiltInReceiver,
    Hdmi,
    Usb,
    LineOut,
    Other,
}

impl PortType {
    /// Wired headphones or any Bluetooth audio profile
    pub fn is_headphone_class(self) -> bool {
        matches!(
            self,
            PortType::Headphones
                | PortType::Headset
                | PortType::BluetoothA2dp
                | PortType::BluetoothLe
                | PortType::BluetoothHfp
        )
    }
}

/// One output of the current route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePort {
    pub name: String,
    pub port_type: PortType,
}

impl RoutePort {
    pub fn new(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            port_type,
        }
    }

    /// Build a port from a device name, guessing its type
    pub fn from_device_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let port_type = classify_device_name(&name);
        Self { name, port_type }
    }
}

/// Current set of outputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioRoute {
    pub outputs: Vec<RoutePort>,
}

impl AudioRoute {
    pub fn new(outputs: Vec<RoutePort>) -> Self {
        Self { outputs }
    }

    /// A route with no outputs at all
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(name: impl Into<String>, port_type: PortType) -> Self {
        Self::new(vec![RoutePort::new(name, port_type)])
    }

    /// Whether any output is headphone-class
    pub fn has_headphones(&self) -> bool {
        self.outputs.iter().any(|p| p.port_type.is_headphone_class())
    }

    /// Name of the first output, for logging
    pub fn primary_name(&self) -> Option<&str> {
        self.outputs.first().map(|p| p.name.as_str())
    }
}

/// Guess a port type from an OS device name
///
/// Desktop hosts only expose a device name, so this matches the naming
/// conventions of ALSA/PipeWire (`bluez_output.*`, `*.a2dp-sink`,
/// `*.headset-head-unit`), CoreAudio and WASAPI friendly names.
pub fn classify_device_name(name: &str) -> PortType {
    let lower = name.to_ascii_lowercase();

    let bluetooth = lower.contains("bluez") || lower.contains("bluetooth");
    if bluetooth || lower.contains("airpods") {
        if lower.contains("head-unit") || lower.contains("hands-free") || lower.contains("hfp") {
            return PortType::BluetoothHfp;
        }
        if lower.contains("le audio") || lower.contains("bap") {
            return PortType::BluetoothLe;
        }
        return PortType::BluetoothA2dp;
    }

    if lower.contains("headset") {
        PortType::Headset
    } else if lower.contains("headphone") || lower.contains("earphone") {
        PortType::Headphones
    } else if lower.contains("hdmi") || lower.contains("displayport") {
        PortType::Hdmi
    } else if lower.contains("usb") {
        PortType::Usb
    } else if lower.contains("speaker") {
        PortType::BuiltInSpeaker
    } else if lower.contains("receiver") || lower.contains("earpiece") {
        PortType::BuiltInReceiver
    } else if lower.contains("line out") || lower.contains("lineout") {
        PortType::LineOut
    } else {
        PortType::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headphone_class() {
        assert!(PortType::Headphones.is_headphone_class());
        assert!(PortType::BluetoothHfp.is_headphone_class());
        assert!(PortType::BluetoothLe.is_headphone_class());
        assert!(!PortType::BuiltInSpeaker.is_headphone_class());
        assert!(!PortType::Hdmi.is_headphone_class());
        assert!(!PortType::Usb.is_headphone_class());
    }

    #[test]
    fn test_route_has_headphones() {
        assert!(!AudioRoute::empty().has_headphones());
        assert!(!AudioRoute::single("Speaker", PortType::BuiltInSpeaker).has_headphones());

        let mixed = AudioRoute::new(vec![
            RoutePort::new("HDMI", PortType::Hdmi),
            RoutePort::new("Buds", PortType::BluetoothA2dp),
        ]);
        assert!(mixed.has_headphones());
        assert_eq!(mixed.primary_name(), Some("HDMI"));
    }

    #[test]
    fn test_classify_pipewire_names() {
        assert_eq!(
            classify_device_name("bluez_output.AA_BB_CC_DD_EE_FF.a2dp-sink"),
            PortType::BluetoothA2dp
        );
        assert_eq!(
            classify_device_name("bluez_output.AA_BB_CC_DD_EE_FF.headset-head-unit"),
            PortType::BluetoothHfp
        );
        assert_eq!(
            classify_device_name("alsa_output.pci-0000_00_1f.3.hdmi-stereo"),
            PortType::Hdmi
        );
    }

    #[test]
    fn test_classify_friendly_names() {
        assert_eq!(classify_device_name("External Headphones"), PortType::Headphones);
        assert_eq!(classify_device_name("USB Headset"), PortType::Headset);
        assert_eq!(classify_device_name("MacBook Pro Speakers"), PortType::BuiltInSpeaker);
        assert_eq!(classify_device_name("AirPods Pro"), PortType::BluetoothA2dp);
        assert_eq!(classify_device_name("default"), PortType::Other);
    }

    #[test]
    fn test_port_from_device_name() {
        let port = RoutePort::from_device_name("Headphones");
        assert_eq!(port.name, "Headphones");
        assert_eq!(port.port_type, PortType::Headphones);
    }
}
