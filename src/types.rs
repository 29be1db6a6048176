use serde::{Deserialize, Serialize};
use std::fmt;

/// HEOS player identifier
pub type PlayerId = i64;

/// webOS pairing token (`client-key`)
pub type ClientKey = String;

/// Default step for relative volume changes
pub const DEFAULT_VOLUME_STEP: u8 = 5;

/// Highest absolute volume level accepted by both devices
pub const MAX_VOLUME: u8 = 100;

/// Largest relative volume step accepted by the receiver
pub const MAX_VOLUME_STEP: u8 = 10;

/// HEOS player as reported by `player/get_players`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub pid: PlayerId,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub ip: Option<String>,

    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub serial: Option<String>,
}

/// Physical input on a HEOS receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    AnalogIn1,
    AnalogIn2,
    UsbDac,
    OpticalIn1,
    OpticalIn2,
    CoaxIn1,
    CoaxIn2,
}

impl InputSource {
    /// Input name as used by `browse/play_input`
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnalogIn1 => "inputs/analog_in_1",
            Self::AnalogIn2 => "inputs/analog_in_2",
            Self::UsbDac => "inputs/usbdac",
            Self::OpticalIn1 => "inputs/optical_in_1",
            Self::OpticalIn2 => "inputs/optical_in_2",
            Self::CoaxIn1 => "inputs/coax_in_1",
            Self::CoaxIn2 => "inputs/coax_in_2",
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TV input selectable through `ssap://tv/switchInput`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputId {
    Hdmi1,
    Hdmi2,
    Hdmi3,
    Hdmi4,
}

impl InputId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hdmi1 => "HDMI_1",
            Self::Hdmi2 => "HDMI_2",
            Self::Hdmi3 => "HDMI_3",
            Self::Hdmi4 => "HDMI_4",
        }
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
