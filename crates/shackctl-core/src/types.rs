//! Core types used throughout shackctl.
//!
//! These types provide a backend-agnostic vocabulary for rigs, rotators,
//! and CW keyers, plus the serial-line settings carried by device profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// VFO selector.
///
/// `Current` addresses whichever VFO the rig reports as active; the other
/// two address a specific VFO regardless of which one is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Vfo {
    #[default]
    Current,
    A,
    B,
}

impl fmt::Display for Vfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Vfo::Current => "current",
            Vfo::A => "VFO-A",
            Vfo::B => "VFO-B",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Vfo {
    type Err = ParseVfoError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" | "VFOA" | "VFO-A" => Ok(Vfo::A),
            "B" | "VFOB" | "VFO-B" => Ok(Vfo::B),
            "CURRENT" | "CURR" => Ok(Vfo::Current),
            _ => Err(ParseVfoError(s.to_string())),
        }
    }
}

/// Error returned when a string cannot be parsed into a [`Vfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVfoError(String);

impl fmt::Display for ParseVfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown VFO: {}", self.0)
    }
}

impl std::error::Error for ParseVfoError {}

/// Operating mode of the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Upper sideband voice.
    USB,
    /// Lower sideband voice.
    LSB,
    /// CW (morse), typically with upper sideband offset.
    CW,
    /// CW reverse (lower sideband offset).
    CWR,
    /// Amplitude modulation.
    AM,
    /// Frequency modulation.
    FM,
    /// Radio teletype (FSK), upper sideband.
    RTTY,
    /// Radio teletype (FSK), reverse / lower sideband.
    RTTYR,
    /// Data mode using upper sideband (AFSK, sound-card digital).
    DataUSB,
    /// Data mode using lower sideband.
    DataLSB,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::USB => "USB",
            Mode::LSB => "LSB",
            Mode::CW => "CW",
            Mode::CWR => "CWR",
            Mode::AM => "AM",
            Mode::FM => "FM",
            Mode::RTTY => "RTTY",
            Mode::RTTYR => "RTTYR",
            Mode::DataUSB => "DATA-USB",
            Mode::DataLSB => "DATA-LSB",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`Mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown mode: {}", self.0)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USB" => Ok(Mode::USB),
            "LSB" => Ok(Mode::LSB),
            "CW" => Ok(Mode::CW),
            "CWR" => Ok(Mode::CWR),
            "AM" => Ok(Mode::AM),
            "FM" => Ok(Mode::FM),
            "RTTY" => Ok(Mode::RTTY),
            "RTTYR" => Ok(Mode::RTTYR),
            "DATA-USB" | "DATAUSB" | "DIG_U" => Ok(Mode::DataUSB),
            "DATA-LSB" | "DATALSB" | "DIG_L" => Ok(Mode::DataLSB),
            _ => Err(ParseModeError(s.to_string())),
        }
    }
}

/// Which family of device a profile describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Rig,
    Rotator,
    Keyer,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceKind::Rig => "rig",
            DeviceKind::Rotator => "rotator",
            DeviceKind::Keyer => "keyer",
        };
        write!(f, "{s}")
    }
}

/// Backend family selected by a profile.
///
/// The set is closed: the façade's driver factory matches on it to build
/// exactly one driver per open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// CAT over a serial line (Kenwood- or Yaesu-style dialect).
    GenericCat,
    /// Automation bridge, first generation (two rig slots).
    VendorBridgeV1,
    /// Automation bridge, second generation (four rig slots).
    VendorBridgeV2,
    /// `cmd:args;` transceiver protocol over a persistent TCP session.
    NetworkText,
    /// Serial hardware keyer (WinKey command set).
    KeyerHardware,
    /// UDP keyer daemon (cwdaemon command set).
    KeyerDaemon,
    /// Digital-modes companion application over XML-RPC (fldigi).
    DigitalModesRpc,
    /// Keyer that sends Morse through the rig's own CAT keyer.
    MorseOverCat,
    /// UDP rotator controller.
    RotatorUdp,
    /// Keyer that accepts everything and keys nothing.
    DummyKeyer,
}

impl BackendKind {
    /// The device family this backend drives.
    pub fn device_kind(&self) -> DeviceKind {
        match self {
            BackendKind::GenericCat
            | BackendKind::VendorBridgeV1
            | BackendKind::VendorBridgeV2
            | BackendKind::NetworkText => DeviceKind::Rig,
            BackendKind::KeyerHardware
            | BackendKind::KeyerDaemon
            | BackendKind::DigitalModesRpc
            | BackendKind::MorseOverCat
            | BackendKind::DummyKeyer => DeviceKind::Keyer,
            BackendKind::RotatorUdp => DeviceKind::Rotator,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::GenericCat => "generic CAT",
            BackendKind::VendorBridgeV1 => "vendor bridge v1",
            BackendKind::VendorBridgeV2 => "vendor bridge v2",
            BackendKind::NetworkText => "network text protocol",
            BackendKind::KeyerHardware => "hardware keyer",
            BackendKind::KeyerDaemon => "keyer daemon",
            BackendKind::DigitalModesRpc => "digital modes RPC",
            BackendKind::MorseOverCat => "morse over CAT",
            BackendKind::RotatorUdp => "UDP rotator",
            BackendKind::DummyKeyer => "dummy keyer",
        };
        write!(f, "{s}")
    }
}

/// How PTT is signalled to the rig.
///
/// Independent from frequency/mode control: a rig may take CAT for tuning
/// and a serial control line for PTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PttType {
    /// PTT is not controlled.
    None,
    /// PTT via a CAT command.
    #[default]
    Cat,
    /// PTT via the serial DTR line.
    Dtr,
    /// PTT via the serial RTS line.
    Rts,
}

/// How the PTT line is shared with other programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PttShare {
    /// The line is owned exclusively.
    #[default]
    None,
    /// Another device drives the same line electrically; never force it low.
    Hardware,
    /// Release the line after every PTT-off so other programs can claim it.
    Software,
}

/// Paddle keying mode of a keyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyerMode {
    SinglePaddle,
    IambicA,
    #[default]
    IambicB,
    Ultimate,
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            n => Err(format!("data bits must be 5-8, got {n}")),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Number of stop bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            n => Err(format!("stop bits must be 1 or 2, got {n}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    None,
    Hardware,
    Software,
}

/// Lowest baud rate accepted in a profile.
pub const MIN_BAUD: u32 = 1200;
/// Highest baud rate accepted in a profile.
pub const MAX_BAUD: u32 = 115_200;

/// Serial line settings.
///
/// Defaults are appropriate for most modern transceivers: 9600 baud,
/// 8 data bits, 1 stop bit, no parity, no flow control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialSettings {
    /// Check the settings against the accepted ranges.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(MIN_BAUD..=MAX_BAUD).contains(&self.baud_rate) {
            return Err(format!(
                "baud rate {} outside {MIN_BAUD}-{MAX_BAUD}",
                self.baud_rate
            ));
        }
        Ok(())
    }
}

/// Frequency range the operator is allowed to transmit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRange {
    /// Lower edge in hertz (inclusive).
    pub low_hz: u64,
    /// Upper edge in hertz (inclusive).
    pub high_hz: u64,
}

impl TxRange {
    /// Create a new TX range.
    pub fn new(low_hz: u64, high_hz: u64) -> Self {
        TxRange { low_hz, high_hz }
    }

    /// Check whether `freq_hz` falls within this range (inclusive).
    pub fn contains(&self, freq_hz: u64) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }
}

impl fmt::Display for TxRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{} Hz", self.low_hz, self.high_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vfo_from_str() {
        assert_eq!("a".parse::<Vfo>().unwrap(), Vfo::A);
        assert_eq!("VFO-B".parse::<Vfo>().unwrap(), Vfo::B);
        assert_eq!("current".parse::<Vfo>().unwrap(), Vfo::Current);
        assert!("C".parse::<Vfo>().is_err());
    }

    #[test]
    fn mode_display_round_trip() {
        let modes = [
            Mode::USB,
            Mode::LSB,
            Mode::CW,
            Mode::CWR,
            Mode::AM,
            Mode::FM,
            Mode::RTTY,
            Mode::RTTYR,
            Mode::DataUSB,
            Mode::DataLSB,
        ];
        for mode in modes {
            let parsed: Mode = mode.to_string().parse().unwrap();
            assert_eq!(parsed, mode);
        }
    }

    #[test]
    fn mode_from_bridge_names() {
        assert_eq!("DIG_U".parse::<Mode>().unwrap(), Mode::DataUSB);
        assert_eq!("dig_l".parse::<Mode>().unwrap(), Mode::DataLSB);
        assert!("PKT".parse::<Mode>().is_err());
    }

    #[test]
    fn backend_device_kinds() {
        assert_eq!(BackendKind::GenericCat.device_kind(), DeviceKind::Rig);
        assert_eq!(BackendKind::VendorBridgeV2.device_kind(), DeviceKind::Rig);
        assert_eq!(BackendKind::KeyerDaemon.device_kind(), DeviceKind::Keyer);
        assert_eq!(BackendKind::MorseOverCat.device_kind(), DeviceKind::Keyer);
        assert_eq!(BackendKind::RotatorUdp.device_kind(), DeviceKind::Rotator);
    }

    #[test]
    fn data_bits_range() {
        assert_eq!(DataBits::try_from(5).unwrap(), DataBits::Five);
        assert!(DataBits::try_from(4).is_err());
        assert!(DataBits::try_from(9).is_err());
        assert_eq!(u8::from(DataBits::Seven), 7);
    }

    #[test]
    fn stop_bits_range() {
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(0).is_err());
    }

    #[test]
    fn serial_settings_validate_baud() {
        let mut s = SerialSettings::default();
        assert!(s.validate().is_ok());
        s.baud_rate = 600;
        assert!(s.validate().is_err());
        s.baud_rate = 115_200;
        assert!(s.validate().is_ok());
        s.baud_rate = 230_400;
        assert!(s.validate().is_err());
    }

    #[test]
    fn tx_range_contains() {
        let r = TxRange::new(14_000_000, 14_350_000);
        assert!(r.contains(14_000_000));
        assert!(r.contains(14_350_000));
        assert!(!r.contains(13_999_999));
        assert_eq!(r.to_string(), "14000000-14350000 Hz");
    }
}
