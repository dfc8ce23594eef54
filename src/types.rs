// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use bitflags::bitflags;
use std::{convert::TryFrom, fmt, io, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("ADI instance 0 is reserved")]
    ReservedInstance,
    #[error("ADI {0} is not defined")]
    UnknownAdi(u16),
    #[error("ADI '{0}' is not defined")]
    UnknownAdiName(String),
    #[error("ADI {0} is defined more than once")]
    DuplicateAdi(u16),
    #[error("ADI {adi}: {reason}")]
    InvalidAdi { adi: u16, reason: String },
    #[error("ADI {adi} has data type {actual}, which cannot hold a {requested}")]
    TypeMismatch {
        adi: u16,
        actual: DataType,
        requested: &'static str,
    },
    #[error("Value {value} for ADI {adi} is outside [{min}, {max}]")]
    OutOfRange {
        adi: u16,
        value: String,
        min: String,
        max: String,
    },
    #[error("ADI {adi}: elements {start}..{end} exceed the {count} available")]
    ElementRange {
        adi: u16,
        start: u8,
        end: usize,
        count: u8,
    },
    #[error("ADI {adi} is not mappable as {direction} process data")]
    NotMappable { adi: u16, direction: PdDirection },
    #[error("ADI {adi}: element {index} is mapped more than once as {direction} process data")]
    OverlappingMap {
        adi: u16,
        index: u8,
        direction: PdDirection,
    },
    #[error("Unknown data type '{0}'")]
    UnknownDataType(String),
    #[error("Invalid data type code {0}")]
    InvalidDataType(u8),
    #[error("Process data image too short: need {need} bytes, got {got}")]
    ImageSize { need: usize, got: usize },
    #[error("No {0} assembly with index {1}")]
    UnknownAssembly(PdDirection, usize),
    #[error("Assembly '{name}' maps ADI {adi} in the wrong direction")]
    AssemblyDirection { name: String, adi: u16 },
    #[error("EtherNet/IP: {given} {direction} instance numbers for {expected} assemblies")]
    InstanceCount {
        direction: PdDirection,
        given: usize,
        expected: usize,
    },
    #[error("Cannot remap process data while the network is process active")]
    RemapWhileActive,
    #[error("Invalid ANB state 0x{0:X}")]
    InvalidAnbState(u8),
    #[error("Network driver disconnected")]
    Disconnected,
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An ADI instance number.
pub type AdiInstance = u16;

/// The network ("Anybus") state reported by the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnbState {
    Setup,
    NwInit,
    WaitProcess,
    Idle,
    ProcessActive,
    Error,
    Exception,
}

impl AnbState {
    pub const fn code(self) -> u8 {
        match self {
            AnbState::Setup => 0,
            AnbState::NwInit => 1,
            AnbState::WaitProcess => 2,
            AnbState::Idle => 3,
            AnbState::ProcessActive => 4,
            AnbState::Error => 5,
            AnbState::Exception => 7,
        }
    }

    /// Whether live process data is being exchanged with a controller.
    pub fn is_process_active(self) -> bool {
        self == AnbState::ProcessActive
    }
}

impl Default for AnbState {
    fn default() -> Self {
        AnbState::Setup
    }
}

impl TryFrom<u8> for AnbState {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => AnbState::Setup,
            1 => AnbState::NwInit,
            2 => AnbState::WaitProcess,
            3 => AnbState::Idle,
            4 => AnbState::ProcessActive,
            5 => AnbState::Error,
            7 => AnbState::Exception,
            x => return Err(Error::InvalidAnbState(x)),
        })
    }
}

/// Data types of ADIs and structure fields.
///
/// `Pad(n)` and `Bit(n)` are bit-packed in process data; `Pad(0..=16)` and
/// `Bit(1..=7)` are the valid widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Sint8,
    Sint16,
    Sint32,
    Uint8,
    Uint16,
    Uint32,
    Char,
    Enum,
    Bits8,
    Bits16,
    Bits32,
    Octet,
    Sint64,
    Uint64,
    Float,
    Pad(u8),
    Bool1,
    Bit(u8),
}

impl DataType {
    pub fn code(self) -> u8 {
        match self {
            DataType::Bool => 0,
            DataType::Sint8 => 1,
            DataType::Sint16 => 2,
            DataType::Sint32 => 3,
            DataType::Uint8 => 4,
            DataType::Uint16 => 5,
            DataType::Uint32 => 6,
            DataType::Char => 7,
            DataType::Enum => 8,
            DataType::Bits8 => 9,
            DataType::Bits16 => 10,
            DataType::Bits32 => 11,
            DataType::Octet => 12,
            DataType::Sint64 => 16,
            DataType::Uint64 => 17,
            DataType::Float => 18,
            DataType::Pad(n) => 32u8.wrapping_add(n),
            DataType::Bool1 => 64,
            DataType::Bit(n) => 64u8.wrapping_add(n),
        }
    }

    /// Whether a `Pad` or `Bit` width is one the interface knows. Other
    /// types are always valid.
    pub fn is_valid(self) -> bool {
        match self {
            DataType::Pad(n) => n <= 16,
            DataType::Bit(n) => (1..=7).contains(&n),
            _ => true,
        }
    }

    /// Number of bits one element occupies in a process data image.
    pub fn bit_size(self) -> usize {
        match self {
            DataType::Pad(n) | DataType::Bit(n) => n as usize,
            DataType::Bool1 => 1,
            other => 8 * other.storage_size(),
        }
    }

    /// Number of bytes one element occupies in the application's storage.
    /// Bit types are kept unpacked, one byte per element.
    pub fn storage_size(self) -> usize {
        match self {
            DataType::Bool
            | DataType::Sint8
            | DataType::Uint8
            | DataType::Char
            | DataType::Enum
            | DataType::Bits8
            | DataType::Octet
            | DataType::Bool1
            | DataType::Bit(_) => 1,
            DataType::Sint16 | DataType::Uint16 | DataType::Bits16 => 2,
            DataType::Sint32 | DataType::Uint32 | DataType::Bits32 | DataType::Float => 4,
            DataType::Sint64 | DataType::Uint64 => 8,
            DataType::Pad(_) => 0,
        }
    }

    /// Bit-packed types are laid out back to back in process data, all
    /// others start on a byte boundary.
    pub fn is_bit_packed(self) -> bool {
        matches!(self, DataType::Pad(_) | DataType::Bool1 | DataType::Bit(_))
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            DataType::Sint8 | DataType::Sint16 | DataType::Sint32 | DataType::Sint64
        )
    }

    /// Types that carry min/max/default properties.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::Sint8
                | DataType::Sint16
                | DataType::Sint32
                | DataType::Sint64
                | DataType::Uint8
                | DataType::Uint16
                | DataType::Uint32
                | DataType::Uint64
                | DataType::Float
                | DataType::Enum
        )
    }
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(code: u8) -> Result<Self> {
        Ok(match code {
            0 => DataType::Bool,
            1 => DataType::Sint8,
            2 => DataType::Sint16,
            3 => DataType::Sint32,
            4 => DataType::Uint8,
            5 => DataType::Uint16,
            6 => DataType::Uint32,
            7 => DataType::Char,
            8 => DataType::Enum,
            9 => DataType::Bits8,
            10 => DataType::Bits16,
            11 => DataType::Bits32,
            12 => DataType::Octet,
            16 => DataType::Sint64,
            17 => DataType::Uint64,
            18 => DataType::Float,
            32..=48 => DataType::Pad(code - 32),
            64 => DataType::Bool1,
            65..=71 => DataType::Bit(code - 64),
            x => return Err(Error::InvalidDataType(x)),
        })
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let width = |prefix: &str, max: u8| {
            s.strip_prefix(prefix)
                .and_then(|n| n.parse::<u8>().ok())
                .filter(|&n| n <= max)
        };
        Ok(match s {
            "BOOL" => DataType::Bool,
            "SINT8" => DataType::Sint8,
            "SINT16" => DataType::Sint16,
            "SINT32" => DataType::Sint32,
            "UINT8" => DataType::Uint8,
            "UINT16" => DataType::Uint16,
            "UINT32" => DataType::Uint32,
            "CHAR" => DataType::Char,
            "ENUM" => DataType::Enum,
            "BITS8" => DataType::Bits8,
            "BITS16" => DataType::Bits16,
            "BITS32" => DataType::Bits32,
            "OCTET" => DataType::Octet,
            "SINT64" => DataType::Sint64,
            "UINT64" => DataType::Uint64,
            "FLOAT" => DataType::Float,
            "BOOL1" => DataType::Bool1,
            _ => {
                if let Some(n) = width("PAD", 16) {
                    DataType::Pad(n)
                } else if let Some(n) = width("BIT", 7).filter(|&n| n >= 1) {
                    DataType::Bit(n)
                } else {
                    return Err(Error::UnknownDataType(s.into()));
                }
            }
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataType::Pad(n) => write!(f, "PAD{}", n),
            DataType::Bit(n) => write!(f, "BIT{}", n),
            other => {
                let name = match other {
                    DataType::Bool => "BOOL",
                    DataType::Sint8 => "SINT8",
                    DataType::Sint16 => "SINT16",
                    DataType::Sint32 => "SINT32",
                    DataType::Uint8 => "UINT8",
                    DataType::Uint16 => "UINT16",
                    DataType::Uint32 => "UINT32",
                    DataType::Char => "CHAR",
                    DataType::Enum => "ENUM",
                    DataType::Bits8 => "BITS8",
                    DataType::Bits16 => "BITS16",
                    DataType::Bits32 => "BITS32",
                    DataType::Octet => "OCTET",
                    DataType::Sint64 => "SINT64",
                    DataType::Uint64 => "UINT64",
                    DataType::Float => "FLOAT",
                    _ => "BOOL1",
                };
                f.write_str(name)
            }
        }
    }
}

bitflags! {
    /// ADI access descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AdiDesc: u8 {
        const GET      = 0x01;
        const SET      = 0x02;
        const NVS      = 0x04;
        /// Mappable as write process data (device to network).
        const WRITE_PD = 0x08;
        /// Mappable as read process data (network to device).
        const READ_PD  = 0x10;
    }
}

impl AdiDesc {
    /// Readable, mappable as write process data (`AD_ADI_DESC___W_G`).
    pub const PD_OUT: Self = Self::from_bits_truncate(0x01 | 0x08);
    /// Readable, writable, mappable as read process data (`AD_ADI_DESC__R_SG`).
    pub const PD_IN: Self = Self::from_bits_truncate(0x01 | 0x02 | 0x10);

    pub fn allows(self, direction: PdDirection) -> bool {
        match direction {
            PdDirection::Write => self.contains(AdiDesc::WRITE_PD),
            PdDirection::Read => self.contains(AdiDesc::READ_PD),
        }
    }
}

impl Default for AdiDesc {
    fn default() -> Self {
        AdiDesc::GET
    }
}

/// Direction of process data, seen from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdDirection {
    /// Produced by the device, sent to the network.
    Write,
    /// Consumed by the device, received from the network.
    Read,
}

impl fmt::Display for PdDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            PdDirection::Write => "write",
            PdDirection::Read => "read",
        })
    }
}

#[test]
fn test_data_type_codes() {
    for code in (0..=18).chain(32..=48).chain(64..=71) {
        if let Ok(dt) = DataType::try_from(code) {
            assert_eq!(dt.code(), code);
            assert_eq!(dt.to_string().parse::<DataType>().unwrap(), dt);
        }
    }
    assert!(DataType::try_from(13).is_err());
    assert!(DataType::try_from(72).is_err());
    assert_eq!(DataType::try_from(5).unwrap(), DataType::Uint16);
    assert_eq!(DataType::try_from(67).unwrap(), DataType::Bit(3));
}

#[test]
fn test_data_type_names() {
    assert_eq!("UINT16".parse::<DataType>().unwrap(), DataType::Uint16);
    assert_eq!("PAD0".parse::<DataType>().unwrap(), DataType::Pad(0));
    assert_eq!("BIT7".parse::<DataType>().unwrap(), DataType::Bit(7));
    assert!("BIT0".parse::<DataType>().is_err());
    assert!("BIT8".parse::<DataType>().is_err());
    assert!("PAD17".parse::<DataType>().is_err());
    assert!("uint16".parse::<DataType>().is_err());
}

#[test]
fn test_data_type_sizes() {
    assert_eq!(DataType::Uint16.bit_size(), 16);
    assert_eq!(DataType::Float.bit_size(), 32);
    assert_eq!(DataType::Bit(3).bit_size(), 3);
    assert_eq!(DataType::Bit(3).storage_size(), 1);
    assert_eq!(DataType::Pad(4).storage_size(), 0);
    assert!(DataType::Bool1.is_bit_packed());
    assert!(!DataType::Bool.is_bit_packed());
}

#[test]
fn test_data_type_widths() {
    assert!(DataType::Pad(16).is_valid());
    assert!(!DataType::Pad(17).is_valid());
    assert!(!DataType::Bit(0).is_valid());
    assert!(!DataType::Bit(200).is_valid());
    // out of range widths still encode without overflowing
    assert_eq!(DataType::Bit(200).code(), 8);
    assert_eq!(DataType::Pad(255).code(), 31);
}

#[test]
fn test_anb_state() {
    assert_eq!(AnbState::try_from(4).unwrap(), AnbState::ProcessActive);
    assert!(AnbState::ProcessActive.is_process_active());
    assert!(!AnbState::Idle.is_process_active());
    assert!(matches!(AnbState::try_from(6), Err(Error::InvalidAnbState(6))));
    assert_eq!(AnbState::try_from(7).unwrap().code(), 7);
}

#[test]
fn test_descriptors() {
    assert_eq!(AdiDesc::PD_OUT.bits(), 0x09);
    assert_eq!(AdiDesc::PD_IN.bits(), 0x13);
    assert!(AdiDesc::PD_OUT.allows(PdDirection::Write));
    assert!(!AdiDesc::PD_OUT.allows(PdDirection::Read));
    assert!(AdiDesc::PD_IN.allows(PdDirection::Read));
}
