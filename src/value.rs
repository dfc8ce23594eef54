// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Typed access to ADI values and the scalar type used for value properties.

use crate::types::DataType;
use byteorder::{ByteOrder, LittleEndian as LE};
use num_traits::ToPrimitive;
use std::{cmp::Ordering, fmt};

/// A numeric value of any ADI data type, used for min/max/default
/// properties and range checks.
#[derive(Debug, Clone, Copy)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    fn as_i128(self) -> Option<i128> {
        match self {
            Scalar::Int(v) => Some(v as i128),
            Scalar::UInt(v) => Some(v as i128),
            Scalar::Float(_) => None,
        }
    }

    /// The smallest value the data type can hold.
    pub fn type_min(data_type: DataType) -> Scalar {
        match data_type {
            DataType::Sint8 => Scalar::Int(i8::MIN as i64),
            DataType::Sint16 => Scalar::Int(i16::MIN as i64),
            DataType::Sint32 => Scalar::Int(i32::MIN as i64),
            DataType::Sint64 => Scalar::Int(i64::MIN),
            DataType::Float => Scalar::Float(f32::MIN as f64),
            _ => Scalar::UInt(0),
        }
    }

    /// The largest value the data type can hold.
    pub fn type_max(data_type: DataType) -> Scalar {
        match data_type {
            DataType::Sint8 => Scalar::Int(i8::MAX as i64),
            DataType::Sint16 => Scalar::Int(i16::MAX as i64),
            DataType::Sint32 => Scalar::Int(i32::MAX as i64),
            DataType::Sint64 => Scalar::Int(i64::MAX),
            DataType::Float => Scalar::Float(f32::MAX as f64),
            DataType::Uint16 | DataType::Bits16 => Scalar::UInt(u16::MAX as u64),
            DataType::Uint32 | DataType::Bits32 => Scalar::UInt(u32::MAX as u64),
            DataType::Uint64 => Scalar::UInt(u64::MAX),
            DataType::Bool | DataType::Bool1 => Scalar::UInt(1),
            DataType::Bit(n) => Scalar::UInt(1u64.checked_shl(n.into()).map_or(u64::MAX, |v| v - 1)),
            DataType::Pad(_) => Scalar::UInt(0),
            _ => Scalar::UInt(u8::MAX as u64),
        }
    }

    /// Whether the value is exactly representable in the data type.
    pub fn fits(self, data_type: DataType) -> bool {
        if let Scalar::Float(f) = self {
            if data_type == DataType::Float {
                return f.is_finite() && f.abs() <= f32::MAX as f64;
            }
            if f.fract() != 0.0 {
                return false;
            }
        } else if data_type == DataType::Float {
            return true;
        }
        self >= Scalar::type_min(data_type) && self <= Scalar::type_max(data_type)
    }

    /// Reads one element of the given type from application storage.
    pub fn read(data_type: DataType, buf: &[u8]) -> Scalar {
        match data_type {
            DataType::Sint8 => Scalar::Int(buf[0] as i8 as i64),
            DataType::Sint16 => Scalar::Int(LE::read_i16(buf) as i64),
            DataType::Sint32 => Scalar::Int(LE::read_i32(buf) as i64),
            DataType::Sint64 => Scalar::Int(LE::read_i64(buf)),
            DataType::Uint16 | DataType::Bits16 => Scalar::UInt(LE::read_u16(buf) as u64),
            DataType::Uint32 | DataType::Bits32 => Scalar::UInt(LE::read_u32(buf) as u64),
            DataType::Uint64 => Scalar::UInt(LE::read_u64(buf)),
            DataType::Float => Scalar::Float(LE::read_f32(buf) as f64),
            DataType::Pad(_) => Scalar::UInt(0),
            _ => Scalar::UInt(buf[0] as u64),
        }
    }

    /// Writes one element of the given type into application storage. The
    /// value must fit the type.
    pub fn write(self, data_type: DataType, buf: &mut [u8]) {
        match data_type {
            DataType::Sint8 => buf[0] = self.to_i8().unwrap_or_default() as u8,
            DataType::Sint16 => LE::write_i16(buf, self.to_i16().unwrap_or_default()),
            DataType::Sint32 => LE::write_i32(buf, self.to_i32().unwrap_or_default()),
            DataType::Sint64 => LE::write_i64(buf, self.to_i64().unwrap_or_default()),
            DataType::Uint16 | DataType::Bits16 => {
                LE::write_u16(buf, self.to_u16().unwrap_or_default())
            }
            DataType::Uint32 | DataType::Bits32 => {
                LE::write_u32(buf, self.to_u32().unwrap_or_default())
            }
            DataType::Uint64 => LE::write_u64(buf, self.to_u64().unwrap_or_default()),
            DataType::Float => LE::write_f32(buf, self.to_f32().unwrap_or_default()),
            DataType::Pad(_) => {}
            _ => buf[0] = self.to_u8().unwrap_or_default(),
        }
    }
}

impl ToPrimitive for Scalar {
    fn to_i64(&self) -> Option<i64> {
        match *self {
            Scalar::Int(v) => Some(v),
            Scalar::UInt(v) => v.to_i64(),
            Scalar::Float(v) => v.to_i64(),
        }
    }

    fn to_u64(&self) -> Option<u64> {
        match *self {
            Scalar::Int(v) => v.to_u64(),
            Scalar::UInt(v) => Some(v),
            Scalar::Float(v) => v.to_u64(),
        }
    }

    fn to_f64(&self) -> Option<f64> {
        Some(match *self {
            Scalar::Int(v) => v as f64,
            Scalar::UInt(v) => v as f64,
            Scalar::Float(v) => v,
        })
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => self.to_f64()?.partial_cmp(&other.to_f64()?),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::UInt(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Rust types that can be read from and written to ADI storage.
pub trait AdiValue: Copy {
    const NAME: &'static str;

    /// Whether an element of the data type is stored as `Self`.
    fn accepts(data_type: DataType) -> bool;
    fn read(buf: &[u8]) -> Self;
    fn write(self, buf: &mut [u8]);
    fn to_scalar(self) -> Scalar;
}

macro_rules! adi_value {
    ($ty:ty, $name:expr, $read:expr, $write:expr, $scalar:ident, $($dt:pat)|+) => {
        impl AdiValue for $ty {
            const NAME: &'static str = $name;

            fn accepts(data_type: DataType) -> bool {
                matches!(data_type, $($dt)|+)
            }

            fn read(buf: &[u8]) -> Self {
                $read(buf)
            }

            fn write(self, buf: &mut [u8]) {
                $write(buf, self)
            }

            fn to_scalar(self) -> Scalar {
                Scalar::$scalar(self.into())
            }
        }
    };
}

adi_value!(u8, "u8", |b: &[u8]| b[0], |b: &mut [u8], v| b[0] = v, UInt,
           DataType::Uint8 | DataType::Char | DataType::Enum | DataType::Bits8
           | DataType::Octet | DataType::Bit(_));
adi_value!(i8, "i8", |b: &[u8]| b[0] as i8, |b: &mut [u8], v: i8| b[0] = v as u8, Int,
           DataType::Sint8);
adi_value!(u16, "u16", LE::read_u16, LE::write_u16, UInt,
           DataType::Uint16 | DataType::Bits16);
adi_value!(i16, "i16", LE::read_i16, LE::write_i16, Int, DataType::Sint16);
adi_value!(u32, "u32", LE::read_u32, LE::write_u32, UInt,
           DataType::Uint32 | DataType::Bits32);
adi_value!(i32, "i32", LE::read_i32, LE::write_i32, Int, DataType::Sint32);
adi_value!(u64, "u64", LE::read_u64, LE::write_u64, UInt, DataType::Uint64);
adi_value!(i64, "i64", LE::read_i64, LE::write_i64, Int, DataType::Sint64);
adi_value!(f32, "f32", LE::read_f32, LE::write_f32, Float, DataType::Float);

impl AdiValue for bool {
    const NAME: &'static str = "bool";

    fn accepts(data_type: DataType) -> bool {
        matches!(data_type, DataType::Bool | DataType::Bool1)
    }

    fn read(buf: &[u8]) -> Self {
        buf[0] != 0
    }

    fn write(self, buf: &mut [u8]) {
        buf[0] = self as u8;
    }

    fn to_scalar(self) -> Scalar {
        Scalar::UInt(self as u64)
    }
}

#[test]
fn test_scalar_ordering() {
    assert!(Scalar::Int(-1) < Scalar::UInt(0));
    assert!(Scalar::UInt(u64::MAX) > Scalar::Int(i64::MAX));
    assert!(Scalar::Float(1.5) > Scalar::UInt(1));
    assert_eq!(Scalar::Int(5), Scalar::UInt(5));
    assert_eq!(Scalar::Float(2.0), Scalar::Int(2));
}

#[test]
fn test_scalar_fits() {
    assert!(Scalar::UInt(65535).fits(DataType::Uint16));
    assert!(!Scalar::UInt(65536).fits(DataType::Uint16));
    assert!(!Scalar::Int(-1).fits(DataType::Uint8));
    assert!(Scalar::Int(-128).fits(DataType::Sint8));
    assert!(!Scalar::Float(0.5).fits(DataType::Uint8));
    assert!(Scalar::Float(3.0).fits(DataType::Uint8));
    assert!(Scalar::Int(-3).fits(DataType::Float));
    assert!(Scalar::UInt(7).fits(DataType::Bit(3)));
    assert!(!Scalar::UInt(8).fits(DataType::Bit(3)));
}

#[test]
fn test_scalar_storage() {
    let mut buf = [0u8; 4];
    Scalar::Int(-2).write(DataType::Sint16, &mut buf);
    assert_eq!(&buf[..2], &[0xFE, 0xFF]);
    assert_eq!(Scalar::read(DataType::Sint16, &buf), Scalar::Int(-2));

    Scalar::UInt(0x1234).write(DataType::Uint16, &mut buf);
    assert_eq!(&buf[..2], &[0x34, 0x12]);
    assert_eq!(u16::read(&buf), 0x1234);

    Scalar::Float(1.5).write(DataType::Float, &mut buf);
    assert_eq!(f32::read(&buf), 1.5);
}

#[test]
fn test_value_types() {
    assert!(u16::accepts(DataType::Uint16));
    assert!(!u16::accepts(DataType::Sint16));
    assert!(u8::accepts(DataType::Bit(5)));
    assert!(bool::accepts(DataType::Bool1));
    assert_eq!((-3i32).to_scalar(), Scalar::Int(-3));
}
