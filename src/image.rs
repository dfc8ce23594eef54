// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Copying ADI values into and out of little-endian process data images.

use crate::adi::AdiStore;
use crate::map::Layout;
use crate::types::*;
use log::*;

fn put_bits(buf: &mut [u8], offset: usize, width: usize, value: u8) {
    for i in 0..width {
        let bit = offset + i;
        let mask = 1 << (bit % 8);
        if (value >> i) & 1 != 0 {
            buf[bit / 8] |= mask;
        } else {
            buf[bit / 8] &= !mask;
        }
    }
}

fn get_bits(buf: &[u8], offset: usize, width: usize) -> u8 {
    (0..width).fold(0, |acc, i| {
        let bit = offset + i;
        acc | (((buf[bit / 8] >> (bit % 8)) & 1) << i)
    })
}

fn check_size(layout: &Layout, buf: &[u8]) -> Result<()> {
    if buf.len() < layout.size() {
        return Err(Error::ImageSize {
            need: layout.size(),
            got: buf.len(),
        });
    }
    Ok(())
}

/// Writes the current values of all mapped ADI elements into the image.
pub fn pack(layout: &Layout, store: &AdiStore, buf: &mut [u8]) -> Result<()> {
    check_size(layout, buf)?;
    for field in layout.fields() {
        let (elem, raw) = store
            .element(field.adi, field.index)
            .ok_or(Error::UnknownAdi(field.adi))?;
        let dt = elem.data_type;
        let width = dt.bit_size();
        for i in 0..elem.count as usize {
            let offset = field.bit_offset + i * width;
            match dt {
                DataType::Pad(_) => put_bits(buf, offset, width, 0),
                DataType::Bool1 | DataType::Bit(_) => put_bits(buf, offset, width, raw[i]),
                _ => {
                    let size = dt.storage_size();
                    let at = offset / 8;
                    buf[at..at + size].copy_from_slice(&raw[i * size..(i + 1) * size]);
                }
            }
        }
    }
    Ok(())
}

/// Copies all mapped ADI elements from the image into the store, and
/// returns the number of elements rejected for being out of range.
pub fn unpack(layout: &Layout, buf: &[u8], store: &mut AdiStore) -> Result<usize> {
    check_size(layout, buf)?;
    let mut rejected = 0;
    let mut raw = vec![];
    for field in layout.fields() {
        let elem = field.elem;
        let dt = elem.data_type;
        if let DataType::Pad(_) = dt {
            continue;
        }
        let width = dt.bit_size();
        raw.clear();
        for i in 0..elem.count as usize {
            let offset = field.bit_offset + i * width;
            match dt {
                DataType::Bool1 | DataType::Bit(_) => raw.push(get_bits(buf, offset, width)),
                _ => {
                    let at = offset / 8;
                    raw.extend_from_slice(&buf[at..at + dt.storage_size()]);
                }
            }
        }
        if !store.store_element(field.adi, field.index, &raw) {
            rejected += 1;
        }
    }
    if rejected > 0 {
        debug!("{} process data element(s) not taken over", rejected);
    }
    Ok(rejected)
}

#[cfg(test)]
use crate::{
    adi::{motor_table, AdiEntry, AdiProperties, AdiTable, StructField},
    map::{MapItem, ProcessDataMap},
    value::Scalar,
};

#[test]
fn test_bits() {
    let mut buf = [0u8; 2];
    put_bits(&mut buf, 6, 3, 0b101);
    assert_eq!(buf, [0b0100_0000, 0b0000_0001]);
    assert_eq!(get_bits(&buf, 6, 3), 0b101);
    put_bits(&mut buf, 6, 3, 0);
    assert_eq!(buf, [0, 0]);
}

#[test]
fn test_motor_images() {
    let table = motor_table();
    let map = ProcessDataMap::new(vec![
        MapItem::all(1, PdDirection::Write),
        MapItem::all(2, PdDirection::Read),
    ]);
    let write = map.layout(&table, PdDirection::Write).unwrap();
    let read = map.layout(&table, PdDirection::Read).unwrap();
    let mut store = AdiStore::new(&table);

    assert_eq!(unpack(&read, &[0xE8, 0x03], &mut store).unwrap(), 0);
    let reference = store.handle::<u16>(2).unwrap();
    assert_eq!(store.get(reference), 1000);

    let speed = store.handle::<u16>(1).unwrap();
    store.set(speed, 0x0102).unwrap();
    let mut buf = [0u8; 2];
    pack(&write, &store, &mut buf).unwrap();
    assert_eq!(buf, [0x02, 0x01]);

    assert!(matches!(
        pack(&write, &store, &mut [0u8; 1]),
        Err(Error::ImageSize { need: 2, got: 1 })
    ));
}

#[test]
fn test_structured_image() {
    let io = AdiDesc::PD_OUT | AdiDesc::PD_IN;
    let table = AdiTable::new(vec![AdiEntry::structured(
        5,
        "CTRL",
        io,
        vec![
            StructField::new("enable".into(), DataType::Bool1, 1, io),
            StructField::new("mode".into(), DataType::Bit(3), 1, io),
            StructField::new("pad".into(), DataType::Pad(4), 1, io),
            StructField::new("setpoint".into(), DataType::Sint16, 1, io),
        ],
    )])
    .unwrap();
    let map = ProcessDataMap::new(vec![
        MapItem::all(5, PdDirection::Read),
        MapItem::all(5, PdDirection::Write),
    ]);
    map.validate(&table).unwrap();
    let read = map.layout(&table, PdDirection::Read).unwrap();
    let write = map.layout(&table, PdDirection::Write).unwrap();
    let mut store = AdiStore::new(&table);

    // enable = 1, mode = 5, padding bits set by the sender, setpoint = -2
    let image = [0b1111_1011, 0xFE, 0xFF];
    assert_eq!(unpack(&read, &image, &mut store).unwrap(), 0);
    let mut out = [0xAAu8; 3];
    pack(&write, &store, &mut out).unwrap();
    assert_eq!(out, [0b0000_1011, 0xFE, 0xFF]);
}

#[test]
fn test_rejected_values() {
    let limits = AdiProperties::new(Scalar::UInt(0), Scalar::UInt(1500), Scalar::UInt(0));
    let table = AdiTable::new(vec![
        AdiEntry::new(2, "REF_SPEED", DataType::Uint16, 1, AdiDesc::PD_IN).with_props(limits),
        AdiEntry::new(4, "REF_TORQUE", DataType::Uint16, 1, AdiDesc::PD_IN),
    ])
    .unwrap();
    let map = ProcessDataMap::new(vec![
        MapItem::all(2, PdDirection::Read),
        MapItem::all(4, PdDirection::Read),
    ]);
    let read = map.layout(&table, PdDirection::Read).unwrap();
    let mut store = AdiStore::new(&table);

    assert_eq!(unpack(&read, &[0xDC, 0x05, 0x07, 0x00], &mut store).unwrap(), 0);
    assert_eq!(unpack(&read, &[0xDD, 0x05, 0x08, 0x00], &mut store).unwrap(), 1);
    let reference = store.handle::<u16>(2).unwrap();
    let torque = store.handle::<u16>(4).unwrap();
    assert_eq!(store.get(reference), 1500);
    assert_eq!(store.get(torque), 8);
}
