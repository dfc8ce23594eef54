// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Process data maps: which ADI elements are exchanged cyclically, and where
//! they sit in the process data image.

use crate::adi::{AdiTable, Element};
use crate::types::*;
use derive_new::new;
use std::collections::HashSet;

/// How many elements of an ADI a map item covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapElements {
    /// All elements from the start index on.
    All,
    Count(u8),
}

impl Default for MapElements {
    fn default() -> Self {
        MapElements::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, new)]
pub struct MapItem {
    pub adi: AdiInstance,
    pub direction: PdDirection,
    pub elements: MapElements,
    pub start_index: u8,
}

impl MapItem {
    /// Maps every element of the ADI.
    pub const fn all(adi: AdiInstance, direction: PdDirection) -> Self {
        MapItem {
            adi,
            direction,
            elements: MapElements::All,
            start_index: 0,
        }
    }

    /// The element indices covered, given the ADI's element count.
    fn range(&self, available: u8) -> Result<std::ops::Range<u8>> {
        let end = match self.elements {
            MapElements::All => available as usize,
            MapElements::Count(n) => self.start_index as usize + n as usize,
        };
        if end > available as usize || end <= self.start_index as usize {
            return Err(Error::ElementRange {
                adi: self.adi,
                start: self.start_index,
                end,
                count: available,
            });
        }
        Ok(self.start_index..end as u8)
    }
}

/// An ordered list of map items, e.g. the default map or the map of an
/// assembly instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessDataMap {
    items: Vec<MapItem>,
}

impl ProcessDataMap {
    pub fn new(items: Vec<MapItem>) -> Self {
        ProcessDataMap { items }
    }

    pub fn items(&self) -> &[MapItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn direction(&self, direction: PdDirection) -> impl Iterator<Item = &MapItem> {
        self.items.iter().filter(move |item| item.direction == direction)
    }

    /// Checks every item against the ADI table: the ADI exists and may be
    /// mapped in the item's direction, the element range is valid, and no
    /// element is mapped twice in the same direction.
    pub fn validate(&self, table: &AdiTable) -> Result<()> {
        let mut seen = HashSet::new();
        for item in &self.items {
            let entry = table.get(item.adi).ok_or(Error::UnknownAdi(item.adi))?;
            let elements = entry.elements();
            for index in item.range(entry.element_count())? {
                let elem = &elements[index as usize];
                if !entry.desc.allows(item.direction) || !elem.desc.allows(item.direction) {
                    return Err(Error::NotMappable {
                        adi: item.adi,
                        direction: item.direction,
                    });
                }
                if !seen.insert((item.adi, item.direction, index)) {
                    return Err(Error::OverlappingMap {
                        adi: item.adi,
                        index,
                        direction: item.direction,
                    });
                }
            }
        }
        Ok(())
    }

    /// Computes the image layout of one direction. The map must have been
    /// validated against the same table.
    pub fn layout(&self, table: &AdiTable, direction: PdDirection) -> Result<Layout> {
        let mut fields = vec![];
        let mut bits = 0;
        for item in self.direction(direction) {
            let entry = table.get(item.adi).ok_or(Error::UnknownAdi(item.adi))?;
            let elements = entry.elements();
            for index in item.range(entry.element_count())? {
                let elem = elements[index as usize];
                if !elem.data_type.is_bit_packed() {
                    bits = (bits + 7) / 8 * 8;
                }
                fields.push(LayoutField {
                    adi: item.adi,
                    index,
                    elem,
                    bit_offset: bits,
                });
                bits += elem.bit_size();
            }
        }
        Ok(Layout { fields, bits })
    }
}

/// Position of one mapped element in a process data image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutField {
    pub adi: AdiInstance,
    pub index: u8,
    pub elem: Element,
    pub bit_offset: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    fields: Vec<LayoutField>,
    bits: usize,
}

impl Layout {
    pub fn fields(&self) -> &[LayoutField] {
        &self.fields
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Image size in bytes.
    pub fn size(&self) -> usize {
        (self.bits + 7) / 8
    }
}

#[cfg(test)]
use crate::adi::{motor_table, AdiEntry, StructField};

#[test]
fn test_default_map_layout() {
    let table = motor_table();
    let map = ProcessDataMap::new(vec![
        MapItem::all(1, PdDirection::Write),
        MapItem::all(2, PdDirection::Read),
    ]);
    map.validate(&table).unwrap();

    let write = map.layout(&table, PdDirection::Write).unwrap();
    assert_eq!(write.size(), 2);
    assert_eq!(write.fields()[0].adi, 1);
    let read = map.layout(&table, PdDirection::Read).unwrap();
    assert_eq!(read.size(), 2);
    assert_eq!(read.fields()[0].adi, 2);
}

#[test]
fn test_map_validation() {
    let table = motor_table();
    let check = |items| ProcessDataMap::new(items).validate(&table);

    assert!(matches!(
        check(vec![MapItem::all(9, PdDirection::Write)]),
        Err(Error::UnknownAdi(9))
    ));
    // SPEED is only mappable as write process data
    assert!(matches!(
        check(vec![MapItem::all(1, PdDirection::Read)]),
        Err(Error::NotMappable { adi: 1, .. })
    ));
    assert!(matches!(
        check(vec![MapItem::all(1, PdDirection::Write), MapItem::all(1, PdDirection::Write)]),
        Err(Error::OverlappingMap { adi: 1, index: 0, .. })
    ));
    assert!(matches!(
        check(vec![MapItem::new(1, PdDirection::Write, MapElements::Count(2), 0)]),
        Err(Error::ElementRange { .. })
    ));
    assert!(matches!(
        check(vec![MapItem::new(1, PdDirection::Write, MapElements::Count(0), 0)]),
        Err(Error::ElementRange { .. })
    ));
}

#[test]
fn test_bit_packed_layout() {
    let out = AdiDesc::PD_OUT;
    let table = AdiTable::new(vec![
        AdiEntry::structured(
            1,
            "STATUS",
            out,
            vec![
                StructField::new("running".into(), DataType::Bit(1), 1, out),
                StructField::new("mode".into(), DataType::Bit(3), 1, out),
                StructField::new("flags".into(), DataType::Bool1, 2, out),
                StructField::new("pad".into(), DataType::Pad(2), 1, out),
                StructField::new("count".into(), DataType::Uint16, 1, out),
                StructField::new("fault".into(), DataType::Bit(2), 1, out),
            ],
        ),
        AdiEntry::new(2, "ARRAY", DataType::Uint8, 4, out),
    ])
    .unwrap();
    let map = ProcessDataMap::new(vec![
        MapItem::all(1, PdDirection::Write),
        MapItem::new(2, PdDirection::Write, MapElements::Count(2), 1),
    ]);
    map.validate(&table).unwrap();
    let layout = map.layout(&table, PdDirection::Write).unwrap();
    let offsets: Vec<_> = layout.fields().iter().map(|f| f.bit_offset).collect();
    assert_eq!(offsets, vec![0, 1, 4, 6, 8, 24, 32, 40]);
    assert_eq!(layout.fields()[6].index, 1);
    assert_eq!(layout.bit_len(), 48);
    assert_eq!(layout.size(), 6);
}
