// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Application data instances: declarations, validation and backing storage.

use crate::types::*;
use crate::value::{AdiValue, Scalar};
use derive_new::new;
use log::*;
use std::{collections::BTreeMap, marker::PhantomData};

/// Min, max and default value of a scalar numeric ADI.
#[derive(Debug, Clone, Copy, PartialEq, new)]
pub struct AdiProperties {
    pub min: Scalar,
    pub max: Scalar,
    pub default: Scalar,
}

impl AdiProperties {
    /// The full range of the type, defaulting to zero (or the closest bound).
    pub fn for_type(data_type: DataType) -> Self {
        let min = Scalar::type_min(data_type);
        let max = Scalar::type_max(data_type);
        let zero = Scalar::UInt(0);
        let default = if zero < min { min } else if zero > max { max } else { zero };
        AdiProperties { min, max, default }
    }

    pub fn contains(&self, value: Scalar) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One member of a structured ADI.
#[derive(Debug, Clone, PartialEq, new)]
pub struct StructField {
    pub name: String,
    pub data_type: DataType,
    pub num_elements: u8,
    pub desc: AdiDesc,
}

/// The unit of process data mapping: an array element of a simple ADI, or
/// a field of a structured ADI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    pub data_type: DataType,
    pub count: u8,
    pub desc: AdiDesc,
}

impl Element {
    pub fn bit_size(&self) -> usize {
        self.data_type.bit_size() * self.count as usize
    }

    pub fn storage_size(&self) -> usize {
        self.data_type.storage_size() * self.count as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdiEntry {
    pub instance: AdiInstance,
    pub name: String,
    pub data_type: DataType,
    pub num_elements: u8,
    pub desc: AdiDesc,
    pub props: Option<AdiProperties>,
    /// Non-empty for structured ADIs; `data_type` and `num_elements` are
    /// then ignored.
    pub fields: Vec<StructField>,
}

impl AdiEntry {
    pub fn new(
        instance: AdiInstance,
        name: impl Into<String>,
        data_type: DataType,
        num_elements: u8,
        desc: AdiDesc,
    ) -> Self {
        AdiEntry {
            instance,
            name: name.into(),
            data_type,
            num_elements,
            desc,
            props: None,
            fields: vec![],
        }
    }

    pub fn structured(
        instance: AdiInstance,
        name: impl Into<String>,
        desc: AdiDesc,
        fields: Vec<StructField>,
    ) -> Self {
        AdiEntry {
            num_elements: fields.len() as u8,
            fields,
            ..AdiEntry::new(instance, name, DataType::Octet, 0, desc)
        }
    }

    pub fn with_props(mut self, props: AdiProperties) -> Self {
        self.props = Some(props);
        self
    }

    pub fn is_struct(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn element_count(&self) -> u8 {
        if self.is_struct() {
            self.fields.len() as u8
        } else {
            self.num_elements
        }
    }

    pub fn elements(&self) -> Vec<Element> {
        if self.is_struct() {
            self.fields
                .iter()
                .map(|f| Element {
                    data_type: f.data_type,
                    count: f.num_elements,
                    desc: f.desc,
                })
                .collect()
        } else {
            let elem = Element {
                data_type: self.data_type,
                count: 1,
                desc: self.desc,
            };
            vec![elem; self.num_elements as usize]
        }
    }

    /// Explicit properties, or the type's full range for numeric ADIs.
    pub fn properties(&self) -> Option<AdiProperties> {
        if self.is_struct() || !self.data_type.is_numeric() {
            None
        } else {
            Some(self.props.unwrap_or_else(|| AdiProperties::for_type(self.data_type)))
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidAdi {
            adi: self.instance,
            reason: reason.into(),
        };
        if self.instance == 0 {
            return Err(Error::ReservedInstance);
        }
        if self.is_struct() {
            if self.fields.len() > u8::MAX as usize {
                return Err(invalid("too many structure fields"));
            }
            if self.props.is_some() {
                return Err(invalid("structured ADIs cannot have value properties"));
            }
            if self.fields.iter().any(|f| f.num_elements == 0) {
                return Err(invalid("structure field with zero elements"));
            }
            if let Some(f) = self.fields.iter().find(|f| !f.data_type.is_valid()) {
                return Err(Error::InvalidAdi {
                    adi: self.instance,
                    reason: format!("field '{}' has invalid data type {}", f.name, f.data_type),
                });
            }
            return Ok(());
        }
        if self.num_elements == 0 {
            return Err(invalid("zero elements"));
        }
        if !self.data_type.is_valid() {
            return Err(invalid("invalid bit width"));
        }
        if let DataType::Pad(_) = self.data_type {
            return Err(invalid("padding is only valid inside structures"));
        }
        if let Some(props) = self.props {
            if !self.data_type.is_numeric() {
                return Err(invalid("value properties on a non-numeric type"));
            }
            let dt = self.data_type;
            if !(props.min.fits(dt) && props.max.fits(dt) && props.default.fits(dt)) {
                return Err(invalid("value properties not representable in the data type"));
            }
            if props.min > props.max || !props.contains(props.default) {
                return Err(invalid("default value outside [min, max]"));
            }
        }
        Ok(())
    }
}

/// The validated set of ADIs, ordered by instance number.
#[derive(Debug, Clone, Default)]
pub struct AdiTable {
    entries: Vec<AdiEntry>,
}

impl AdiTable {
    pub fn new(mut entries: Vec<AdiEntry>) -> Result<Self> {
        entries.sort_by_key(|e| e.instance);
        for (i, entry) in entries.iter().enumerate() {
            entry.validate()?;
            if i > 0 && entries[i - 1].instance == entry.instance {
                return Err(Error::DuplicateAdi(entry.instance));
            }
        }
        debug!("ADI table with {} entries", entries.len());
        Ok(AdiTable { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, instance: AdiInstance) -> Option<&AdiEntry> {
        self.position(instance).map(|i| &self.entries[i])
    }

    pub fn find(&self, name: &str) -> Option<&AdiEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdiEntry> {
        self.entries.iter()
    }

    fn position(&self, instance: AdiInstance) -> Option<usize> {
        self.entries
            .binary_search_by_key(&instance, |e| e.instance)
            .ok()
    }
}

#[derive(Debug, Clone)]
struct ElementSlot {
    elem: Element,
    offset: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    instance: AdiInstance,
    structured: bool,
    props: Option<AdiProperties>,
    elements: Vec<ElementSlot>,
}

/// A typed reference to a simple ADI inside an [`AdiStore`].
#[derive(Debug)]
pub struct Adi<T> {
    slot: usize,
    instance: AdiInstance,
    _type: PhantomData<T>,
}

impl<T> Clone for Adi<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Adi<T> {}

impl<T> Adi<T> {
    pub fn instance(&self) -> AdiInstance {
        self.instance
    }
}

/// Backing storage of all ADI values, initialized from their defaults.
#[derive(Debug, Clone)]
pub struct AdiStore {
    data: Vec<u8>,
    slots: Vec<Slot>,
    index: BTreeMap<AdiInstance, usize>,
}

impl AdiStore {
    pub fn new(table: &AdiTable) -> Self {
        let mut offset = 0;
        let mut slots = Vec::with_capacity(table.len());
        let mut index = BTreeMap::new();
        for entry in table.iter() {
            let elements = entry
                .elements()
                .into_iter()
                .map(|elem| {
                    let slot = ElementSlot { elem, offset };
                    offset += elem.storage_size();
                    slot
                })
                .collect();
            index.insert(entry.instance, slots.len());
            slots.push(Slot {
                instance: entry.instance,
                structured: entry.is_struct(),
                props: entry.properties(),
                elements,
            });
        }
        let mut store = AdiStore {
            data: vec![0; offset],
            slots,
            index,
        };
        store.reset();
        store
    }

    /// Restores every ADI to its default value.
    pub fn reset(&mut self) {
        for slot in &self.slots {
            for es in &slot.elements {
                let default = slot.props.map_or(Scalar::UInt(0), |p| p.default);
                let size = es.elem.data_type.storage_size();
                for i in 0..es.elem.count as usize {
                    let at = es.offset + i * size;
                    default.write(es.elem.data_type, &mut self.data[at..at + size]);
                }
            }
        }
    }

    /// Resolves a typed handle, checking that the ADI exists, is not
    /// structured, and is stored as `T`.
    pub fn handle<T: AdiValue>(&self, instance: AdiInstance) -> Result<Adi<T>> {
        let slot = *self.index.get(&instance).ok_or(Error::UnknownAdi(instance))?;
        let elem = &self.slots[slot].elements[0].elem;
        if self.slots[slot].structured || !T::accepts(elem.data_type) {
            return Err(Error::TypeMismatch {
                adi: instance,
                actual: elem.data_type,
                requested: T::NAME,
            });
        }
        Ok(Adi {
            slot,
            instance,
            _type: PhantomData,
        })
    }

    pub fn get<T: AdiValue>(&self, adi: Adi<T>) -> T {
        let es = &self.slots[adi.slot].elements[0];
        T::read(&self.data[es.offset..])
    }

    pub fn get_elem<T: AdiValue>(&self, adi: Adi<T>, index: usize) -> Option<T> {
        let es = self.slots[adi.slot].elements.get(index)?;
        Some(T::read(&self.data[es.offset..]))
    }

    pub fn set<T: AdiValue>(&mut self, adi: Adi<T>, value: T) -> Result<()> {
        self.set_elem(adi, 0, value)
    }

    pub fn set_elem<T: AdiValue>(&mut self, adi: Adi<T>, index: usize, value: T) -> Result<()> {
        let slot = &self.slots[adi.slot];
        let es = slot.elements.get(index).ok_or(Error::ElementRange {
            adi: slot.instance,
            start: index.min(u8::MAX as usize) as u8,
            end: index + 1,
            count: slot.elements.len() as u8,
        })?;
        check_value(slot, es.elem.data_type, value.to_scalar())?;
        let size = es.elem.data_type.storage_size();
        value.write(&mut self.data[es.offset..es.offset + size]);
        Ok(())
    }

    /// The properties the store checks writes against, if any.
    pub fn properties<T>(&self, adi: Adi<T>) -> Option<AdiProperties> {
        self.slots[adi.slot].props
    }

    pub(crate) fn element(&self, instance: AdiInstance, index: u8) -> Option<(Element, &[u8])> {
        let slot = &self.slots[*self.index.get(&instance)?];
        let es = slot.elements.get(index as usize)?;
        Some((es.elem, &self.data[es.offset..es.offset + es.elem.storage_size()]))
    }

    /// Stores a raw element received from the network. Values outside the
    /// ADI's properties are rejected and the previous value is kept.
    pub(crate) fn store_element(&mut self, instance: AdiInstance, index: u8, raw: &[u8]) -> bool {
        let slot_idx = match self.index.get(&instance) {
            Some(&i) => i,
            None => return false,
        };
        let slot = &self.slots[slot_idx];
        let es = match slot.elements.get(index as usize) {
            Some(es) => es,
            None => return false,
        };
        let size = es.elem.data_type.storage_size();
        for i in 0..es.elem.count as usize {
            let value = Scalar::read(es.elem.data_type, &raw[i * size..]);
            if let Err(e) = check_value(slot, es.elem.data_type, value) {
                warn!("rejected process data: {}", e);
                return false;
            }
        }
        let range = es.offset..es.offset + es.elem.storage_size();
        self.data[range].copy_from_slice(&raw[..es.elem.storage_size()]);
        true
    }
}

/// Checks a value against the ADI's properties, or against the range of its
/// data type if it has none (e.g. bit fields).
fn check_value(slot: &Slot, data_type: DataType, value: Scalar) -> Result<()> {
    let props = slot.props.unwrap_or_else(|| AdiProperties::for_type(data_type));
    if value.fits(data_type) && props.contains(value) {
        return Ok(());
    }
    Err(Error::OutOfRange {
        adi: slot.instance,
        value: value.to_string(),
        min: props.min.to_string(),
        max: props.max.to_string(),
    })
}

#[cfg(test)]
pub(crate) fn motor_table() -> AdiTable {
    let speed = AdiProperties::new(Scalar::UInt(0), Scalar::UInt(0xFFFF), Scalar::UInt(0));
    AdiTable::new(vec![
        AdiEntry::new(1, "SPEED", DataType::Uint16, 1, AdiDesc::PD_OUT).with_props(speed),
        AdiEntry::new(2, "REF_SPEED", DataType::Uint16, 1, AdiDesc::PD_IN).with_props(speed),
        AdiEntry::new(3, "TORQUE", DataType::Uint16, 1, AdiDesc::PD_OUT),
        AdiEntry::new(4, "REF_TORQUE", DataType::Uint16, 1, AdiDesc::PD_IN),
    ])
    .unwrap()
}

#[test]
fn test_table_lookup() {
    let table = motor_table();
    assert_eq!(table.len(), 4);
    assert_eq!(table.get(2).unwrap().name, "REF_SPEED");
    assert_eq!(table.find("TORQUE").unwrap().instance, 3);
    assert!(table.get(5).is_none());
    assert!(table.find("speed").is_none());
}

#[test]
fn test_table_validation() {
    let entry = |inst| AdiEntry::new(inst, "X", DataType::Uint8, 1, AdiDesc::GET);
    assert!(matches!(
        AdiTable::new(vec![entry(0)]),
        Err(Error::ReservedInstance)
    ));
    assert!(matches!(
        AdiTable::new(vec![entry(7), entry(3), entry(7)]),
        Err(Error::DuplicateAdi(7))
    ));
    assert!(AdiTable::new(vec![AdiEntry::new(1, "X", DataType::Uint8, 0, AdiDesc::GET)]).is_err());

    let bad_default = AdiProperties::new(Scalar::UInt(10), Scalar::UInt(20), Scalar::UInt(0));
    assert!(AdiTable::new(vec![entry(1).with_props(bad_default)]).is_err());
    let too_wide = AdiProperties::new(Scalar::UInt(0), Scalar::UInt(300), Scalar::UInt(0));
    assert!(AdiTable::new(vec![entry(1).with_props(too_wide)]).is_err());
    let on_char = AdiEntry::new(1, "C", DataType::Char, 8, AdiDesc::GET)
        .with_props(AdiProperties::for_type(DataType::Uint8));
    assert!(AdiTable::new(vec![on_char]).is_err());

    let wide_bits = AdiEntry::new(1, "B", DataType::Bit(9), 1, AdiDesc::GET);
    assert!(matches!(AdiTable::new(vec![wide_bits]), Err(Error::InvalidAdi { adi: 1, .. })));
    let wide_pad = AdiEntry::structured(
        1,
        "S",
        AdiDesc::GET,
        vec![StructField::new("pad".into(), DataType::Pad(20), 1, AdiDesc::GET)],
    );
    assert!(matches!(AdiTable::new(vec![wide_pad]), Err(Error::InvalidAdi { adi: 1, .. })));
}

#[test]
fn test_structured_entry() {
    let fields = vec![
        StructField::new("running".into(), DataType::Bit(1), 1, AdiDesc::PD_OUT),
        StructField::new("mode".into(), DataType::Bit(3), 1, AdiDesc::PD_OUT),
        StructField::new("pad".into(), DataType::Pad(4), 1, AdiDesc::PD_OUT),
        StructField::new("counts".into(), DataType::Uint16, 2, AdiDesc::PD_OUT),
    ];
    let entry = AdiEntry::structured(10, "STATUS", AdiDesc::PD_OUT, fields);
    assert!(entry.is_struct());
    assert_eq!(entry.element_count(), 4);
    assert_eq!(entry.elements()[3].bit_size(), 32);
    assert!(entry.properties().is_none());
    let table = AdiTable::new(vec![entry]).unwrap();

    let store = AdiStore::new(&table);
    assert!(matches!(store.handle::<u8>(10), Err(Error::TypeMismatch { .. })));
    let (elem, raw) = store.element(10, 3).unwrap();
    assert_eq!(elem.count, 2);
    assert_eq!(raw, &[0, 0, 0, 0]);
}

#[test]
fn test_store_defaults_and_limits() {
    let props = AdiProperties::new(Scalar::Int(-100), Scalar::Int(100), Scalar::Int(-5));
    let table = AdiTable::new(vec![
        AdiEntry::new(1, "POS", DataType::Sint16, 1, AdiDesc::PD_IN).with_props(props),
        AdiEntry::new(2, "ARR", DataType::Uint8, 3, AdiDesc::PD_OUT),
        AdiEntry::new(3, "LOW", DataType::Sint8, 1, AdiDesc::GET)
            .with_props(AdiProperties::new(Scalar::Int(5), Scalar::Int(9), Scalar::Int(7))),
    ])
    .unwrap();
    let mut store = AdiStore::new(&table);

    let pos = store.handle::<i16>(1).unwrap();
    assert_eq!(store.get(pos), -5);
    store.set(pos, 100).unwrap();
    assert_eq!(store.get(pos), 100);
    assert!(matches!(store.set(pos, 101), Err(Error::OutOfRange { adi: 1, .. })));
    assert_eq!(store.get(pos), 100);

    assert!(store.handle::<u16>(1).is_err());
    let arr = store.handle::<u8>(2).unwrap();
    store.set_elem(arr, 2, 0xAB).unwrap();
    assert_eq!(store.get_elem(arr, 2), Some(0xAB));
    assert_eq!(store.get_elem(arr, 3), None);
    assert!(matches!(store.set_elem(arr, 3, 1), Err(Error::ElementRange { .. })));
    assert!(matches!(store.handle::<u8>(9), Err(Error::UnknownAdi(9))));

    let low = store.handle::<i8>(3).unwrap();
    assert_eq!(store.get(low), 7);
    store.set(low, 5).unwrap();
    store.reset();
    assert_eq!(store.get(low), 7);
    assert_eq!(store.get(pos), -5);
}

#[test]
fn test_store_network_values() {
    let table = motor_table();
    let mut store = AdiStore::new(&table);
    assert!(store.store_element(2, 0, &[0x10, 0x27]));
    let reference = store.handle::<u16>(2).unwrap();
    assert_eq!(store.get(reference), 10000);
    assert!(!store.store_element(2, 1, &[0, 0]));
    assert!(!store.store_element(42, 0, &[0, 0]));
}

#[test]
fn test_store_bit_field_limits() {
    let table = AdiTable::new(vec![
        AdiEntry::new(1, "MODE", DataType::Bit(3), 1, AdiDesc::PD_OUT),
        AdiEntry::new(2, "FLAGS", DataType::Bits8, 1, AdiDesc::PD_OUT),
    ])
    .unwrap();
    let mut store = AdiStore::new(&table);

    let mode = store.handle::<u8>(1).unwrap();
    assert!(matches!(store.set(mode, 9), Err(Error::OutOfRange { adi: 1, .. })));
    assert!(matches!(store.set(mode, 8), Err(Error::OutOfRange { adi: 1, .. })));
    assert_eq!(store.get(mode), 0);
    store.set(mode, 7).unwrap();
    assert_eq!(store.get(mode), 7);
    assert!(!store.store_element(1, 0, &[9]));
    assert_eq!(store.get(mode), 7);

    let flags = store.handle::<u8>(2).unwrap();
    store.set(flags, 0xFF).unwrap();
    assert_eq!(store.get(flags), 0xFF);
}
