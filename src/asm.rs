// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Assembly mapping instances: alternative static process data layouts a
//! network can select instead of the default map.

use crate::adi::AdiTable;
use crate::map::ProcessDataMap;
use crate::types::*;
use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian as LE};
use log::*;

bitflags! {
    /// Assembly instance descriptor flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AsmFlags: u8 {
        /// The map cannot be changed from the network.
        const STATIC      = 0x01;
        /// The assembly can be selected as process data.
        const PD_MAPPABLE = 0x02;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyInstance {
    pub name: String,
    pub direction: PdDirection,
    pub flags: AsmFlags,
    pub map: ProcessDataMap,
}

impl AssemblyInstance {
    pub fn new(
        name: impl Into<String>,
        direction: PdDirection,
        flags: AsmFlags,
        map: ProcessDataMap,
    ) -> Self {
        AssemblyInstance {
            name: name.into(),
            direction,
            flags,
            map,
        }
    }

    /// Number of ADI maps in the assembly.
    pub fn max_adi_maps(&self) -> usize {
        self.map.len()
    }

    fn validate(&self, table: &AdiTable) -> Result<()> {
        if let Some(item) = self.map.items().iter().find(|i| i.direction != self.direction) {
            return Err(Error::AssemblyDirection {
                name: self.name.clone(),
                adi: item.adi,
            });
        }
        self.map.validate(table)
    }
}

/// All assembly instances of an application, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssemblyTable {
    instances: Vec<AssemblyInstance>,
}

impl AssemblyTable {
    pub fn new(instances: Vec<AssemblyInstance>, table: &AdiTable) -> Result<Self> {
        for inst in &instances {
            inst.validate(table)?;
        }
        debug!("{} assembly instance(s)", instances.len());
        Ok(AssemblyTable { instances })
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssemblyInstance> {
        self.instances.iter()
    }

    /// Assemblies of one direction, in declaration order.
    pub fn direction(&self, direction: PdDirection) -> impl Iterator<Item = &AssemblyInstance> {
        self.instances.iter().filter(move |i| i.direction == direction)
    }

    /// The `index`th process data mappable assembly of the given direction.
    pub fn select(&self, direction: PdDirection, index: usize) -> Result<&AssemblyInstance> {
        self.direction(direction)
            .filter(|i| i.flags.contains(AsmFlags::PD_MAPPABLE))
            .nth(index)
            .ok_or(Error::UnknownAssembly(direction, index))
    }
}

/// EtherNet/IP producing and consuming assembly instance numbers, one per
/// write and read assembly respectively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EthernetIpInstances {
    pub producing: Vec<u16>,
    pub consuming: Vec<u16>,
}

impl EthernetIpInstances {
    pub fn validate(&self, assemblies: &AssemblyTable) -> Result<()> {
        for (direction, given) in [
            (PdDirection::Write, &self.producing),
            (PdDirection::Read, &self.consuming),
        ]
        .iter()
        {
            let expected = assemblies.direction(*direction).count();
            if given.len() != expected {
                return Err(Error::InstanceCount {
                    direction: *direction,
                    given: given.len(),
                    expected,
                });
            }
        }
        Ok(())
    }

    fn encode(instances: &[u16]) -> Vec<u8> {
        let mut buf = vec![0; 2 * instances.len()];
        LE::write_u16_into(instances, &mut buf);
        buf
    }

    /// Value of the host object's producing instance list attribute.
    pub fn producing_attribute(&self) -> Vec<u8> {
        Self::encode(&self.producing)
    }

    /// Value of the host object's consuming instance list attribute.
    pub fn consuming_attribute(&self) -> Vec<u8> {
        Self::encode(&self.consuming)
    }
}

#[cfg(test)]
use crate::{adi::motor_table, map::MapItem};

#[cfg(test)]
fn write_asm(name: &str, adis: &[u16]) -> AssemblyInstance {
    let items = adis.iter().map(|&a| MapItem::all(a, PdDirection::Write)).collect();
    AssemblyInstance::new(
        name,
        PdDirection::Write,
        AsmFlags::STATIC | AsmFlags::PD_MAPPABLE,
        ProcessDataMap::new(items),
    )
}

#[test]
fn test_select() {
    let table = motor_table();
    let read = AssemblyInstance::new(
        "Read mappable assembly 1",
        PdDirection::Read,
        AsmFlags::STATIC | AsmFlags::PD_MAPPABLE,
        ProcessDataMap::new(vec![MapItem::all(2, PdDirection::Read)]),
    );
    let asms = AssemblyTable::new(
        vec![
            write_asm("Write mappable assembly 1", &[1, 3]),
            read,
            write_asm("Write mappable assembly 2", &[1]),
        ],
        &table,
    )
    .unwrap();
    assert_eq!(asms.len(), 3);
    assert_eq!(asms.select(PdDirection::Write, 1).unwrap().name, "Write mappable assembly 2");
    assert_eq!(asms.select(PdDirection::Write, 0).unwrap().max_adi_maps(), 2);
    assert_eq!(asms.select(PdDirection::Read, 0).unwrap().name, "Read mappable assembly 1");
    assert!(matches!(
        asms.select(PdDirection::Read, 1),
        Err(Error::UnknownAssembly(PdDirection::Read, 1))
    ));
}

#[test]
fn test_assembly_validation() {
    let table = motor_table();
    let mut mixed = write_asm("mixed", &[1]);
    mixed.map = ProcessDataMap::new(vec![
        MapItem::all(1, PdDirection::Write),
        MapItem::all(2, PdDirection::Read),
    ]);
    assert!(matches!(
        AssemblyTable::new(vec![mixed], &table),
        Err(Error::AssemblyDirection { adi: 2, .. })
    ));
    assert!(matches!(
        AssemblyTable::new(vec![write_asm("bad", &[2])], &table),
        Err(Error::NotMappable { adi: 2, .. })
    ));
}

#[test]
fn test_ethernet_ip_attributes() {
    let table = motor_table();
    let asms = AssemblyTable::new(
        vec![write_asm("a", &[1]), write_asm("b", &[3]), write_asm("c", &[1, 3])],
        &table,
    )
    .unwrap();
    let eip = EthernetIpInstances {
        producing: vec![0x64, 0x65, 0x66],
        consuming: vec![],
    };
    eip.validate(&asms).unwrap();
    assert_eq!(eip.producing_attribute(), b"\x64\x00\x65\x00\x66\x00");
    assert!(eip.consuming_attribute().is_empty());

    let short = EthernetIpInstances {
        producing: vec![0x64],
        consuming: vec![],
    };
    assert!(matches!(
        short.validate(&asms),
        Err(Error::InstanceCount { given: 1, expected: 3, .. })
    ));
}
