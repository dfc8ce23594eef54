// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Application side of an Anybus CompactCom (ABCC) network interface.
//!
//! The crate describes what data an application exposes to the fieldbus:
//! the Application Data Instances ([AdiTable]) with their value properties,
//! the default process data map ([ProcessDataMap]), and optional assembly
//! mapping instances ([AssemblyTable]) a network can select instead. These
//! tables are loaded from TOML ([Application::load]) rather than compiled in.
//!
//! [AdiStore] holds the values behind the ADIs, and the [image] module moves
//! them into and out of the process data images exchanged by a driver.

mod adi;
mod asm;
mod config;
mod map;
mod types;
mod value;

pub mod image;

pub use self::{
    adi::{Adi, AdiEntry, AdiProperties, AdiStore, AdiTable, Element, StructField},
    asm::{AsmFlags, AssemblyInstance, AssemblyTable, EthernetIpInstances},
    config::{AppConfig, Application},
    map::{Layout, LayoutField, MapElements, MapItem, ProcessDataMap},
    types::*,
    value::{AdiValue, Scalar},
};
