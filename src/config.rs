// Part of abcc-rs. Copyright 2024 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Loading ADI tables, the default map and assembly instances from TOML.
//!
//! ```toml
//! [[adi]]
//! instance = 1
//! name = "SPEED"
//! data_type = "UINT16"
//! access = ["get", "write_pd"]
//! max = 3000
//!
//! [[default_map]]
//! adi = 1
//! direction = "write"
//!
//! [[assembly]]
//! name = "Write mappable assembly 1"
//! direction = "write"
//! flags = ["static", "pd_mappable"]
//! map = [{ adi = 1 }]
//! ```

use crate::adi::{AdiEntry, AdiProperties, AdiTable, StructField};
use crate::asm::{AsmFlags, AssemblyInstance, AssemblyTable, EthernetIpInstances};
use crate::map::{MapElements, MapItem, ProcessDataMap};
use crate::types::*;
use crate::value::Scalar;
use log::*;
use serde::Deserialize;
use std::{fs, path::Path, str::FromStr};

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum ConfigScalar {
    Int(i64),
    Float(f64),
}

impl From<ConfigScalar> for Scalar {
    fn from(v: ConfigScalar) -> Self {
        match v {
            ConfigScalar::Int(i) => Scalar::Int(i),
            ConfigScalar::Float(f) => Scalar::Float(f),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Access {
    Get,
    Set,
    Nvs,
    WritePd,
    ReadPd,
}

fn descriptor(access: &[Access]) -> AdiDesc {
    access.iter().fold(AdiDesc::empty(), |desc, a| {
        desc | match a {
            Access::Get => AdiDesc::GET,
            Access::Set => AdiDesc::SET,
            Access::Nvs => AdiDesc::NVS,
            Access::WritePd => AdiDesc::WRITE_PD,
            Access::ReadPd => AdiDesc::READ_PD,
        }
    })
}

fn one() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldConfig {
    #[serde(default)]
    name: String,
    data_type: String,
    #[serde(default = "one")]
    elements: u8,
    access: Option<Vec<Access>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AdiConfig {
    instance: AdiInstance,
    #[serde(default)]
    name: String,
    data_type: Option<String>,
    elements: Option<u8>,
    #[serde(default)]
    access: Vec<Access>,
    min: Option<ConfigScalar>,
    max: Option<ConfigScalar>,
    default: Option<ConfigScalar>,
    #[serde(default)]
    fields: Vec<FieldConfig>,
}

impl AdiConfig {
    fn properties(&self, data_type: DataType) -> Option<AdiProperties> {
        if self.min.is_none() && self.max.is_none() && self.default.is_none() {
            return None;
        }
        let full = AdiProperties::for_type(data_type);
        let min = self.min.map_or(full.min, Scalar::from);
        let max = self.max.map_or(full.max, Scalar::from);
        let zero = Scalar::UInt(0);
        let fallback = if zero < min { min } else if zero > max { max } else { zero };
        let default = self.default.map_or(fallback, Scalar::from);
        Some(AdiProperties::new(min, max, default))
    }

    fn build(&self) -> Result<AdiEntry> {
        let desc = descriptor(&self.access);
        if !self.fields.is_empty() {
            if self.data_type.is_some() {
                return Err(Error::InvalidAdi {
                    adi: self.instance,
                    reason: "structured ADIs take their data types from the fields".into(),
                });
            }
            if self.elements.is_some() {
                return Err(Error::InvalidAdi {
                    adi: self.instance,
                    reason: "structured ADIs have one element per field".into(),
                });
            }
            let fields = self
                .fields
                .iter()
                .map(|f| -> Result<StructField> {
                    let field_desc = f.access.as_deref().map_or(desc, descriptor);
                    Ok(StructField::new(
                        f.name.clone(),
                        f.data_type.parse()?,
                        f.elements,
                        field_desc,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            let entry = AdiEntry::structured(self.instance, self.name.as_str(), desc, fields);
            if self.properties(DataType::Octet).is_some() {
                return Err(Error::InvalidAdi {
                    adi: self.instance,
                    reason: "structured ADIs cannot have value properties".into(),
                });
            }
            return Ok(entry);
        }
        let data_type: DataType = self
            .data_type
            .as_deref()
            .ok_or_else(|| Error::InvalidAdi {
                adi: self.instance,
                reason: "missing data_type".into(),
            })?
            .parse()?;
        let mut entry = AdiEntry::new(self.instance, self.name.as_str(), data_type, self.elements.unwrap_or(1), desc);
        entry.props = self.properties(data_type);
        Ok(entry)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct MapItemConfig {
    adi: AdiInstance,
    direction: PdDirection,
    elements: Option<u8>,
    #[serde(default)]
    start_index: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AsmItemConfig {
    adi: AdiInstance,
    elements: Option<u8>,
    #[serde(default)]
    start_index: u8,
}

fn map_elements(elements: Option<u8>) -> MapElements {
    elements.map_or(MapElements::All, MapElements::Count)
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum AsmFlag {
    Static,
    PdMappable,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssemblyConfig {
    name: String,
    direction: PdDirection,
    #[serde(default)]
    flags: Vec<AsmFlag>,
    map: Vec<AsmItemConfig>,
}

impl AssemblyConfig {
    fn build(&self) -> AssemblyInstance {
        let flags = self.flags.iter().fold(AsmFlags::empty(), |f, flag| {
            f | match flag {
                AsmFlag::Static => AsmFlags::STATIC,
                AsmFlag::PdMappable => AsmFlags::PD_MAPPABLE,
            }
        });
        let items = self
            .map
            .iter()
            .map(|i| MapItem::new(i.adi, self.direction, map_elements(i.elements), i.start_index))
            .collect();
        AssemblyInstance::new(self.name.as_str(), self.direction, flags, ProcessDataMap::new(items))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EthernetIpConfig {
    #[serde(default)]
    producing: Vec<u16>,
    #[serde(default)]
    consuming: Vec<u16>,
}

/// The raw application configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default, rename = "adi")]
    adis: Vec<AdiConfig>,
    #[serde(default)]
    default_map: Vec<MapItemConfig>,
    #[serde(default, rename = "assembly")]
    assemblies: Vec<AssemblyConfig>,
    ethernet_ip: Option<EthernetIpConfig>,
}

impl FromStr for AppConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("loading application config from {}", path.display());
        fs::read_to_string(path)?.parse()
    }

    /// Validates the configuration and builds the application's tables.
    pub fn build(&self) -> Result<Application> {
        let adis = AdiTable::new(
            self.adis
                .iter()
                .map(AdiConfig::build)
                .collect::<Result<Vec<_>>>()?,
        )?;
        let default_map = ProcessDataMap::new(
            self.default_map
                .iter()
                .map(|i| MapItem::new(i.adi, i.direction, map_elements(i.elements), i.start_index))
                .collect(),
        );
        default_map.validate(&adis)?;
        let assemblies = AssemblyTable::new(
            self.assemblies.iter().map(AssemblyConfig::build).collect(),
            &adis,
        )?;
        let ethernet_ip = match &self.ethernet_ip {
            Some(cfg) => {
                let eip = EthernetIpInstances {
                    producing: cfg.producing.clone(),
                    consuming: cfg.consuming.clone(),
                };
                eip.validate(&assemblies)?;
                Some(eip)
            }
            None => None,
        };
        info!(
            "application: {} ADI(s), {} default map item(s), {} assembly instance(s)",
            adis.len(),
            default_map.len(),
            assemblies.len()
        );
        Ok(Application {
            adis,
            default_map,
            assemblies,
            ethernet_ip,
        })
    }
}

/// Everything the application declares to the network interface.
#[derive(Debug, Clone)]
pub struct Application {
    pub adis: AdiTable,
    pub default_map: ProcessDataMap,
    pub assemblies: AssemblyTable,
    pub ethernet_ip: Option<EthernetIpInstances>,
}

impl Application {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        AppConfig::load(path)?.build()
    }
}

impl FromStr for Application {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<AppConfig>()?.build()
    }
}

#[cfg(test)]
const EXAMPLE: &str = r#"
[[adi]]
instance = 1
name = "SPEED"
data_type = "UINT16"
access = ["get", "write_pd"]
max = 3000

[[adi]]
instance = 2
name = "REF_SPEED"
data_type = "UINT16"
access = ["get", "set", "read_pd"]
min = 0
max = 3000
default = 0

[[adi]]
instance = 3
name = "STATUS"
access = ["get", "write_pd"]
fields = [
    { name = "running", data_type = "BIT1" },
    { name = "pad", data_type = "PAD7" },
    { name = "hours", data_type = "UINT32", access = ["get"] },
]

[[default_map]]
adi = 1
direction = "write"

[[default_map]]
adi = 3
direction = "write"
elements = 2

[[default_map]]
adi = 2
direction = "read"

[[assembly]]
name = "Speed only"
direction = "write"
flags = ["static", "pd_mappable"]
map = [{ adi = 1 }]

[ethernet_ip]
producing = [0x64]
"#;

#[test]
fn test_parse_example() {
    let app: Application = EXAMPLE.parse().unwrap();
    assert_eq!(app.adis.len(), 3);

    let speed = app.adis.get(1).unwrap();
    assert_eq!(speed.desc, AdiDesc::PD_OUT);
    let props = speed.properties().unwrap();
    assert_eq!(props.min, Scalar::UInt(0));
    assert_eq!(props.max, Scalar::UInt(3000));
    assert_eq!(props.default, Scalar::UInt(0));
    assert_eq!(app.adis.get(2).unwrap().desc, AdiDesc::PD_IN);

    let status = app.adis.find("STATUS").unwrap();
    assert!(status.is_struct());
    assert_eq!(status.fields[2].desc, AdiDesc::GET);
    assert_eq!(status.fields[1].data_type, DataType::Pad(7));

    assert_eq!(app.default_map.len(), 3);
    let layout = app.default_map.layout(&app.adis, PdDirection::Write).unwrap();
    assert_eq!(layout.size(), 3);
    assert_eq!(app.assemblies.select(PdDirection::Write, 0).unwrap().name, "Speed only");
    assert_eq!(app.ethernet_ip.unwrap().producing_attribute(), vec![0x64, 0x00]);
}

#[test]
fn test_config_errors() {
    let err = |s: &str| s.parse::<Application>().unwrap_err();

    assert!(matches!(err("[[adi]]\ninstance = 1\nbogus = 2\n"), Error::Config(_)));
    assert!(matches!(
        err("[[adi]]\ninstance = 1\ndata_type = \"UINT12\"\n"),
        Error::UnknownDataType(_)
    ));
    assert!(matches!(err("[[adi]]\ninstance = 1\n"), Error::InvalidAdi { adi: 1, .. }));
    assert!(matches!(
        err("[[adi]]\ninstance = 1\ndata_type = \"UINT8\"\nmax = 256\n"),
        Error::InvalidAdi { adi: 1, .. }
    ));
    assert!(matches!(
        err("[[default_map]]\nadi = 4\ndirection = \"read\"\n"),
        Error::UnknownAdi(4)
    ));
    // the hours field is not mappable
    let unmappable = EXAMPLE.replace("elements = 2", "elements = 3");
    assert!(matches!(err(&unmappable), Error::NotMappable { adi: 3, .. }));
    let counted = EXAMPLE.replace(
        "name = \"STATUS\"\n",
        "name = \"STATUS\"\nelements = 5\n",
    );
    assert!(matches!(err(&counted), Error::InvalidAdi { adi: 3, .. }));
    let eip = EXAMPLE.replace("producing = [0x64]", "producing = [0x64, 0x65]");
    assert!(matches!(err(&eip), Error::InstanceCount { given: 2, expected: 1, .. }));
}

#[test]
fn test_load_file() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(EXAMPLE.as_bytes()).unwrap();
    let app = Application::load(file.path()).unwrap();
    assert_eq!(app.adis.len(), 3);

    assert!(matches!(
        Application::load("/nonexistent/abcc.toml"),
        Err(Error::Io(_))
    ));
}
