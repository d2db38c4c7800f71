//! Electronic data sheet (EDS) parser.
//!
//! EDS files are INI documents. Objects appear as `[1017]` sections; records
//! and arrays list their members as `[1018sub1]` sections. Only the keys the
//! gateway needs are read: `ParameterName`, `ObjectType`, `DataType`,
//! `AccessType`, `DefaultValue` and `PDOMapping`.

use std::collections::HashMap;

use tracing::debug;

use super::value::parse_integer;
use super::{AccessType, DataType, DefaultValue, ObjectDictionary, ObjectEntry, SchemaError};
use crate::dictionary::DICTIONARY_TARGET;

const OBJECT_DOMAIN: i128 = 0x2;
const OBJECT_VAR: i128 = 0x7;
const OBJECT_ARRAY: i128 = 0x8;
const OBJECT_RECORD: i128 = 0x9;

struct Section {
    name: String,
    line: usize,
    keys: HashMap<String, String>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.keys.get(key).map(String::as_str)
    }
}

enum SectionKind {
    Object(u16),
    SubObject(u16, u8),
    Other,
}

/// Parses EDS text. `origin` names the source in error messages.
pub(super) fn parse(origin: &str, text: &str) -> Result<ObjectDictionary, SchemaError> {
    let sections = split_sections(origin, text)?;
    let mut dictionary = ObjectDictionary::default();
    let mut parents: HashMap<u16, String> = HashMap::new();

    for section in &sections {
        if section.name.eq_ignore_ascii_case("DeviceInfo") {
            dictionary.device_name = section.get("productname").map(str::to_owned);
            continue;
        }
        let SectionKind::Object(index) = classify(&section.name) else {
            continue;
        };
        let object_type = match section.get("objecttype") {
            Some(raw) => number(origin, section, "ObjectType", raw)?,
            None => OBJECT_VAR,
        };
        let name = section.get("parametername").unwrap_or_default().to_owned();
        match object_type {
            OBJECT_VAR | OBJECT_DOMAIN => {
                dictionary.insert(entry(origin, section, index, 0, name, object_type)?);
            }
            OBJECT_ARRAY | OBJECT_RECORD => {
                parents.insert(index, name);
            }
            // Type definitions are not addressable objects.
            _ => {}
        }
    }

    for section in &sections {
        let SectionKind::SubObject(index, subindex) = classify(&section.name) else {
            continue;
        };
        let Some(parent) = parents.get(&index) else {
            debug!(
                target: DICTIONARY_TARGET,
                origin,
                section = %section.name,
                "sub-object without a record or array parent skipped"
            );
            continue;
        };
        let member = section.get("parametername").unwrap_or_default();
        let name = format!("{parent}.{member}");
        dictionary.insert(entry(origin, section, index, subindex, name, OBJECT_VAR)?);
    }

    Ok(dictionary)
}

fn split_sections(origin: &str, text: &str) -> Result<Vec<Section>, SchemaError> {
    let mut sections: Vec<Section> = Vec::new();
    for (position, raw_line) in text.lines().enumerate() {
        let line_number = position + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[') {
            let name = header.strip_suffix(']').ok_or_else(|| SchemaError::Parse {
                origin: origin.to_owned(),
                line: line_number,
                message: format!("unterminated section header '{line}'"),
            })?;
            sections.push(Section {
                name: name.trim().to_owned(),
                line: line_number,
                keys: HashMap::new(),
            });
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(SchemaError::Parse {
                origin: origin.to_owned(),
                line: line_number,
                message: format!("expected 'key=value', found '{line}'"),
            });
        };
        let Some(section) = sections.last_mut() else {
            return Err(SchemaError::Parse {
                origin: origin.to_owned(),
                line: line_number,
                message: "key outside of any section".to_owned(),
            });
        };
        section
            .keys
            .insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }
    Ok(sections)
}

fn classify(name: &str) -> SectionKind {
    let lower = name.to_ascii_lowercase();
    if let Some((index, subindex)) = lower.split_once("sub") {
        return match (parse_hex_u16(index), u8::from_str_radix(subindex, 16)) {
            (Some(index), Ok(subindex)) => SectionKind::SubObject(index, subindex),
            _ => SectionKind::Other,
        };
    }
    parse_hex_u16(&lower).map_or(SectionKind::Other, SectionKind::Object)
}

fn parse_hex_u16(text: &str) -> Option<u16> {
    if text.len() != 4 {
        return None;
    }
    u16::from_str_radix(text, 16).ok()
}

fn entry(
    origin: &str,
    section: &Section,
    index: u16,
    subindex: u8,
    name: String,
    object_type: i128,
) -> Result<ObjectEntry, SchemaError> {
    let data_type = match section.get("datatype") {
        Some(raw) => {
            let code = number(origin, section, "DataType", raw)?;
            u16::try_from(code)
                .ok()
                .and_then(DataType::from_code)
                .unwrap_or(DataType::Domain)
        }
        None if object_type == OBJECT_DOMAIN => DataType::Domain,
        None => {
            return Err(SchemaError::Parse {
                origin: origin.to_owned(),
                line: section.line,
                message: format!("section [{}] has no DataType", section.name),
            });
        }
    };
    let access = match section.get("accesstype") {
        Some(raw) => AccessType::parse(raw).ok_or_else(|| SchemaError::Parse {
            origin: origin.to_owned(),
            line: section.line,
            message: format!("section [{}] has unknown AccessType '{raw}'", section.name),
        })?,
        None => AccessType::ReadWrite,
    };
    let default = section
        .get("defaultvalue")
        .filter(|text| !text.is_empty())
        .map(|text| DefaultValue::new(text.to_owned()));
    let pdo_mappable = section
        .get("pdomapping")
        .and_then(parse_integer)
        .is_some_and(|flag| flag != 0);
    Ok(ObjectEntry {
        index,
        subindex,
        name,
        data_type,
        access,
        default,
        pdo_mappable,
    })
}

fn number(origin: &str, section: &Section, key: &str, raw: &str) -> Result<i128, SchemaError> {
    parse_integer(raw).ok_or_else(|| SchemaError::Parse {
        origin: origin.to_owned(),
        line: section.line,
        message: format!("section [{}] has non-numeric {key} '{raw}'", section.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
; sample device
[DeviceInfo]
ProductName=Sample

[1017]
ParameterName=Producer heartbeat time
ObjectType=0x7
DataType=0x0006
AccessType=rw
DefaultValue=0
PDOMapping=0

[1018]
ParameterName=Identity object
ObjectType=0x9
SubNumber=2

[1018sub0]
ParameterName=Highest sub-index supported
DataType=0x0005
AccessType=const
DefaultValue=1

[1018sub1]
ParameterName=Vendor-ID
DataType=0x0007
AccessType=ro
DefaultValue=0x00000360

[1400]
ParameterName=RPDO communication parameter
ObjectType=0x9

[1400sub1]
ParameterName=COB-ID
DataType=0x0007
AccessType=rw
DefaultValue=$NODEID+0x200
";

    #[test]
    fn parses_variables_and_records() {
        let dictionary = parse("sample.eds", SAMPLE).expect("parse");
        assert_eq!(dictionary.device_name(), Some("Sample"));
        assert_eq!(dictionary.data_type(0x1017, 0), Some(DataType::Unsigned16));
        assert_eq!(dictionary.data_type(0x1018, 1), Some(DataType::Unsigned32));
        let vendor = dictionary.entry(0x1018, 1).expect("vendor entry");
        assert_eq!(vendor.name, "Identity object.Vendor-ID");
        assert_eq!(vendor.access, AccessType::ReadOnly);
        assert_eq!(dictionary.len(), 4);
    }

    #[test]
    fn resolves_node_relative_defaults() {
        let dictionary = parse("sample.eds", SAMPLE).expect("parse");
        let cob_id = dictionary.entry(0x1400, 1).expect("cob id");
        let bytes = cob_id.default_bytes(3).expect("default");
        assert_eq!(bytes, 0x203_u32.to_le_bytes().to_vec());
    }

    #[test]
    fn reports_line_of_malformed_entries() {
        let error = parse("broken.eds", "[1000]\nDataType\n").expect_err("should fail");
        assert!(matches!(error, SchemaError::Parse { line: 2, .. }));
    }

    #[test]
    fn rejects_variables_without_type() {
        let error = parse("broken.eds", "[1000]\nParameterName=Device type\n").expect_err("fail");
        assert!(matches!(error, SchemaError::Parse { line: 1, .. }));
    }
}
