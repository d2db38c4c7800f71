//! Object dictionaries loaded from device schema files.
//!
//! A dictionary records, per `index:subindex`, the declared data type,
//! access rights and default value. The gateway uses it to convert JSON
//! values to payload bytes; simulated nodes also use it as their object
//! store.

mod datatype;
mod eds;
mod value;

use std::collections::BTreeMap;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

pub use self::datatype::DataType;
pub use self::value::{ValueError, decode, encode};
pub(crate) use self::value::parse_integer;

const DICTIONARY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dictionary");

/// Read and write permissions of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    /// `ro`
    ReadOnly,
    /// `wo`
    WriteOnly,
    /// `rw`, `rwr` or `rww`
    ReadWrite,
    /// `const`
    Const,
}

impl AccessType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ro" => Some(Self::ReadOnly),
            "wo" => Some(Self::WriteOnly),
            "rw" | "rwr" | "rww" => Some(Self::ReadWrite),
            "const" => Some(Self::Const),
            _ => None,
        }
    }

    /// Whether clients may read the object.
    #[must_use]
    pub const fn readable(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    /// Whether clients may write the object.
    #[must_use]
    pub const fn writable(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// Default value text as written in the schema, possibly node relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultValue(String);

impl DefaultValue {
    fn new(text: String) -> Self {
        Self(text)
    }

    /// Raw schema text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One addressable object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object index.
    pub index: u16,
    /// Object subindex.
    pub subindex: u8,
    /// Parameter name; record members are prefixed with the record name.
    pub name: String,
    /// Declared data type.
    pub data_type: DataType,
    /// Access rights.
    pub access: AccessType,
    /// Schema default.
    pub default: Option<DefaultValue>,
    /// Whether the object may be mapped into process data.
    pub pdo_mappable: bool,
}

impl ObjectEntry {
    /// Encodes the default value for a node at address `node`.
    ///
    /// Numeric defaults may reference `$NODEID`, as in `$NODEID+0x180`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError`] when the default does not fit the data type.
    pub fn default_bytes(&self, node: u8) -> Result<Vec<u8>, ValueError> {
        let text = self.default.as_ref().map_or("", DefaultValue::as_str);
        let value = match self.data_type {
            DataType::VisibleString | DataType::UnicodeString => serde_json::Value::from(text),
            DataType::OctetString | DataType::Domain => {
                return Ok(hex_bytes(text).unwrap_or_else(|| text.as_bytes().to_vec()));
            }
            DataType::Real32 | DataType::Real64 => {
                serde_json::Value::from(text.trim().parse::<f64>().unwrap_or_default())
            }
            _ => serde_json::Value::from(node_relative(text, node).map_or_else(
                || text.to_owned(),
                |resolved| resolved.to_string(),
            )),
        };
        encode(&value, Some(self.data_type))
    }
}

fn node_relative(text: &str, node: u8) -> Option<i128> {
    if text.trim().is_empty() {
        return Some(0);
    }
    text.split('+').try_fold(0_i128, |sum, term| {
        let term = term.trim();
        let addend = if term.eq_ignore_ascii_case("$NODEID") {
            i128::from(node)
        } else {
            parse_integer(term)?
        };
        Some(sum + addend)
    })
}

fn hex_bytes(text: &str) -> Option<Vec<u8>> {
    let compact: String = text.chars().filter(|ch| !ch.is_whitespace()).collect();
    if compact.is_empty() || compact.len() % 2 != 0 {
        return None;
    }
    compact
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
        })
        .collect()
}

/// A node's object dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectDictionary {
    device_name: Option<String>,
    entries: BTreeMap<(u16, u8), ObjectEntry>,
}

impl ObjectDictionary {
    /// Parses EDS text. `origin` names the source in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Parse`] for malformed documents.
    pub fn from_eds(origin: &str, text: &str) -> Result<Self, SchemaError> {
        eds::parse(origin, text)
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, entry: ObjectEntry) {
        self.entries.insert((entry.index, entry.subindex), entry);
    }

    /// Looks up an entry.
    #[must_use]
    pub fn entry(&self, index: u16, subindex: u8) -> Option<&ObjectEntry> {
        self.entries.get(&(index, subindex))
    }

    /// Declared type of an entry.
    #[must_use]
    pub fn data_type(&self, index: u16, subindex: u8) -> Option<DataType> {
        self.entry(index, subindex).map(|entry| entry.data_type)
    }

    /// Iterates over entries in index order.
    pub fn entries(&self) -> impl Iterator<Item = &ObjectEntry> {
        self.entries.values()
    }

    /// Product name declared by the schema.
    #[must_use]
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Failures while resolving or parsing a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The reference was empty.
    #[error("schema reference must not be empty")]
    EmptyReference,
    /// The schema file could not be read.
    #[error("failed to read schema '{path}': {source}")]
    Read {
        /// Resolved path.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The schema text is malformed.
    #[error("invalid schema '{origin}' at line {line}: {message}")]
    Parse {
        /// Schema source.
        origin: String,
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },
}

/// Resolves schema references to dictionaries.
pub trait SchemaLoader: Send + Sync {
    /// Loads the dictionary named by `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the schema cannot be read or parsed.
    fn load(&self, reference: &str) -> Result<ObjectDictionary, SchemaError>;
}

/// Loads EDS files relative to a schema directory.
#[derive(Debug, Clone)]
pub struct SchemaDirectory {
    root: Utf8PathBuf,
}

impl SchemaDirectory {
    /// Resolves relative references against `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path a reference resolves to. Absolute references are kept as given.
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(reference.trim());
        if path.is_absolute() {
            path.to_owned()
        } else {
            self.root.join(path)
        }
    }
}

impl SchemaLoader for SchemaDirectory {
    fn load(&self, reference: &str) -> Result<ObjectDictionary, SchemaError> {
        if reference.trim().is_empty() {
            return Err(SchemaError::EmptyReference);
        }
        let path = self.resolve(reference);
        let text = fs::read_to_string(&path).map_err(|source| SchemaError::Read {
            path: path.clone(),
            source,
        })?;
        let dictionary = ObjectDictionary::from_eds(path.as_str(), &text)?;
        debug!(
            target: DICTIONARY_TARGET,
            path = %path,
            objects = dictionary.len(),
            "schema loaded"
        );
        Ok(dictionary)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case::plain("0x180", Some(0x180))]
    #[case::node_first("$NODEID+0x180", Some(0x185))]
    #[case::node_last("0x580 + $NODEID", Some(0x585))]
    #[case::empty("", Some(0))]
    #[case::junk("abc", None)]
    fn resolves_node_relative_expressions(#[case] text: &str, #[case] expected: Option<i128>) {
        assert_eq!(node_relative(text, 5), expected);
    }

    #[test]
    fn loads_relative_references_from_the_schema_directory() {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        fs::write(
            root.join("Tiny.eds"),
            "[1000]\nDataType=0x0007\nAccessType=ro\nDefaultValue=0x191\n",
        )
        .expect("write schema");

        let loader = SchemaDirectory::new(root);
        let dictionary = loader.load("Tiny.eds").expect("load");
        assert_eq!(dictionary.data_type(0x1000, 0), Some(DataType::Unsigned32));
    }

    #[test]
    fn missing_schema_reports_read_error() {
        let loader = SchemaDirectory::new("/nonexistent-schema-root");
        assert!(matches!(
            loader.load("Missing.eds"),
            Err(SchemaError::Read { .. })
        ));
    }

    #[test]
    fn empty_reference_is_rejected() {
        let loader = SchemaDirectory::new("eds");
        assert!(matches!(loader.load("  "), Err(SchemaError::EmptyReference)));
    }

    #[rstest]
    #[case::octets("0102FF", Some(vec![1, 2, 255]))]
    #[case::odd("012", None)]
    fn parses_hex_octets(#[case] text: &str, #[case] expected: Option<Vec<u8>>) {
        assert_eq!(hex_bytes(text), expected);
    }
}
