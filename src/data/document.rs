use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::osm::ElementKind;

/// Record keys owned by the record structure itself. Tags can't claim them.
pub const RESERVED_KEYS: [&str; 6] = ["type", "created", "pos", "address", "naptan", "node_refs"];

/// Prefix for tags whose key is reserved or already taken by an attribute.
pub const TAG_ESCAPE_PREFIX: &str = "tag:";
/// Prefix for attributes whose name is reserved.
pub const ATTRIBUTE_ESCAPE_PREFIX: &str = "attr:";

/// A tag value after yes/no coercion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Text(String),
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(text) => Some(text),
            TagValue::Bool(_) => None,
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

/// One shaped node or way, ready to be written as a JSON document.
///
/// Serialized as a flat object: `type` (taken from `kind`) first, then the
/// scalar fields in key order, then the `created`, `pos`, `address`,
/// `naptan` and `node_refs` groups. Empty groups are not written. A field
/// stored under a reserved key is never written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub kind: ElementKind,
    pub fields: BTreeMap<String, TagValue>,
    pub created: BTreeMap<String, String>,
    /// `[lat, lon]`
    pub pos: Option<[f64; 2]>,
    pub address: BTreeMap<String, TagValue>,
    pub naptan: BTreeMap<String, TagValue>,
    pub node_refs: Vec<String>,
}

impl OutputRecord {
    pub fn new(kind: ElementKind) -> Self {
        OutputRecord {
            kind,
            fields: BTreeMap::new(),
            created: BTreeMap::new(),
            pos: None,
            address: BTreeMap::new(),
            naptan: BTreeMap::new(),
            node_refs: Vec::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.fields.get(key)
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get("id").and_then(TagValue::as_text)
    }
}

impl Serialize for OutputRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.kind.as_str())?;
        let scalars = self
            .fields
            .iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()));
        for (key, value) in scalars {
            map.serialize_entry(key, value)?;
        }
        if !self.created.is_empty() {
            map.serialize_entry("created", &self.created)?;
        }
        if let Some(pos) = &self.pos {
            map.serialize_entry("pos", pos)?;
        }
        if !self.address.is_empty() {
            map.serialize_entry("address", &self.address)?;
        }
        if !self.naptan.is_empty() {
            map.serialize_entry("naptan", &self.naptan)?;
        }
        if !self.node_refs.is_empty() {
            map.serialize_entry("node_refs", &self.node_refs)?;
        }
        map.end()
    }
}
