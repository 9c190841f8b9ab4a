use std::collections::BTreeMap;

/// Top-level element types found under the `<osm>` root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

impl ElementKind {
    pub const ALL: [ElementKind; 3] = [ElementKind::Node, ElementKind::Way, ElementKind::Relation];

    pub fn from_tag(name: &[u8]) -> Option<ElementKind> {
        match name {
            b"node" => Some(ElementKind::Node),
            b"way" => Some(ElementKind::Way),
            b"relation" => Some(ElementKind::Relation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Way => "way",
            ElementKind::Relation => "relation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    /// `<tag k="..." v="..."/>`
    Tag { key: String, value: String },
    /// `<nd ref="..."/>`, only meaningful inside a way.
    NodeRef { reference: String },
}

/// One node, way or relation with its attributes and direct children.
///
/// Produced by the element stream and dropped once shaped or audited, so only
/// one of these is alive at a time no matter how large the source is.
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    pub kind: ElementKind,
    pub attributes: BTreeMap<String, String>,
    pub children: Vec<Child>,
}

impl RawElement {
    pub fn new(kind: ElementKind) -> Self {
        RawElement {
            kind,
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// The `id` attribute, or `"?"` when the element has none.
    pub fn id(&self) -> &str {
        self.attributes.get("id").map(String::as_str).unwrap_or("?")
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.children.iter().filter_map(|child| match child {
            Child::Tag { key, value } => Some((key.as_str(), value.as_str())),
            Child::NodeRef { .. } => None,
        })
    }

    /// Values of every tag whose key is exactly `key`, in source order.
    pub fn tag_values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags()
            .filter(move |(tag_key, _)| *tag_key == key)
            .map(|(_, value)| value)
    }

    pub fn node_refs(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|child| match child {
            Child::NodeRef { reference } => Some(reference.as_str()),
            Child::Tag { .. } => None,
        })
    }

    pub fn with_attribute(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.children.push(Child::Tag {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn with_node_ref(mut self, reference: &str) -> Self {
        self.children.push(Child::NodeRef {
            reference: reference.to_string(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_tag_name() {
        assert_eq!(ElementKind::from_tag(b"way"), Some(ElementKind::Way));
        assert_eq!(ElementKind::from_tag(b"bounds"), None);
        assert_eq!(ElementKind::Relation.as_str(), "relation");
    }

    #[test]
    fn tag_values_keep_source_order() {
        let element = RawElement::new(ElementKind::Node)
            .with_tag("addr:street", "Kirkgate")
            .with_tag("name", "Market")
            .with_tag("addr:street", "Briggate");

        let streets: Vec<&str> = element.tag_values("addr:street").collect();
        assert_eq!(streets, vec!["Kirkgate", "Briggate"]);
        assert_eq!(element.id(), "?");
    }
}
