use log::debug;
use serde::Deserialize;

use crate::data::document::{
    OutputRecord, TagValue, ATTRIBUTE_ESCAPE_PREFIX, RESERVED_KEYS, TAG_ESCAPE_PREFIX,
};
use crate::data::osm::{Child, ElementKind, RawElement};
use crate::errors::{Error, Result};
use crate::etl::audit_streets::CorrectionTable;

/// Attributes gathered under `created`.
pub const CREATED: [&str; 5] = ["version", "changeset", "timestamp", "user", "uid"];

const ADDRESS_PREFIX: &str = "addr:";
const NAPTAN_PREFIX: &str = "naptan";

/// How `pos` is built when only some coordinates are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionMode {
    /// `pos` only when both `lat` and `lon` are present.
    #[default]
    Strict,
    /// A lone coordinate still yields `pos`, the missing slot left at 0.
    Legacy,
}

/// Where a tag ends up in the shaped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement<'a> {
    Address(&'a str),
    Naptan(&'a str),
    Scalar(&'a str),
}

/// Classifies a tag key. Depends on the key alone, never on tag order.
pub fn classify_tag_key(key: &str) -> Placement<'_> {
    if let Some(sub_key) = key.strip_prefix(ADDRESS_PREFIX) {
        if key.matches(':').count() < 2 {
            return Placement::Address(sub_key);
        }
    }
    if let Some(sub_key) = key.strip_prefix(NAPTAN_PREFIX) {
        return Placement::Naptan(sub_key);
    }
    Placement::Scalar(key)
}

/// `yes`/`no` in any case become booleans, everything else stays text.
pub fn coerce(value: &str) -> TagValue {
    if value.eq_ignore_ascii_case("yes") {
        TagValue::Bool(true)
    } else if value.eq_ignore_ascii_case("no") {
        TagValue::Bool(false)
    } else {
        TagValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShapeOptions {
    pub position_mode: PositionMode,
    /// Applied to `address.street` when set.
    pub street_corrections: Option<CorrectionTable>,
}

pub struct ElementShaper {
    options: ShapeOptions,
}

impl ElementShaper {
    pub fn new(options: ShapeOptions) -> Self {
        ElementShaper { options }
    }

    /// Shapes a node or way. Relations give `Ok(None)`.
    pub fn shape(&self, element: &RawElement) -> Result<Option<OutputRecord>> {
        if element.kind == ElementKind::Relation {
            return Ok(None);
        }

        let mut record = OutputRecord::new(element.kind);
        let mut lat: Option<f64> = None;
        let mut lon: Option<f64> = None;

        for (key, value) in &element.attributes {
            match key.as_str() {
                "lat" => lat = Some(parse_coordinate(element, key, value)?),
                "lon" => lon = Some(parse_coordinate(element, key, value)?),
                key if CREATED.contains(&key) => {
                    record.created.insert(key.to_string(), value.clone());
                }
                key if RESERVED_KEYS.contains(&key) => {
                    let escaped = format!("{}{}", ATTRIBUTE_ESCAPE_PREFIX, key);
                    record.fields.insert(escaped, TagValue::Text(value.clone()));
                }
                _ => {
                    record.fields.insert(key.clone(), TagValue::Text(value.clone()));
                }
            }
        }

        for child in &element.children {
            match child {
                Child::Tag { key, value } => match classify_tag_key(key) {
                    Placement::Address(sub_key) => {
                        record.address.insert(sub_key.to_string(), coerce(value));
                    }
                    Placement::Naptan(sub_key) => {
                        record.naptan.insert(sub_key.to_string(), coerce(value));
                    }
                    Placement::Scalar(key)
                        if RESERVED_KEYS.contains(&key) || element.attributes.contains_key(key) =>
                    {
                        let escaped = format!("{}{}", TAG_ESCAPE_PREFIX, key);
                        debug!(element_id = element.id(), key = key; "Escaped clashing tag key");
                        record.fields.insert(escaped, coerce(value));
                    }
                    Placement::Scalar(key) => {
                        record.fields.insert(key.to_string(), coerce(value));
                    }
                },
                Child::NodeRef { reference } => record.node_refs.push(reference.clone()),
            }
        }

        record.pos = self.position(lat, lon);
        self.correct_street(&mut record);
        Ok(Some(record))
    }

    fn position(&self, lat: Option<f64>, lon: Option<f64>) -> Option<[f64; 2]> {
        let pos = match self.options.position_mode {
            PositionMode::Strict => [lat?, lon?],
            PositionMode::Legacy => {
                if lat.is_none() && lon.is_none() {
                    return None;
                }
                [lat.unwrap_or(0.0), lon.unwrap_or(0.0)]
            }
        };
        if pos == [0.0, 0.0] {
            None
        } else {
            Some(pos)
        }
    }

    fn correct_street(&self, record: &mut OutputRecord) {
        let Some(table) = &self.options.street_corrections else {
            return;
        };
        let Some(TagValue::Text(street)) = record.address.get("street") else {
            return;
        };
        if let Some(corrected) = table.normalize(street) {
            debug!(from = street.as_str(), to = corrected.as_str(); "Corrected street name");
            record.address.insert("street".to_string(), TagValue::Text(corrected));
        }
    }
}

fn parse_coordinate(element: &RawElement, field: &str, value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(coordinate) if coordinate.is_finite() => Ok(coordinate),
        _ => Err(Error::InvalidField {
            field: field.to_string(),
            element_id: element.id().to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn shaper() -> ElementShaper {
        ElementShaper::new(ShapeOptions::default())
    }

    fn legacy_shaper() -> ElementShaper {
        ElementShaper::new(ShapeOptions {
            position_mode: PositionMode::Legacy,
            ..ShapeOptions::default()
        })
    }

    fn shape_json(shaper: &ElementShaper, element: &RawElement) -> serde_json::Value {
        let record = shaper.shape(element).unwrap().unwrap();
        serde_json::to_value(&record).unwrap()
    }

    #[test]
    fn coerce_is_case_insensitive() {
        assert_eq!(coerce("YES"), TagValue::Bool(true));
        assert_eq!(coerce("yes"), coerce("YES"));
        assert_eq!(coerce("No"), TagValue::Bool(false));
        assert_eq!(coerce("nope"), TagValue::Text("nope".into()));
        assert_eq!(coerce(""), TagValue::Text(String::new()));
    }

    #[test]
    fn classify_keys() {
        assert_eq!(classify_tag_key("addr:street"), Placement::Address("street"));
        assert_eq!(classify_tag_key("addr:street:name"), Placement::Scalar("addr:street:name"));
        assert_eq!(classify_tag_key("naptan:AtcoCode"), Placement::Naptan(":AtcoCode"));
        assert_eq!(classify_tag_key("naptanCode"), Placement::Naptan("Code"));
        assert_eq!(classify_tag_key("highway"), Placement::Scalar("highway"));
        assert_eq!(classify_tag_key("source:addr"), Placement::Scalar("source:addr"));
    }

    #[test]
    fn shapes_node_with_full_field_policy() {
        let element = RawElement::new(ElementKind::Node)
            .with_attribute("id", "261114295")
            .with_attribute("lat", "53.8")
            .with_attribute("lon", "-1.5")
            .with_attribute("version", "7")
            .with_attribute("changeset", "11129782")
            .with_attribute("timestamp", "2012-03-28T18:31:23Z")
            .with_attribute("user", "bbmiller")
            .with_attribute("uid", "451048")
            .with_tag("addr:street", "Kirkgate")
            .with_tag("addr:postcode", "LS1 6BY")
            .with_tag("naptan:AtcoCode", "450010")
            .with_tag("amenity", "pub")
            .with_tag("wheelchair", "Yes");

        assert_eq!(
            shape_json(&shaper(), &element),
            json!({
                "type": "node",
                "id": "261114295",
                "amenity": "pub",
                "wheelchair": true,
                "created": {
                    "version": "7",
                    "changeset": "11129782",
                    "timestamp": "2012-03-28T18:31:23Z",
                    "user": "bbmiller",
                    "uid": "451048",
                },
                "pos": [53.8, -1.5],
                "address": {"street": "Kirkgate", "postcode": "LS1 6BY"},
                "naptan": {":AtcoCode": "450010"},
            })
        );
    }

    #[test]
    fn way_keeps_node_ref_order() {
        let element = RawElement::new(ElementKind::Way)
            .with_attribute("id", "10")
            .with_node_ref("1")
            .with_tag("highway", "residential")
            .with_node_ref("2")
            .with_node_ref("3");

        let record = shaper().shape(&element).unwrap().unwrap();
        assert_eq!(record.node_refs, vec!["1", "2", "3"]);
        assert_eq!(record.pos, None);
    }

    #[test]
    fn plain_tags_become_scalars() {
        let element = RawElement::new(ElementKind::Node)
            .with_tag("name", "Corn Exchange")
            .with_tag("shop", "mall")
            .with_tag("source:name", "survey");

        let record = shaper().shape(&element).unwrap().unwrap();
        for (key, value) in element.tags() {
            assert_eq!(record.get(key), Some(&TagValue::from(value)), "{key}");
        }
        assert!(record.address.is_empty());
        assert!(record.naptan.is_empty());
    }

    #[test]
    fn later_tag_wins() {
        let element = RawElement::new(ElementKind::Node)
            .with_tag("name", "First")
            .with_tag("name", "Second");

        let record = shaper().shape(&element).unwrap().unwrap();
        assert_eq!(record.get("name"), Some(&TagValue::from("Second")));
    }

    #[test]
    fn no_coordinates_means_no_pos() {
        let element = RawElement::new(ElementKind::Way).with_attribute("id", "3");
        let value = shape_json(&shaper(), &element);
        assert!(value.get("pos").is_none());
    }

    #[test]
    fn single_coordinate_depends_on_mode() {
        let element = RawElement::new(ElementKind::Node).with_attribute("lat", "53.8");

        assert_eq!(shaper().shape(&element).unwrap().unwrap().pos, None);
        assert_eq!(legacy_shaper().shape(&element).unwrap().unwrap().pos, Some([53.8, 0.0]));
    }

    #[test]
    fn zero_position_is_dropped() {
        let element = RawElement::new(ElementKind::Node)
            .with_attribute("lat", "0")
            .with_attribute("lon", "0.0");

        assert_eq!(shaper().shape(&element).unwrap().unwrap().pos, None);
        assert_eq!(legacy_shaper().shape(&element).unwrap().unwrap().pos, None);
    }

    #[test]
    fn bad_coordinate_is_recoverable() {
        let element = RawElement::new(ElementKind::Node)
            .with_attribute("id", "77")
            .with_attribute("lat", "fifty-three")
            .with_attribute("lon", "-1.5");

        let err = shaper().shape(&element).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("77"));
    }

    #[test]
    fn relations_are_not_shaped() {
        let element = RawElement::new(ElementKind::Relation).with_tag("type", "multipolygon");
        assert_eq!(shaper().shape(&element).unwrap(), None);
    }

    #[test]
    fn attributes_are_never_coerced() {
        let element = RawElement::new(ElementKind::Node).with_attribute("user", "yes");
        let record = shaper().shape(&element).unwrap().unwrap();
        assert_eq!(record.created["user"], "yes");
    }

    #[test]
    fn clashing_tag_does_not_replace_group() {
        let element = RawElement::new(ElementKind::Node)
            .with_attribute("version", "1")
            .with_tag("created", "1999");

        let value = shape_json(&shaper(), &element);
        assert_eq!(value["created"], json!({"version": "1"}));
        assert_eq!(value["tag:created"], "1999");
    }

    #[test]
    fn type_and_id_tags_are_kept_apart_from_the_element() {
        let element = RawElement::new(ElementKind::Way)
            .with_attribute("id", "1")
            .with_tag("type", "multipolygon")
            .with_tag("id", "other")
            .with_tag("name", "Roundhay Park");

        assert_eq!(
            shape_json(&shaper(), &element),
            json!({
                "type": "way",
                "id": "1",
                "tag:type": "multipolygon",
                "tag:id": "other",
                "name": "Roundhay Park",
            })
        );
    }

    #[test]
    fn naptan_keys_with_and_without_colon_stay_distinct() {
        let element = RawElement::new(ElementKind::Node)
            .with_tag("naptan:Code", "A")
            .with_tag("naptanCode", "B");

        let record = shaper().shape(&element).unwrap().unwrap();
        assert_eq!(record.naptan.len(), 2);
        assert_eq!(record.naptan[":Code"], TagValue::from("A"));
        assert_eq!(record.naptan["Code"], TagValue::from("B"));
    }

    #[test]
    fn street_corrections_are_opt_in() {
        let element = RawElement::new(ElementKind::Node).with_tag("addr:street", "Kirkgate Rd.");
        let table = CorrectionTable::new(vec![("Rd.".to_string(), "Road".to_string())]);

        let plain = shaper().shape(&element).unwrap().unwrap();
        assert_eq!(plain.address["street"], TagValue::from("Kirkgate Rd."));

        let correcting = ElementShaper::new(ShapeOptions {
            street_corrections: Some(table),
            ..ShapeOptions::default()
        });
        let corrected = correcting.shape(&element).unwrap().unwrap();
        assert_eq!(corrected.address["street"], TagValue::from("Kirkgate Road"));
    }
}
