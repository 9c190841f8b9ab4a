pub mod document;
pub mod osm;

pub use self::document::{OutputRecord, TagValue};
pub use self::osm::{Child, ElementKind, RawElement};
