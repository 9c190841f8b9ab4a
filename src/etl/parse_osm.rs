use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str;

use log::{debug, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::data::osm::{Child, ElementKind, RawElement};
use crate::errors::{Error, Result};

/// Opens an .osm file, decompressing on the fly when it ends in `.xz`.
pub fn open_osm_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = fs::File::open(path)?;
    let file_reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "xz") {
        let xz_reader = XzDecoder::new(file_reader);
        Ok(Box::new(BufReader::new(xz_reader)))
    } else {
        Ok(Box::new(file_reader))
    }
}

/// Forward-only iterator over the top-level elements of an OSM document.
///
/// Each element is read in full (attributes plus direct `tag`/`nd` children)
/// and handed out by value; the event buffer is cleared after every event, so
/// memory use is bounded by the largest single element. Elements of kinds not
/// asked for are skipped without being materialized.
///
/// Per-element problems (a `tag` without `k`, an `nd` without `ref`) are
/// yielded as recoverable errors and the stream carries on. Markup errors are
/// fatal: they are yielded once and the stream ends.
pub struct ElementStream<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    kinds: Vec<ElementKind>,
    depth: usize,
    finished: bool,
}

enum Step {
    Continue,
    Emit(RawElement),
    Open(RawElement),
    Skip(Vec<u8>),
    Done,
}

impl ElementStream<Box<dyn BufRead>> {
    pub fn open(path: &Path, kinds: &[ElementKind]) -> Result<Self> {
        Ok(ElementStream::new(open_osm_reader(path)?, kinds))
    }
}

impl<R: BufRead> ElementStream<R> {
    pub fn new(source: R, kinds: &[ElementKind]) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);

        ElementStream {
            reader,
            buf: Vec::new(),
            kinds: kinds.to_vec(),
            depth: 0,
            finished: false,
        }
    }

    pub fn all(source: R) -> Self {
        ElementStream::new(source, &ElementKind::ALL)
    }

    fn next_element(&mut self) -> Result<Option<RawElement>> {
        loop {
            let step = {
                let event = match self.reader.read_event_into(&mut self.buf) {
                    Ok(event) => event,
                    Err(err) => return Err(xml_error(err, self.reader.buffer_position())),
                };
                match event {
                    Event::Eof => {
                        if self.depth > 0 {
                            return Err(Error::malformed(
                                self.reader.buffer_position(),
                                format!("document ended with {} unclosed element(s)", self.depth),
                            ));
                        }
                        Step::Done
                    }
                    Event::Start(e) if self.depth == 1 => {
                        let name = e.name().as_ref().to_vec();
                        let position = self.reader.buffer_position();
                        match wanted_kind(&self.kinds, &name) {
                            Some(kind) => Step::Open(start_element(kind, &e, position)?),
                            None => Step::Skip(name),
                        }
                    }
                    Event::Start(_) => {
                        self.depth += 1;
                        Step::Continue
                    }
                    Event::Empty(e) if self.depth == 1 => {
                        let position = self.reader.buffer_position();
                        match wanted_kind(&self.kinds, e.name().as_ref()) {
                            Some(kind) => Step::Emit(start_element(kind, &e, position)?),
                            None => Step::Continue,
                        }
                    }
                    Event::End(_) => {
                        self.depth = self.depth.saturating_sub(1);
                        Step::Continue
                    }
                    // Declarations, comments and stray text carry nothing we shape.
                    _ => Step::Continue,
                }
            };
            self.buf.clear();

            match step {
                Step::Continue => (),
                Step::Done => return Ok(None),
                Step::Emit(element) => return Ok(Some(element)),
                Step::Open(element) => return self.read_children(element).map(Some),
                Step::Skip(name) => {
                    debug!(element = str::from_utf8(&name).unwrap_or("?"); "Skipping element");
                    let skipped = self.reader.read_to_end_into(QName(&name), &mut self.buf);
                    self.buf.clear();
                    if let Err(err) = skipped {
                        return Err(xml_error(err, self.reader.buffer_position()));
                    }
                }
            }
        }
    }

    /// Reads the body of an element opened with a start tag, up to and
    /// including its end tag. Only direct children are kept.
    fn read_children(&mut self, mut element: RawElement) -> Result<RawElement> {
        let mut nested = 0usize;
        let mut missing: Option<Error> = None;

        loop {
            let position = self.reader.buffer_position();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(err) => return Err(xml_error(err, self.reader.buffer_position())),
            };
            let closed = match event {
                Event::Eof => {
                    return Err(Error::malformed(
                        position,
                        format!(
                            "unterminated <{}> element {}",
                            element.kind.as_str(),
                            element.id()
                        ),
                    ));
                }
                Event::Start(e) => {
                    if nested == 0 {
                        read_child(&mut element, &e, position, &mut missing)?;
                    }
                    nested += 1;
                    false
                }
                Event::Empty(e) => {
                    if nested == 0 {
                        read_child(&mut element, &e, position, &mut missing)?;
                    }
                    false
                }
                Event::End(_) if nested == 0 => true,
                Event::End(_) => {
                    nested -= 1;
                    false
                }
                _ => false,
            };
            self.buf.clear();
            if closed {
                break;
            }
        }

        match missing {
            Some(err) => Err(err),
            None => Ok(element),
        }
    }
}

impl<R: BufRead> Iterator for ElementStream<R> {
    type Item = Result<RawElement>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_element() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                if !err.is_recoverable() {
                    self.finished = true;
                }
                Some(Err(err))
            }
        }
    }
}

/// Unwraps a stream item for consumers that skip bad elements: recoverable
/// errors are logged and turned into `None`, fatal ones are passed on.
pub fn skip_recoverable(item: Result<RawElement>) -> Result<Option<RawElement>> {
    match item {
        Ok(element) => Ok(Some(element)),
        Err(err) if err.is_recoverable() => {
            warn!(err = err.to_string().as_str(); "Skipping element");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn xml_error(err: quick_xml::Error, position: usize) -> Error {
    match err {
        quick_xml::Error::Io(_) => err.into(),
        other => Error::malformed(position, other.to_string()),
    }
}

fn wanted_kind(kinds: &[ElementKind], name: &[u8]) -> Option<ElementKind> {
    ElementKind::from_tag(name).filter(|kind| kinds.contains(kind))
}

fn read_attributes(el: &BytesStart, position: usize) -> Result<BTreeMap<String, String>> {
    let mut attributes = BTreeMap::new();
    for attribute_res in el.attributes() {
        let attribute = attribute_res.map_err(|err| Error::malformed(position, err.to_string()))?;
        let key = str::from_utf8(attribute.key.as_ref())
            .map_err(|err| Error::malformed(position, err.to_string()))?;
        let value = attribute
            .unescape_value()
            .map_err(|err| Error::malformed(position, err.to_string()))?;
        attributes.insert(key.to_string(), value.into_owned());
    }
    Ok(attributes)
}

fn start_element(kind: ElementKind, el: &BytesStart, position: usize) -> Result<RawElement> {
    let mut element = RawElement::new(kind);
    element.attributes = read_attributes(el, position)?;
    Ok(element)
}

fn read_child(
    element: &mut RawElement,
    el: &BytesStart,
    position: usize,
    missing: &mut Option<Error>,
) -> Result<()> {
    let child = match el.name().as_ref() {
        b"tag" => {
            let mut attributes = read_attributes(el, position)?;
            match (attributes.remove("k"), attributes.remove("v")) {
                (Some(key), Some(value)) => Some(Child::Tag { key, value }),
                (None, _) => missing_field(element, "k", missing),
                (_, None) => missing_field(element, "v", missing),
            }
        }
        b"nd" => {
            let mut attributes = read_attributes(el, position)?;
            match attributes.remove("ref") {
                Some(reference) => Some(Child::NodeRef { reference }),
                None => missing_field(element, "ref", missing),
            }
        }
        // Relation members and anything else are not shaped.
        _ => None,
    };
    if let Some(child) = child {
        element.children.push(child);
    }
    Ok(())
}

fn missing_field(element: &RawElement, field: &str, missing: &mut Option<Error>) -> Option<Child> {
    if missing.is_none() {
        *missing = Some(Error::MissingField {
            field: field.to_string(),
            element_id: element.id().to_string(),
        });
    }
    None
}
