use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{info, warn};

use crate::data::document::OutputRecord;
use crate::data::osm::{ElementKind, RawElement};
use crate::errors::Result;
use crate::etl::parse_osm::ElementStream;
use crate::etl::shape::ElementShaper;
use crate::etl::Etl;
use crate::UserConfig;

pub const ETL_NAME: &str = "shape_osm";

pub type Elements = Box<dyn Iterator<Item = Result<RawElement>>>;

/// Lazily shapes a stream of elements. Relations are skipped silently; errors
/// from the stream or the shaper are passed through for the caller to judge.
pub struct ShapedRecords<I> {
    elements: I,
    shaper: ElementShaper,
    relations_skipped: usize,
}

impl<I> ShapedRecords<I>
where
    I: Iterator<Item = Result<RawElement>>,
{
    pub fn new(elements: I, shaper: ElementShaper) -> Self {
        ShapedRecords {
            elements,
            shaper,
            relations_skipped: 0,
        }
    }

    pub fn relations_skipped(&self) -> usize {
        self.relations_skipped
    }
}

impl<I> Iterator for ShapedRecords<I>
where
    I: Iterator<Item = Result<RawElement>>,
{
    type Item = Result<OutputRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let element = match self.elements.next()? {
                Ok(element) => element,
                Err(err) => return Some(Err(err)),
            };
            match self.shaper.shape(&element) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => self.relations_skipped += 1,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShapeSummary {
    pub written: usize,
    pub rejected: usize,
    pub relations_skipped: usize,
}

/// Writes records as newline-delimited JSON, or indented JSON documents
/// separated by newlines when `pretty` is set. Bad elements are logged and
/// counted; a fatal error stops the run.
pub fn write_records<I, W>(
    mut records: ShapedRecords<I>,
    writer: &mut W,
    pretty: bool,
) -> Result<ShapeSummary>
where
    I: Iterator<Item = Result<RawElement>>,
    W: Write,
{
    let mut summary = ShapeSummary::default();
    for item in records.by_ref() {
        let record = match item {
            Ok(record) => record,
            Err(err) if err.is_recoverable() => {
                warn!(etl_name = ETL_NAME, err = err.to_string().as_str(); "Skipping element");
                summary.rejected += 1;
                continue;
            }
            Err(err) => return Err(err),
        };
        if pretty {
            serde_json::to_writer_pretty(&mut *writer, &record)?;
        } else {
            serde_json::to_writer(&mut *writer, &record)?;
        }
        writer.write_all(b"\n")?;
        summary.written += 1;
    }
    writer.flush()?;
    summary.relations_skipped = records.relations_skipped();
    Ok(summary)
}

/// Shapes everything in memory, with the same skipping rules as
/// [`write_records`]. Meant for small inputs.
pub fn collect_records<I>(records: ShapedRecords<I>) -> Result<Vec<OutputRecord>>
where
    I: Iterator<Item = Result<RawElement>>,
{
    let mut shaped = Vec::new();
    for item in records {
        match item {
            Ok(record) => shaped.push(record),
            Err(err) if err.is_recoverable() => {
                warn!(etl_name = ETL_NAME, err = err.to_string().as_str(); "Skipping element");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(shaped)
}

pub struct ShapeOsmEtl<'a> {
    config: &'a UserConfig,
}

impl<'a> ShapeOsmEtl<'a> {
    pub fn new(config: &'a UserConfig) -> Self {
        ShapeOsmEtl { config }
    }
}

impl Etl for ShapeOsmEtl<'_> {
    type Input = Elements;
    type Output = ShapedRecords<Elements>;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> String {
        let input_name = Path::new(&self.config.data_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "osm".to_string());
        format!("{}.json", input_name)
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        let stream = ElementStream::open(Path::new(&self.config.data_path), &ElementKind::ALL)?;
        if self.config.progress {
            Ok(Box::new(tqdm::tqdm(stream)))
        } else {
            Ok(Box::new(stream))
        }
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        Ok(ShapedRecords::new(input, ElementShaper::new(self.config.shape_options())))
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let mut output_file = BufWriter::new(File::create(self.output_path(dir))?);
        let summary = write_records(output, &mut output_file, self.config.pretty)?;
        info!(
            etl_name = ETL_NAME,
            written = summary.written,
            rejected = summary.rejected,
            relations_skipped = summary.relations_skipped;
            "Records written"
        );
        Ok(())
    }
}
