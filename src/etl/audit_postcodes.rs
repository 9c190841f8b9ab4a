use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::data::osm::{ElementKind, RawElement};
use crate::errors::{Error, Result};
use crate::etl::parse_osm::{skip_recoverable, ElementStream};
use crate::etl::Etl;
use crate::UserConfig;

pub const ETL_NAME: &str = "audit_postcodes";
pub const OUTPUT_FILE_NAME: &str = "postcode_audit.json";

const POSTCODE_KEY: &str = "addr:postcode";

/// Reads known postcodes from a tabular file: header row skipped, first
/// column of every other row kept.
pub fn load_reference_postcodes<R: BufRead>(source: R) -> Result<HashSet<String>> {
    let mut postcodes = HashSet::new();
    for line in source.lines().skip(1) {
        let line = line.map_err(|err| Error::ReferenceData(err.to_string()))?;
        let first_column = line.split(',').next().unwrap_or_default().trim();
        let postcode = first_column.trim_matches('"').trim();
        if !postcode.is_empty() {
            postcodes.insert(postcode.to_string());
        }
    }
    if postcodes.is_empty() {
        return Err(Error::ReferenceData("no postcodes found".to_string()));
    }
    Ok(postcodes)
}

pub fn read_reference_postcodes(path: &Path) -> Result<HashSet<String>> {
    let file = File::open(path)
        .map_err(|err| Error::ReferenceData(format!("{}: {}", path.display(), err)))?;
    load_reference_postcodes(BufReader::new(file))
        .map_err(|err| Error::ReferenceData(format!("{}: {}", path.display(), err)))
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct PostcodeAudit {
    pub non_standard: BTreeSet<String>,
    pub lower_case: usize,
    pub total: usize,
}

pub struct PostcodeAuditor {
    reference: HashSet<String>,
    exempt_prefixes: Vec<String>,
    lower_case_prefix: String,
}

impl PostcodeAuditor {
    /// `regional_prefix` is the area code expected on every postcode
    /// (e.g. `LS`); its lower-case form flags badly formatted values.
    pub fn new(
        reference: HashSet<String>,
        exempt_prefixes: Vec<String>,
        regional_prefix: &str,
    ) -> Self {
        PostcodeAuditor {
            reference,
            exempt_prefixes,
            lower_case_prefix: regional_prefix.to_lowercase(),
        }
    }

    pub fn is_standard(&self, postcode: &str) -> bool {
        self.reference.contains(postcode)
    }

    pub fn is_exempt(&self, postcode: &str) -> bool {
        self.exempt_prefixes
            .iter()
            .any(|prefix| postcode.starts_with(prefix.as_str()))
    }

    pub fn is_lower_case(&self, postcode: &str) -> bool {
        !self.lower_case_prefix.is_empty() && postcode.starts_with(self.lower_case_prefix.as_str())
    }

    fn audit_postcode(&self, audit: &mut PostcodeAudit, postcode: &str) {
        audit.total += 1;
        if !self.is_standard(postcode) && !self.is_exempt(postcode) {
            audit.non_standard.insert(postcode.to_string());
        }
        if self.is_lower_case(postcode) {
            audit.lower_case += 1;
        }
    }

    /// Classifies every `addr:postcode` of nodes and ways. Elements with
    /// per-element errors are skipped; fatal errors abort.
    pub fn audit<I>(&self, elements: I) -> Result<PostcodeAudit>
    where
        I: IntoIterator<Item = Result<RawElement>>,
    {
        let mut audit = PostcodeAudit::default();
        for item in elements {
            let Some(element) = skip_recoverable(item)? else {
                continue;
            };
            if element.kind == ElementKind::Relation {
                continue;
            }
            for postcode in element.tag_values(POSTCODE_KEY) {
                self.audit_postcode(&mut audit, postcode);
            }
        }
        Ok(audit)
    }
}

pub struct PostcodeAuditEtl<'a> {
    config: &'a UserConfig,
    reference_path: &'a Path,
    auditor: Option<PostcodeAuditor>,
}

impl<'a> PostcodeAuditEtl<'a> {
    pub fn new(config: &'a UserConfig, reference_path: &'a Path) -> Self {
        PostcodeAuditEtl {
            config,
            reference_path,
            auditor: None,
        }
    }
}

impl Etl for PostcodeAuditEtl<'_> {
    type Input = ElementStream<Box<dyn BufRead>>;
    type Output = PostcodeAudit;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> String {
        OUTPUT_FILE_NAME.to_string()
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        let reference = read_reference_postcodes(self.reference_path)?;
        info!(etl_name = ETL_NAME, postcodes = reference.len(); "Loaded reference postcodes");
        self.auditor = Some(PostcodeAuditor::new(
            reference,
            self.config.exempt_prefixes.clone(),
            &self.config.regional_prefix,
        ));
        let kinds = [ElementKind::Node, ElementKind::Way];
        ElementStream::open(Path::new(&self.config.data_path), &kinds)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let auditor = self
            .auditor
            .as_ref()
            .ok_or("reference postcodes were not loaded")?;
        let audit = auditor.audit(input)?;
        info!(
            etl_name = ETL_NAME,
            total = audit.total,
            non_standard = audit.non_standard.len(),
            lower_case = audit.lower_case;
            "Postcode audit complete"
        );
        Ok(audit)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let output_file = BufWriter::new(File::create(self.output_path(dir))?);
        serde_json::to_writer_pretty(output_file, &output)?;
        Ok(())
    }
}
