use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use log::info;
use regex::Regex;
use serde::Serialize;

use crate::data::osm::{ElementKind, RawElement};
use crate::errors::{Error, Result};
use crate::etl::parse_osm::{skip_recoverable, ElementStream};
use crate::etl::Etl;
use crate::UserConfig;

pub const ETL_NAME: &str = "audit_streets";
pub const OUTPUT_FILE_NAME: &str = "street_audit.json";

const STREET_KEY: &str = "addr:street";
// Last word of the name, trailing period included.
const STREET_TYPE_PATTERN: &str = r"\b\S+\.?$";

/// Ordered (bad text, replacement) pairs. The first pair found in a name wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionTable {
    entries: Vec<(String, String)>,
}

impl CorrectionTable {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        CorrectionTable { entries }
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Replaces the first occurrence of the first matching entry.
    /// `None` means no entry occurs in `name`.
    pub fn normalize(&self, name: &str) -> Option<String> {
        self.entries
            .iter()
            .find(|(incorrect, _)| !incorrect.is_empty() && name.contains(incorrect.as_str()))
            .map(|(incorrect, correct)| name.replacen(incorrect.as_str(), correct, 1))
    }
}

/// Suffix token -> street names ending with it.
pub type SuffixFindings = BTreeMap<String, BTreeSet<String>>;

pub struct SuffixAuditor {
    street_type_re: Regex,
    expected: HashSet<String>,
}

impl SuffixAuditor {
    pub fn new<S: Into<String>>(expected: impl IntoIterator<Item = S>) -> Result<Self> {
        let street_type_re =
            Regex::new(STREET_TYPE_PATTERN).map_err(|err| Error::Config(err.to_string()))?;
        Ok(SuffixAuditor {
            street_type_re,
            expected: expected.into_iter().map(Into::into).collect(),
        })
    }

    pub fn street_type<'a>(&self, street_name: &'a str) -> Option<&'a str> {
        self.street_type_re.find(street_name).map(|m| m.as_str())
    }

    fn audit_street_type(&self, findings: &mut SuffixFindings, street_name: &str) {
        if let Some(street_type) = self.street_type(street_name) {
            if !self.expected.contains(street_type) {
                findings
                    .entry(street_type.to_string())
                    .or_default()
                    .insert(street_name.to_string());
            }
        }
    }

    /// Groups `addr:street` values of nodes and ways by unexpected suffix.
    /// Elements with per-element errors are skipped; fatal errors abort.
    pub fn audit<I>(&self, elements: I) -> Result<SuffixFindings>
    where
        I: IntoIterator<Item = Result<RawElement>>,
    {
        let mut findings = SuffixFindings::new();
        for item in elements {
            let Some(element) = skip_recoverable(item)? else {
                continue;
            };
            if element.kind == ElementKind::Relation {
                continue;
            }
            for street_name in element.tag_values(STREET_KEY) {
                self.audit_street_type(&mut findings, street_name);
            }
        }
        Ok(findings)
    }
}

/// Every audited name the table can fix, mapped to its fixed form.
pub fn better_names(
    findings: &SuffixFindings,
    table: &CorrectionTable,
) -> BTreeMap<String, String> {
    findings
        .values()
        .flatten()
        .filter_map(|name| table.normalize(name).map(|better| (name.clone(), better)))
        .collect()
}

#[derive(Debug, Serialize)]
pub struct StreetAuditReport {
    pub unexpected_suffixes: SuffixFindings,
    pub better_names: BTreeMap<String, String>,
}

pub struct StreetAuditEtl<'a> {
    config: &'a UserConfig,
    auditor: SuffixAuditor,
    corrections: CorrectionTable,
}

impl<'a> StreetAuditEtl<'a> {
    pub fn new(config: &'a UserConfig) -> Result<Self> {
        Ok(StreetAuditEtl {
            config,
            auditor: SuffixAuditor::new(config.expected_suffixes.iter().cloned())?,
            corrections: config.correction_table(),
        })
    }
}

impl Etl for StreetAuditEtl<'_> {
    type Input = ElementStream<Box<dyn std::io::BufRead>>;
    type Output = StreetAuditReport;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> String {
        OUTPUT_FILE_NAME.to_string()
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        let kinds = [ElementKind::Node, ElementKind::Way];
        ElementStream::open(Path::new(&self.config.data_path), &kinds)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let unexpected_suffixes = self.auditor.audit(input)?;
        let better_names = better_names(&unexpected_suffixes, &self.corrections);
        info!(
            etl_name = ETL_NAME,
            suffixes = unexpected_suffixes.len(),
            fixable = better_names.len();
            "Street audit complete"
        );
        Ok(StreetAuditReport {
            unexpected_suffixes,
            better_names,
        })
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let output_file = BufWriter::new(File::create(self.output_path(dir))?);
        serde_json::to_writer_pretty(output_file, &output)?;
        Ok(())
    }
}
