pub mod data;
pub mod errors;
pub mod etl;

use std::fs::{create_dir_all, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::etl::audit_streets::CorrectionTable;
use crate::etl::shape::{PositionMode, ShapeOptions};

#[derive(Deserialize, Debug, Clone)]
pub struct UserConfig {
    pub data_path: String,
    #[serde(default = "default_dest_path")]
    pub dest_path: String,
    /// Reference postcode table. The postcode audit is skipped without it.
    #[serde(default)]
    pub postcode_csv: Option<String>,
    #[serde(default = "default_expected_suffixes")]
    pub expected_suffixes: Vec<String>,
    /// Ordered `[bad, good]` pairs; earlier pairs take precedence.
    #[serde(default = "default_corrections")]
    pub corrections: Vec<(String, String)>,
    #[serde(default = "default_exempt_prefixes")]
    pub exempt_prefixes: Vec<String>,
    #[serde(default = "default_regional_prefix")]
    pub regional_prefix: String,
    #[serde(default)]
    pub pretty: bool,
    #[serde(default)]
    pub position_mode: PositionMode,
    /// Run `address.street` through the correction table while shaping.
    #[serde(default)]
    pub correct_streets: bool,
    #[serde(default = "default_progress")]
    pub progress: bool,
    /// Ignore cached outputs and rerun every job.
    #[serde(default)]
    pub force: bool,
}

fn default_dest_path() -> String {
    "output".to_string()
}

fn default_expected_suffixes() -> Vec<String> {
    [
        "Street", "Avenue", "Boulevard", "Drive", "Court", "Place", "Square", "Lane", "Road",
        "Trail", "Parkway", "Commons",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_corrections() -> Vec<(String, String)> {
    [
        ("St.", "Street"),
        ("St", "Street"),
        ("Rd.", "Road"),
        ("Avenueue", "Avenue"),
        ("Ave.", "Avenue"),
        ("Ave", "Avenue"),
    ]
    .iter()
    .map(|(bad, good)| (bad.to_string(), good.to_string()))
    .collect()
}

fn default_exempt_prefixes() -> Vec<String> {
    vec!["BD".to_string()]
}

fn default_regional_prefix() -> String {
    "LS".to_string()
}

fn default_progress() -> bool {
    true
}

impl UserConfig {
    /// Config with every default filled in, reading from `data_path`.
    pub fn for_input(data_path: &str) -> Self {
        UserConfig {
            data_path: data_path.to_string(),
            dest_path: default_dest_path(),
            postcode_csv: None,
            expected_suffixes: default_expected_suffixes(),
            corrections: default_corrections(),
            exempt_prefixes: default_exempt_prefixes(),
            regional_prefix: default_regional_prefix(),
            pretty: false,
            position_mode: PositionMode::default(),
            correct_streets: false,
            progress: default_progress(),
            force: false,
        }
    }

    pub fn correction_table(&self) -> CorrectionTable {
        CorrectionTable::new(self.corrections.clone())
    }

    pub fn shape_options(&self) -> ShapeOptions {
        ShapeOptions {
            position_mode: self.position_mode,
            street_corrections: self.correct_streets.then(|| self.correction_table()),
        }
    }
}

pub fn load_user_config(path: &Path) -> Result<UserConfig> {
    let file = File::open(path)
        .map_err(|err| Error::Config(format!("could not open {}: {}", path.display(), err)))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|err| Error::Config(format!("could not parse {}: {}", path.display(), err)))
}

/// `<dest_path>/<input file name>/`, created if missing.
pub fn create_output_dir(config: &UserConfig) -> Result<PathBuf> {
    let input_fname = Path::new(&config.data_path)
        .file_name()
        .ok_or("Could not get input file name")?;
    let output_dir = Path::new(&config.dest_path).join(input_fname);
    create_dir_all(&output_dir)?;
    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: UserConfig = serde_json::from_str(r#"{"data_path": "leeds.osm"}"#).unwrap();
        assert_eq!(config.dest_path, "output");
        assert_eq!(config.position_mode, PositionMode::Strict);
        assert_eq!(config.exempt_prefixes, vec!["BD"]);
        assert_eq!(config.corrections[0], ("St.".to_string(), "Street".to_string()));
        assert!(config.shape_options().street_corrections.is_none());
    }

    #[test]
    fn corrections_keep_their_order() {
        let config: UserConfig = serde_json::from_str(
            r#"{
                "data_path": "leeds.osm",
                "corrections": [["Rd.", "Road"], ["Rd", "Road"]],
                "position_mode": "legacy",
                "correct_streets": true
            }"#,
        )
        .unwrap();

        let table = config.correction_table();
        assert_eq!(table.entries()[0].0, "Rd.");
        assert_eq!(config.position_mode, PositionMode::Legacy);
        assert_eq!(
            config.shape_options().street_corrections,
            Some(CorrectionTable::new(vec![
                ("Rd.".to_string(), "Road".to_string()),
                ("Rd".to_string(), "Road".to_string()),
            ]))
        );
    }

    #[test]
    fn unknown_position_mode_is_rejected() {
        let parsed: std::result::Result<UserConfig, _> =
            serde_json::from_str(r#"{"data_path": "x.osm", "position_mode": "sideways"}"#);
        assert!(parsed.is_err());
    }
}
