pub mod audit_postcodes;
pub mod audit_streets;
pub mod parse_osm;
pub mod shape;
pub mod shape_osm;

use std::{fs, io, path::{Path, PathBuf}};
use log::{info, warn, error};

use crate::errors::{Error, Result};


/// One extract/transform/load job writing a single file into the output directory.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;
    fn output_file_name(&self) -> String;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    fn output_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.output_file_name())
    }

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(self.output_path(dir).try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        if self.is_cached(dir)? {
            fs::remove_file(self.output_path(dir))?;
        }
        Ok(())
    }

    fn remove_partial_output(&self, dir: &Path) {
        let path = self.output_path(dir);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(
                etl_name = self.etl_name(),
                path = path.display().to_string().as_str(),
                err = err.to_string().as_str();
                "Failed to remove partial output, it will be treated as cached"
            ),
        }
    }

    fn log_failure(&self, stage: &str, err: Error) -> Error {
        error!(
            etl_name = self.etl_name(), stage = stage, err = err.to_string().as_str();
            "ETL stage failed with error"
        );
        err
    }

    fn process(&mut self, dir: &Path) -> Result<()> {
        info!(etl_name = self.etl_name(); "Starting ETL process");
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
        } else {
            info!(etl_name = self.etl_name(); "Extracting");
            let input = self.extract(dir).map_err(|err| self.log_failure("extract", err))?;

            info!(etl_name = self.etl_name(); "Transforming");
            let output = self
                .transform(input)
                .map_err(|err| self.log_failure("transform", err))?;

            info!(etl_name = self.etl_name(); "Loading");
            if let Err(err) = self.load(dir, output) {
                // A partial file would count as cached on the next run.
                self.remove_partial_output(dir);
                return Err(self.log_failure("load", err));
            }
        }
        info!(etl_name = self.etl_name(); "Process finished");
        Ok(())
    }
}
