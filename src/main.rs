use std::io;
use std::path::{Path, PathBuf};

use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use osm_shaper::errors::Result;
use osm_shaper::etl::audit_postcodes::PostcodeAuditEtl;
use osm_shaper::etl::audit_streets::StreetAuditEtl;
use osm_shaper::etl::shape_osm::ShapeOsmEtl;
use osm_shaper::etl::Etl;
use osm_shaper::{create_output_dir, load_user_config};

const DEFAULT_CONFIG_PATH: &str = "config/leeds.json";

fn setup_logging() {
    Builder::with_level("info")
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn run_etl(etl: &mut impl Etl, output_dir: &Path, force: bool) -> Result<()> {
    if force {
        etl.clean(output_dir)?;
    }
    etl.process(output_dir)
}

fn main() -> Result<()> {
    setup_logging();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let user_config = load_user_config(&config_path)?;
    let output_dir = create_output_dir(&user_config)?;

    run_etl(&mut ShapeOsmEtl::new(&user_config), &output_dir, user_config.force)?;
    run_etl(&mut StreetAuditEtl::new(&user_config)?, &output_dir, user_config.force)?;

    match &user_config.postcode_csv {
        Some(postcode_csv) => {
            let mut etl = PostcodeAuditEtl::new(&user_config, Path::new(postcode_csv));
            run_etl(&mut etl, &output_dir, user_config.force)?;
        }
        None => info!(etl_name = "audit_postcodes"; "No postcode_csv configured, skipping"),
    }

    Ok(())
}
