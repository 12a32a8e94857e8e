//! Normalize UFO sources in place or into a new bundle.

mod args;
mod error;

pub use args::Args;
pub use error::Error;

use std::fs;

use log::{debug, info};
use ufoshadow::{Config, FontBundle, FormatGeneration, WriteReport};

/// The save settings for a run: the config file if any, then the flags.
pub fn config_for(args: &Args) -> Result<Config, Error> {
    let mut config = match &args.config {
        Some(path) => {
            let yml = fs::read_to_string(path).map_err(|source| Error::FileIo {
                path: path.clone(),
                source,
            })?;
            serde_yaml::from_str(&yml).map_err(|source| Error::BadConfig {
                path: path.clone(),
                source,
            })?
        }
        None => Config::default(),
    };
    if let Some(precision) = args.precision {
        config.precision = precision;
    }
    if let Some(version) = args.format_generation {
        config.format_generation = Some(FormatGeneration::try_from(version)?);
    }
    if args.recompute_file_names {
        config.recompute_file_names = true;
    }
    if args.no_sort_keys {
        config.sort_dict_keys = false;
    }
    debug!("{config:?}");
    Ok(config)
}

pub fn run(args: &Args) -> Result<WriteReport, Error> {
    let config = config_for(args)?;
    let mut font = FontBundle::open(&args.source)?;
    let report = font.save(args.destination(), &config)?;
    info!(
        "{:?}: {} files written, {} deleted",
        args.destination(),
        report.written.len(),
        report.deleted.len()
    );
    Ok(report)
}
