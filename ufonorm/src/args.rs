//! Command line arguments

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Normalize a UFO, touching only the files whose normalized form differs.
#[derive(Serialize, Deserialize, Parser, Debug, Clone, PartialEq)]
pub struct Args {
    /// The .ufo directory to read
    #[arg(short, long)]
    pub source: PathBuf,

    /// Write here instead of rewriting the source in place
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// A yaml file of output settings. Flags take precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Decimal places kept for coordinates and reals
    #[arg(long)]
    pub precision: Option<u32>,

    /// Write this UFO format version rather than the source's
    #[arg(long, value_parser = clap::value_parser!(u32).range(2..=3))]
    pub format_generation: Option<u32>,

    /// Derive every glyph file name from its glyph name again
    #[arg(long)]
    #[clap(default_value = "false")]
    pub recompute_file_names: bool,

    /// Keep dict keys in source order
    #[arg(long)]
    #[clap(default_value = "false")]
    pub no_sort_keys: bool,
}

impl Args {
    /// Normalize `source` in place with default settings.
    pub fn new(source: &Path) -> Args {
        Args {
            source: source.to_path_buf(),
            output: None,
            config: None,
            precision: None,
            format_generation: None,
            recompute_file_names: false,
            no_sort_keys: false,
        }
    }

    /// Where the result goes.
    pub fn destination(&self) -> &Path {
        self.output.as_deref().unwrap_or(&self.source)
    }
}
