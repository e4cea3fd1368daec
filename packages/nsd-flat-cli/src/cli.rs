use clap::{Args, Parser, Subcommand};
use nsd_flat::Split;

#[derive(Parser)]
#[command(
    name = "nsdflat",
    version,
    about = "Build NSD-Flat datasets of stimulus images and flattened cortical activity maps",
    long_about = "Build paired stimulus image / flat-map activity datasets from the Natural Scenes Dataset.\n\
                  Reads masks, betas and stimulus tables below the data root. Set $NSD_FLAT_ROOT or use --root."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate one dataset split
    Generate(GenerateArgs),
    /// Show subjects, session splits and raster geometry
    Info(InfoArgs),
}

#[derive(Args)]
pub struct GenerateArgs {
    /// Dataset split to generate (train, test)
    #[arg(long, value_name = "SPLIT", default_value = "train", value_parser = parse_split)]
    pub split: Split,

    /// Resize stimulus images to H x H
    #[arg(long = "img-size", visible_aliases = ["sz", "img_size"], value_name = "H")]
    pub img_size: Option<u32>,

    /// Number of image encoding workers
    #[arg(short = 'j', long, value_name = "N", default_value_t = 4)]
    pub workers: usize,

    /// Stop after the first session of the first subject
    #[arg(long, default_value_t = false)]
    pub debug: bool,

    /// In debug mode, keep only the first N trials
    #[arg(long, value_name = "N", requires = "debug")]
    pub debug_trials: Option<usize>,

    /// Data root holding resources/ and data/
    #[arg(long, env = "NSD_FLAT_ROOT", default_value = ".")]
    pub root: String,

    /// Dataset configuration override (JSON)
    #[arg(long)]
    pub config: Option<String>,

    /// Output root (default: {root}/processed)
    #[arg(long)]
    pub out: Option<String>,

    /// Only generate these subjects
    #[arg(long, num_args = 1..)]
    pub subjects: Option<Vec<String>>,

    /// Records per write batch
    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Print the manifest as JSON when done
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Dataset configuration override (JSON)
    #[arg(long)]
    pub config: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Parse a split name, rejecting anything but "train" and "test".
pub fn parse_split(s: &str) -> Result<Split, String> {
    s.parse::<Split>().map_err(|e| e.to_string())
}
