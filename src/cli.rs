//! CLI definitions
//!
//! clap derive structs for the `nucleus-autocrop` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Detect nuclei in 3D stacks and crop one padded sub-volume per nucleus
#[derive(Debug, Parser)]
#[command(name = "nucleus-autocrop", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Crop every nucleus of an image or a directory of images
    Autocrop(AutocropArgs),

    /// Re-crop a raw image from a coordinates file
    CropFromCoordinates(CropFromCoordinatesArgs),

    /// Write an example config file with every default
    ConfigExample(ConfigExampleArgs),
}

#[derive(Debug, Args)]
pub struct AutocropArgs {
    /// Input image or directory (searched recursively)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Config file (TOML, or legacy key:value lines)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Worker threads (default: all cores)
    #[arg(long)]
    pub threads: Option<usize>,

    /// Manual voxel size along x
    #[arg(long)]
    pub xcal: Option<f64>,

    /// Manual voxel size along y
    #[arg(long)]
    pub ycal: Option<f64>,

    /// Manual voxel size along z
    #[arg(long)]
    pub zcal: Option<f64>,

    /// Channel used to compute the threshold
    #[arg(long)]
    pub channel: Option<usize>,

    /// Keep overlapping boxes separate
    #[arg(long)]
    pub no_merge: bool,

    /// Skip the annotated z-projection
    #[arg(long)]
    pub no_projection: bool,

    /// Print the resolved parameters and the image list, then exit
    #[arg(long)]
    pub dry_run: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also write log events to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CropFromCoordinatesArgs {
    /// Coordinates file written by a previous autocrop run
    #[arg(long)]
    pub coordinates: PathBuf,

    /// Raw image to crop
    #[arg(long)]
    pub image: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Manual voxel size along x
    #[arg(long)]
    pub xcal: Option<f64>,

    /// Manual voxel size along y
    #[arg(long)]
    pub ycal: Option<f64>,

    /// Manual voxel size along z
    #[arg(long)]
    pub zcal: Option<f64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Args)]
pub struct ConfigExampleArgs {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
