//! Command-line parsing for the house price index pipeline.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the merge/correction code.
//!
//! Every path and tuning flag can also come from the environment (`HPI_*`),
//! which `app::run` populates from a `.env` file when present.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::Indicator;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "hpi", version, about = "70-city house price index merger and corrector")]
pub struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true, env = "HPI_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Merge collected batches, correct every series and publish the result files.
    Process(ProcessArgs),
    /// Run the pipeline and print one city's table without writing files.
    City(CityArgs),
    /// Print one city's published view from an existing results directory.
    Show(ShowArgs),
    /// List the supported indicators and their output file names.
    Indicators,
}

/// Options shared by every command that runs the pipeline.
#[derive(Debug, Args, Clone)]
pub struct PipelineArgs {
    /// Directory holding collected batch files (CSV or JSON).
    #[arg(long, env = "HPI_DATA_DIR", default_value = "collected_data")]
    pub data_dir: PathBuf,

    /// Relative MoM/YoY disagreement above which a point is corrected.
    #[arg(long, env = "HPI_TOLERANCE", default_value_t = 0.005)]
    pub tolerance: f64,

    /// Index value assigned to each series' anchor period.
    #[arg(long, env = "HPI_BASE_VALUE", default_value_t = 100.0)]
    pub base_value: f64,

    /// Restrict processing to these cities (repeatable).
    #[arg(long = "city-filter", value_name = "CITY")]
    pub cities: Vec<String>,

    /// Worker threads for per-series correction (defaults to rayon's choice).
    #[arg(long)]
    pub threads: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Directory the indicator files and summary report are written to.
    #[arg(long, env = "HPI_OUTPUT_DIR", default_value = "results")]
    pub output_dir: PathBuf,

    /// Only process these indicators (repeatable; default: all eight).
    #[arg(long = "indicator", value_enum)]
    pub indicators: Vec<Indicator>,
}

#[derive(Debug, Args, Clone)]
pub struct CityArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// City to display.
    pub city: String,

    /// Indicator to display.
    #[arg(value_enum)]
    pub indicator: Indicator,
}

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    /// Results directory written by `hpi process`.
    #[arg(long, env = "HPI_OUTPUT_DIR", default_value = "results")]
    pub output_dir: PathBuf,

    /// City to show.
    pub city: String,

    /// Indicator to show.
    #[arg(value_enum)]
    pub indicator: Indicator,
}
