//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - installs logging
//! - runs the merge/correct pipeline
//! - writes the published files or prints a view of them

use clap::Parser;

use crate::cli::{CityArgs, Command, PipelineArgs, ProcessArgs, ShowArgs};
use crate::domain::{CorrectionConfig, Indicator, RunConfig};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `hpi` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = crate::cli::Cli::parse();
    crate::logging::init_tracing(cli.log_json);

    match cli.command {
        Command::Process(args) => handle_process(args),
        Command::City(args) => handle_city(args),
        Command::Show(args) => handle_show(args),
        Command::Indicators => {
            print!("{}", crate::report::format_indicator_list());
            Ok(())
        }
    }
}

fn handle_process(args: ProcessArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args.pipeline, &args.indicators, args.output_dir.clone())?;
    let run = pipeline::run(&config)?;
    let written = pipeline::publish(&run, &config.output_dir)?;

    println!("{}", crate::report::format_run_summary(&run, &config));
    for path in written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn handle_city(args: CityArgs) -> Result<(), AppError> {
    let mut pipeline_args = args.pipeline.clone();
    pipeline_args.cities = vec![args.city.clone()];
    let config = run_config_from_args(&pipeline_args, &[args.indicator], Default::default())?;
    let run = pipeline::run(&config)?;

    let entry = run
        .file(args.indicator)
        .and_then(|f| f.cities.iter().find(|c| c.city == args.city))
        .ok_or_else(|| AppError::new(3, format!("No data for city '{}'.", args.city)))?;

    print!("{}", crate::report::format_city_table(entry, args.indicator));
    Ok(())
}

fn handle_show(args: ShowArgs) -> Result<(), AppError> {
    let path = args.output_dir.join(args.indicator.file_name());
    let file = crate::io::publish::read_indicator_file(&path)?;
    let view = crate::io::publish::city_view(&file, &args.city).ok_or_else(|| {
        AppError::new(
            3,
            format!("City '{}' not found in '{}'.", args.city, path.display()),
        )
    })?;

    let json = serde_json::to_string_pretty(&view)
        .map_err(|e| AppError::new(4, format!("Failed to render city view: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Build and validate the pipeline configuration from CLI flags.
pub fn run_config_from_args(
    args: &PipelineArgs,
    indicators: &[Indicator],
    output_dir: std::path::PathBuf,
) -> Result<RunConfig, AppError> {
    if !(args.tolerance.is_finite() && args.tolerance >= 0.0) {
        return Err(AppError::new(2, format!("Invalid --tolerance {}: must be >= 0.", args.tolerance)));
    }
    if !(args.base_value.is_finite() && args.base_value > 0.0) {
        return Err(AppError::new(2, format!("Invalid --base-value {}: must be > 0.", args.base_value)));
    }
    if args.threads == Some(0) {
        return Err(AppError::new(2, "Invalid --threads 0: must be >= 1."));
    }

    let mut indicators = if indicators.is_empty() {
        Indicator::ALL.to_vec()
    } else {
        indicators.to_vec()
    };
    indicators.sort();
    indicators.dedup();

    Ok(RunConfig {
        data_dir: args.data_dir.clone(),
        output_dir,
        correction: CorrectionConfig {
            base_value: args.base_value,
            tolerance: args.tolerance,
        },
        indicators,
        cities: args.cities.clone(),
        threads: args.threads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> PipelineArgs {
        PipelineArgs {
            data_dir: PathBuf::from("collected_data"),
            tolerance: 0.005,
            base_value: 100.0,
            cities: Vec::new(),
            threads: None,
        }
    }

    #[test]
    fn defaults_to_all_indicators_in_canonical_order() {
        let config = run_config_from_args(&args(), &[], PathBuf::from("results")).unwrap();
        assert_eq!(config.indicators, Indicator::ALL.to_vec());

        let narrowed = run_config_from_args(
            &args(),
            &[Indicator::UsedHouseBasic, Indicator::NewHouseBasic, Indicator::UsedHouseBasic],
            PathBuf::from("results"),
        )
        .unwrap();
        assert_eq!(narrowed.indicators, vec![Indicator::NewHouseBasic, Indicator::UsedHouseBasic]);
    }

    #[test]
    fn rejects_bad_tuning() {
        let mut a = args();
        a.base_value = 0.0;
        assert_eq!(run_config_from_args(&a, &[], PathBuf::new()).unwrap_err().exit_code(), 2);

        let mut a = args();
        a.tolerance = f64::NAN;
        assert_eq!(run_config_from_args(&a, &[], PathBuf::new()).unwrap_err().exit_code(), 2);

        let mut a = args();
        a.threads = Some(0);
        assert_eq!(run_config_from_args(&a, &[], PathBuf::new()).unwrap_err().exit_code(), 2);
    }
}
