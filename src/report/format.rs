//! Plain-text tables for the `process`, `city` and `indicators` commands.

use crate::app::pipeline::RunOutput;
use crate::domain::{CityEntry, CityStatus, Indicator, PointStatus, RunConfig};

/// Format the run summary (ingest stats + merge conflicts + per-indicator status counts).
pub fn format_run_summary(run: &RunOutput, config: &RunConfig) -> String {
    let mut out = String::new();

    out.push_str("=== hpi - House Price Index ===\n");
    out.push_str(&format!("Generated: {}\n", run.generated_at.format("%Y-%m-%d %H:%M:%S")));
    out.push_str(&format!("Data dir: {}\n", config.data_dir.display()));
    out.push_str(&format!(
        "Batches: {} | skipped files: {} | records: {}/{} used\n",
        run.loaded.batches.len(),
        run.loaded.skipped_files.len(),
        run.loaded.records_used,
        run.loaded.records_read,
    ));
    out.push_str(&format!(
        "Correction: base={:.1} tolerance={}\n",
        config.correction.base_value, config.correction.tolerance
    ));
    out.push_str(&format!(
        "Cities: {} | merge conflicts: {}\n",
        run.cities.len(),
        run.conflicts.len()
    ));

    out.push('\n');
    out.push_str(&format!(
        "{:<34} {:>7} {:>7} {:>7} {:>11}\n",
        "indicator", "success", "no_data", "error", "corrections"
    ));
    out.push_str(&format!("{:-<34} {:-<7} {:-<7} {:-<7} {:-<11}\n", "", "", "", "", ""));
    for (indicator, file) in &run.files {
        let corrections: usize = file.cities.iter().map(|c| c.corrections.len()).sum();
        out.push_str(&format!(
            "{:<34} {:>7} {:>7} {:>7} {:>11}\n",
            indicator.slug(),
            file.success_count,
            file.no_data_count,
            file.error_count,
            corrections
        ));
    }

    out
}

/// Format one city's corrected series as a table.
pub fn format_city_table(entry: &CityEntry, indicator: Indicator) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} | {}\n", entry.city, indicator_title(indicator)));

    match entry.status {
        CityStatus::NoData => {
            out.push_str("(no data)\n");
            return out;
        }
        CityStatus::Error => {
            out.push_str(&format!(
                "(error) {}\n",
                entry.error_message.as_deref().unwrap_or("unknown error")
            ));
            return out;
        }
        CityStatus::Success => {}
    }

    out.push_str(&format!(
        "{:<8} {:>10} {:>8} {:>8} {:>8} {:<15}\n",
        "date", "value", "mom", "yoy", "growth", "status"
    ));
    out.push_str(&format!("{:-<8} {:-<10} {:-<8} {:-<8} {:-<8} {:-<15}\n", "", "", "", "", "", ""));
    for row in &entry.corrected_result {
        let p = &row.point;
        out.push_str(
            format!(
                "{:<8} {:>10.3} {:>8} {:>8} {:>8} {:<15}\n",
                p.period.to_string(),
                p.actual_value,
                fmt_opt(p.month_on_month, 1),
                fmt_opt(p.year_on_year, 1),
                fmt_opt(p.growth_rate, 2),
                status_label(p.status),
            )
            .trim_end(),
        );
        out.push('\n');
    }

    if let Some(stats) = &entry.statistics {
        out.push_str(&format!(
            "\nfinal={:.3} growth={:+.2}% mom matches {} yoy matches {} corrections={}\n",
            stats.final_value,
            stats.total_growth_percent,
            stats.mom_matches,
            stats.yoy_matches,
            stats.corrections
        ));
    }

    out
}

/// Format the list of supported indicators.
pub fn format_indicator_list() -> String {
    let mut out = String::new();
    for indicator in Indicator::ALL {
        out.push_str(&format!(
            "{:<34} {:<40} {}\n",
            indicator.slug(),
            indicator.file_name(),
            indicator_title(indicator)
        ));
    }
    out
}

fn indicator_title(indicator: Indicator) -> String {
    match indicator.area_type() {
        Some(area) => format!("{} / {} / {area}", indicator.index_type(), indicator.house_type()),
        None => format!("{} / {}", indicator.index_type(), indicator.house_type()),
    }
}

fn status_label(status: PointStatus) -> &'static str {
    match status {
        PointStatus::Anchor => "anchor",
        PointStatus::Chained => "chained",
        PointStatus::Confirmed => "confirmed",
        PointStatus::Corrected => "corrected",
        PointStatus::YoyDerived => "yoy_derived",
        PointStatus::CarriedForward => "carried_forward",
        PointStatus::Unresolved => "unresolved",
    }
}

fn fmt_opt(v: Option<f64>, decimals: usize) -> String {
    match v {
        Some(x) => format!("{x:.decimals$}"),
        None => "-".to_string(),
    }
}
