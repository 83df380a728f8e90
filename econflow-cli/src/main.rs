//! econflow CLI: collect, refine and export economic indicators.
//!
//! Commands:
//! - `catalog`: list sources and the indicators each one serves
//! - `collect`: fetch indicators into the raw layer
//! - `transform`: re-run one transform over stored data
//! - `run`: collect, standardize and aggregate in one batch
//! - `export`: dump one series of one layer as CSV

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use econflow_core::collect::{ReqwestTransport, SystemClock};
use econflow_core::domain::{IndicatorSelection, Layer, SourceId, TimeRange};
use econflow_runner::export::{export_panel_csv, export_records_csv, export_report_json, save};
use econflow_runner::{BatchReport, CollectionRequest, Pipeline, PipelineConfig, TransformRequest};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "econflow",
    about = "econflow: layered lake of Brazilian economic indicators"
)]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sources and their indicators.
    Catalog {
        /// Only this source (bcb, ibge).
        #[arg(long)]
        source: Option<String>,
    },
    /// Collect indicators into the raw layer only.
    Collect {
        #[arg(long)]
        source: String,

        /// Comma separated indicator codes, or `all`.
        #[arg(long, default_value = "all")]
        indicators: String,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,
    },
    /// Re-run raw -> standardized or standardized -> aggregated.
    Transform {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long)]
        source: String,

        #[arg(long, default_value = "all")]
        indicators: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Write the joined panel of the aggregated series here.
        #[arg(long)]
        panel_out: Option<PathBuf>,
    },
    /// Full pipeline: collect, standardize, aggregate.
    Run {
        /// Source id, or `all` for every registered source.
        #[arg(long, default_value = "all")]
        source: String,

        #[arg(long, default_value = "all")]
        indicators: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Build a joined panel over the succeeded series.
        #[arg(long, default_value_t = false)]
        join: bool,

        /// Write the joined panel as CSV here (implies --join).
        #[arg(long)]
        panel_out: Option<PathBuf>,

        /// Write the per-unit report as JSON here.
        #[arg(long)]
        report_out: Option<PathBuf>,
    },
    /// Export one series of one layer as CSV.
    Export {
        /// raw, standardized or aggregated.
        #[arg(long)]
        layer: String,

        #[arg(long)]
        source: String,

        #[arg(long)]
        indicator: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    tracing::debug!(
        store = %config.store.root.display(),
        write_mode = %config.store.write_mode,
        workers = config.pipeline.max_workers,
        "configuration loaded"
    );

    match cli.command {
        Commands::Catalog { source } => run_catalog(&config, source.as_deref()),
        Commands::Collect {
            source,
            indicators,
            start,
            end,
        } => run_collect(config, &source, &indicators, &start, &end),
        Commands::Transform {
            from,
            to,
            source,
            indicators,
            start,
            end,
            panel_out,
        } => run_transform(
            config,
            &from,
            &to,
            &source,
            &indicators,
            &start,
            &end,
            panel_out.as_deref(),
        ),
        Commands::Run {
            source,
            indicators,
            start,
            end,
            join,
            panel_out,
            report_out,
        } => run_pipeline(
            config,
            &source,
            &indicators,
            &start,
            &end,
            join || panel_out.is_some(),
            panel_out.as_deref(),
            report_out.as_deref(),
        ),
        Commands::Export {
            layer,
            source,
            indicator,
            start,
            end,
            out,
        } => run_export(config, &layer, &source, &indicator, &start, &end, out.as_deref()),
    }
}

/// `RUST_LOG` filter (default `info`); `ECONFLOW_LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let log_format = std::env::var("ECONFLOW_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline> {
    let transport = ReqwestTransport::new(
        Duration::from_secs(config.collector.timeout_secs),
        &config.collector.user_agent,
    )?;
    Ok(Pipeline::from_config(
        config,
        Arc::new(transport),
        Arc::new(SystemClock),
    )?)
}

fn parse_range(start: &str, end: &str) -> Result<TimeRange> {
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
        .with_context(|| format!("invalid --start '{start}', expected YYYY-MM-DD"))?;
    let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
        .with_context(|| format!("invalid --end '{end}', expected YYYY-MM-DD"))?;
    Ok(TimeRange::new(start, end)?)
}

fn parse_selection(indicators: &str) -> Result<IndicatorSelection> {
    indicators
        .parse()
        .map_err(|e: String| anyhow::anyhow!("invalid --indicators: {e}"))
}

fn parse_layer(flag: &str, value: &str) -> Result<Layer> {
    value
        .parse()
        .map_err(|e: String| anyhow::anyhow!("invalid --{flag}: {e}"))
}

// ─── Commands ───────────────────────────────────────────────────────

fn run_catalog(config: &PipelineConfig, source: Option<&str>) -> Result<()> {
    let only = source.map(str::parse::<SourceId>).transpose()?;
    for catalog in config.catalogs()? {
        if only.is_some_and(|s| s != catalog.source()) {
            continue;
        }
        println!("{}", catalog.source());
        for spec in catalog.specs() {
            println!(
                "  {:<12} {:<10} {:>13} -> {:<13} [{}, {}]  {}",
                spec.code,
                format!("{:?}", spec.frequency).to_lowercase(),
                spec.raw_unit.as_str(),
                spec.canonical_unit.as_str(),
                spec.bounds.min,
                spec.bounds.max,
                spec.name
            );
        }
    }
    Ok(())
}

fn run_collect(
    config: PipelineConfig,
    source: &str,
    indicators: &str,
    start: &str,
    end: &str,
) -> Result<()> {
    let request = CollectionRequest {
        source: source.to_string(),
        indicators: parse_selection(indicators)?,
        range: parse_range(start, end)?,
    };
    let pipeline = build_pipeline(&config)?;
    let report = pipeline.collect(&[request], &AtomicBool::new(false));
    finish(&report)
}

#[allow(clippy::too_many_arguments)]
fn run_transform(
    config: PipelineConfig,
    from: &str,
    to: &str,
    source: &str,
    indicators: &str,
    start: &str,
    end: &str,
    panel_out: Option<&Path>,
) -> Result<()> {
    let mut config = config;
    if panel_out.is_some() {
        config.pipeline.join = true;
    }
    let request = TransformRequest::new(
        parse_layer("from", from)?,
        parse_layer("to", to)?,
        source,
        parse_selection(indicators)?,
        parse_range(start, end)?,
    )?;
    let pipeline = build_pipeline(&config)?;
    let report = pipeline.transform(&request)?;

    for (code, outcome) in &report.outcomes {
        match outcome {
            Ok(counts) => println!(
                "{code}: {} written, {} unchanged, {} quarantined",
                counts.partitions_written, counts.partitions_unchanged, counts.records_quarantined
            ),
            Err(e) => eprintln!("{code}: failed: {e}"),
        }
    }
    if let (Some(path), Some(panel)) = (panel_out, report.panel.as_ref()) {
        save(path, &export_panel_csv(panel)?)?;
        println!("Panel saved to: {}", path.display());
    }
    if report.failed() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline(
    config: PipelineConfig,
    source: &str,
    indicators: &str,
    start: &str,
    end: &str,
    join: bool,
    panel_out: Option<&Path>,
    report_out: Option<&Path>,
) -> Result<()> {
    let mut config = config;
    config.pipeline.join |= join;
    let range = parse_range(start, end)?;
    let selection = parse_selection(indicators)?;
    let pipeline = build_pipeline(&config)?;

    let sources: Vec<String> = if source.eq_ignore_ascii_case("all") {
        if selection != IndicatorSelection::All {
            bail!("--source all only combines with --indicators all");
        }
        pipeline
            .registry()
            .sources()
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        vec![source.to_string()]
    };
    let requests: Vec<CollectionRequest> = sources
        .into_iter()
        .map(|source| CollectionRequest {
            source,
            indicators: selection.clone(),
            range,
        })
        .collect();

    let report = pipeline.run(&requests, &AtomicBool::new(false));
    if let Some(path) = report_out {
        save(path, &export_report_json(&report)?)?;
        println!("Report saved to: {}", path.display());
    }
    if let (Some(path), Some(panel)) = (panel_out, report.panel.as_ref()) {
        save(path, &export_panel_csv(panel)?)?;
        println!("Panel saved to: {}", path.display());
    }
    finish(&report)
}

fn run_export(
    config: PipelineConfig,
    layer: &str,
    source: &str,
    indicator: &str,
    start: &str,
    end: &str,
    out: Option<&Path>,
) -> Result<()> {
    let layer = parse_layer("layer", layer)?;
    let source: SourceId = source.parse()?;
    let range = parse_range(start, end)?;
    let pipeline = build_pipeline(&config)?;
    let records = pipeline.reader().read(layer, source, indicator, &range)?;
    let csv = export_records_csv(&records)?;
    match out {
        Some(path) => {
            save(path, &csv)?;
            println!("{} records exported to: {}", records.len(), path.display());
        }
        None => print!("{csv}"),
    }
    Ok(())
}

/// Print the per-unit outcome; exit 1 if anything failed.
fn finish(report: &BatchReport) -> Result<()> {
    for unit in &report.units {
        println!(
            "{}/{}: {} ({} raw, {} standardized, {} aggregated, {} quarantined)",
            unit.source,
            unit.indicator_code,
            unit.state,
            unit.counts.raw_records,
            unit.counts.standardized_records,
            unit.counts.aggregated_records,
            unit.counts.records_quarantined
        );
    }
    for rejected in &report.rejected_requests {
        eprintln!("request {} ({}): {}", rejected.index, rejected.source, rejected.error);
    }
    let summary = report.summary();
    println!("{summary}");
    if summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
