use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::{Parser, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use cellstream::ingestion::{
    CompositeObserver, FileObserver, PipelineObserver, Severity, SourceFormat, TracingObserver,
};
use cellstream::pipeline::{Pipeline, PipelineOptions};
use cellstream::processing::KeyColumn;
use cellstream::sink::{
    Compression, Consistency, CqlOptions, CqlSink, MemorySink, ScriptSession, ScriptTarget, Sink,
    SinkError,
};
use cellstream::{EtlError, EtlResult};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Parquet,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SinkArg {
    /// Render keyspace/table DDL and INSERTs into a CQL script.
    CqlScript,
    /// Keep everything in memory (dry run).
    Memory,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlertArg {
    Warning,
    Error,
    Critical,
    Off,
}

#[derive(Parser, Debug)]
#[command(name = "cellstream")]
#[command(about = "Stream column-family dumps into per-family CQL tables")]
struct Args {
    /// Input file (JSON lines or Parquet)
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Input format (default: from the file extension)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Cells per family that trigger a batch write
    #[arg(short = 'b', long, default_value_t = 1000)]
    batch_size: usize,

    /// Resident memory ceiling in MB
    #[arg(short = 'm', long = "max-memory", default_value_t = 1024)]
    max_memory_mb: u64,

    /// Records between memory checks
    #[arg(long, default_value_t = 1000)]
    memory_check_interval: u64,

    /// Records between progress lines
    #[arg(short = 'i', long, default_value_t = 1000)]
    progress_interval: u64,

    /// Export a CSV sample of extracted rows
    #[arg(short = 'x', long = "export-csv")]
    export_csv: bool,

    /// Records in the CSV sample
    #[arg(long, default_value_t = 5000)]
    sample_size: usize,

    /// CSV sample path (default: input path with a .csv extension)
    #[arg(long)]
    sample_out: Option<PathBuf>,

    /// Contact points, comma separated
    #[arg(short = 's', long = "hosts", value_delimiter = ',', default_value = "127.0.0.1")]
    hosts: Vec<String>,

    /// Username
    #[arg(short = 'u', long)]
    username: Option<String>,

    /// Password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Local datacenter
    #[arg(long)]
    dc: Option<String>,

    /// Keyspace (default: cellstream_<compression mode>)
    #[arg(long)]
    keyspace: Option<String>,

    /// Table name prefix
    #[arg(long, default_value = "table")]
    table_prefix: String,

    #[arg(long, default_value_t = 3)]
    replication_factor: u32,

    /// Create the keyspace without tablets
    #[arg(long)]
    no_tablets: bool,

    /// Compression mode: zdic, zstd, lz4, none (or 0-3)
    #[arg(short = 'M', long, default_value = "zdic")]
    compression: Compression,

    /// Drop the keyspace first
    #[arg(short = 'k', long)]
    drop_keyspace: bool,

    /// Write consistency level
    #[arg(short = 'c', long, default_value = "TWO")]
    consistency: Consistency,

    /// Maximum in-flight writes per batch
    #[arg(long, default_value_t = 50)]
    concurrency: usize,

    /// Abandon a batch at its first failed row
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    raise_on_first_error: bool,

    #[arg(long, value_enum, default_value_t = SinkArg::CqlScript)]
    sink: SinkArg,

    /// Output path of the CQL script sink
    #[arg(long, default_value = "cellstream.cql")]
    cql_out: PathBuf,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log: String,

    /// Append pipeline events to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Analysis report path
    #[arg(long, default_value = "streaming_analysis_report.txt")]
    report: PathBuf,

    /// Also write the statistics as JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Row-key column (default: first column)
    #[arg(long)]
    row_key_column: Option<String>,

    /// Explicit column families, comma separated (default: discovered)
    #[arg(long, value_delimiter = ',')]
    families: Vec<String>,

    /// Qualifiers listed in the report
    #[arg(long, default_value_t = 20)]
    top: usize,

    /// Errors kept verbatim in the report
    #[arg(long, default_value_t = 50)]
    error_samples: usize,

    /// Minimum severity that raises an alert
    #[arg(long, value_enum, default_value_t = AlertArg::Critical)]
    alert_severity: AlertArg,
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn pipeline_options(args: &Args) -> PipelineOptions {
    let mut opts = PipelineOptions::new(&args.file);
    opts.format = args.format.map(|f| match f {
        FormatArg::Json => SourceFormat::JsonLines,
        FormatArg::Parquet => SourceFormat::Parquet,
    });
    opts.key_column = match &args.row_key_column {
        Some(name) => KeyColumn::Named(name.clone()),
        None => KeyColumn::First,
    };
    opts.families = (!args.families.is_empty()).then(|| args.families.clone());
    opts.batch.batch_size = args.batch_size;
    opts.memory_ceiling_mb = args.max_memory_mb;
    opts.memory_check_interval = args.memory_check_interval;
    opts.progress_interval = args.progress_interval;
    opts.export_sample = args.export_csv;
    opts.sample_size = args.sample_size;
    opts.sample_path = args.sample_out.clone();
    opts.report_path = Some(args.report.clone());
    opts.stats_json_path = args.stats_json.clone();
    opts.error_sample_limit = args.error_samples;
    opts.top_qualifiers = args.top;
    opts.alert_threshold = match args.alert_severity {
        AlertArg::Warning => Some(Severity::Warning),
        AlertArg::Error => Some(Severity::Error),
        AlertArg::Critical => Some(Severity::Critical),
        AlertArg::Off => None,
    };
    opts
}

fn build_sink(args: &Args) -> EtlResult<Arc<dyn Sink>> {
    match args.sink {
        SinkArg::Memory => Ok(Arc::new(MemorySink::new())),
        SinkArg::CqlScript => {
            let cql = CqlOptions {
                keyspace: args
                    .keyspace
                    .clone()
                    .unwrap_or_else(|| format!("cellstream_{}", args.compression.short_name())),
                table_prefix: args.table_prefix.clone(),
                replication_factor: args.replication_factor,
                tablets: !args.no_tablets,
                compression: args.compression,
                drop_keyspace: args.drop_keyspace,
                consistency: args.consistency,
                concurrency: args.concurrency,
                raise_on_first_error: args.raise_on_first_error,
            };
            let target = ScriptTarget {
                contact_points: args.hosts.clone(),
                local_dc: args.dc.clone(),
                username: args.username.clone(),
            };
            tracing::info!(
                hosts = ?args.hosts,
                dc = ?args.dc,
                keyspace = %cql.keyspace,
                consistency = %cql.consistency,
                authenticated = args.password.is_some(),
                "writing cql script to {}",
                args.cql_out.display()
            );
            let session = ScriptSession::create(&args.cql_out, &target)
                .map_err(|e| EtlError::SinkLifecycle(SinkError::Session(e)))?;
            let sink = CqlSink::new(session, cql).map_err(EtlError::SinkLifecycle)?;
            Ok(Arc::new(sink))
        }
    }
}

fn run(args: &Args) -> EtlResult<()> {
    let opts = pipeline_options(args);
    let sink = build_sink(args)?;

    let mut observers: Vec<Arc<dyn PipelineObserver>> = vec![Arc::new(TracingObserver)];
    if let Some(path) = &args.log_file {
        observers.push(Arc::new(FileObserver::new(path)));
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(&interrupt))?;
    }

    let mut pipeline = Pipeline::new(opts, sink)
        .with_observer(Arc::new(CompositeObserver::new(observers)))
        .with_interrupt(interrupt);

    let result = pipeline.run();
    println!("{}", pipeline.statistics().render_report(args.top));
    let summary = result?;

    println!("Processing completed in {:.2}s ({:.1} records/sec)", summary.elapsed.as_secs_f64(), summary.rate());
    println!("\nGenerated Files:");
    println!("- {}: analysis report", args.report.display());
    if let Some(path) = &args.stats_json {
        println!("- {}: statistics (json)", path.display());
    }
    if let Some(sample) = summary.sample {
        let path = args
            .sample_out
            .clone()
            .unwrap_or_else(|| cellstream::export::default_sample_path(&args.file));
        println!("- {}: sample of {} rows from {} records", path.display(), sample.rows, sample.records);
    }
    if matches!(args.sink, SinkArg::CqlScript) {
        println!("- {}: cql script", args.cql_out.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(EtlError::Interrupted) => {
            tracing::warn!("processing interrupted by user");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!(error = %e, "streaming processing failed");
            ExitCode::FAILURE
        }
    }
}
