pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod field;
pub mod io_utils;
pub mod pipeline;
pub mod quality;
pub mod record;
pub mod report;
pub mod schema;
pub mod transform;

use std::{env, io::Write, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use encoding_rs::UTF_8;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::{CleanerConfig, OutputFormat},
    io_utils::{DEFAULT_OUTPUT_DELIMITER, printable_delimiter},
    pipeline::Pipeline,
    report::render_table,
    transform::{ParamSpec, TransformKind},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("ticket_cleaner", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Clean(args) => handle_clean(&args),
        Commands::Check(args) => handle_check(&args),
        Commands::Transforms(args) => handle_transforms(&args),
    }
}

fn load_pipeline(path: &std::path::Path) -> Result<Pipeline> {
    let config = CleanerConfig::load(path)?;
    info!(
        "Loaded configuration for {} field(s) from {:?}",
        config.schema.len(),
        path
    );
    Pipeline::new(config).with_context(|| format!("Validating configuration {path:?}"))
}

fn handle_clean(args: &cli::CleanArgs) -> Result<()> {
    let pipeline = load_pipeline(&args.config)?.with_workers(args.workers);
    let output = &pipeline.config().output;
    let output_path = args.output.clone().or_else(|| output.file_name.clone());
    let format = args.format.map(OutputFormat::from).unwrap_or(output.format);
    let delimiter = match (args.output_delimiter, output.delimiter) {
        (Some(delimiter), _) => delimiter,
        (None, Some(ch)) => u8::try_from(ch)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| anyhow!("Output delimiter '{ch}' must be ASCII"))?,
        (None, None) => DEFAULT_OUTPUT_DELIMITER,
    };
    let input_encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let output_encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;

    let rows = io_utils::read_rows(&args.input, args.delimiter, input_encoding)?;
    info!("Read {} row(s) from {:?}", rows.len(), args.input);

    let report = pipeline.run(&rows);
    let fields = pipeline.output_fields();
    let to_stdout = output_path
        .as_deref()
        .is_none_or(io_utils::is_dash);
    let writer = io_utils::open_output(output_path.as_deref(), output_encoding)?;
    match format {
        OutputFormat::Csv => {
            debug!("Writing CSV with delimiter '{}'", printable_delimiter(delimiter));
            io_utils::write_csv(writer, delimiter, &fields, &report.records)
        }
        OutputFormat::Jsonl => io_utils::write_jsonl(writer, &report.records),
    }
    .context("Writing clean records")?;
    if let Some(path) = &output_path
        && !to_stdout
    {
        info!("Wrote {} record(s) to {:?}", report.records.len(), path);
    }

    if let Some(path) = &args.diagnostics {
        let writer = io_utils::open_output(Some(path), UTF_8)?;
        io_utils::write_diagnostics(writer, delimiter, &report.diagnostics)
            .with_context(|| format!("Writing diagnostics to {path:?}"))?;
        info!(
            "Wrote {} diagnostic(s) to {:?}",
            report.diagnostics.len(),
            path
        );
    }

    if !args.quiet {
        let rendered = report.summary.render();
        if to_stdout {
            eprint!("{rendered}");
        } else {
            print!("{rendered}");
            std::io::stdout().flush()?;
        }
    }
    Ok(())
}

fn handle_check(args: &cli::CheckArgs) -> Result<()> {
    let pipeline = load_pipeline(&args.config)?;
    let rows = pipeline
        .plans()
        .iter()
        .map(|plan| {
            let chain = plan
                .chain
                .iter()
                .map(|step| step.name())
                .collect::<Vec<_>>()
                .join(" -> ");
            vec![
                plan.field.clone(),
                plan.field_type.to_string(),
                plan.source.clone(),
                chain,
            ]
        })
        .collect::<Vec<_>>();
    print!(
        "{}",
        render_table(&["field", "type", "source", "transforms"], &rows)
    );
    println!("Configuration OK: {} field(s)", rows.len());
    Ok(())
}

fn handle_transforms(args: &cli::TransformsArgs) -> Result<()> {
    match args.name.as_deref() {
        Some(name) => {
            let Some(kind) = transform::kind(name) else {
                bail!("Unknown transform '{name}'");
            };
            println!("{}: {}", kind.name, kind.summary);
            println!("null input: {}", kind.null_rule.as_str());
            if !kind.params.is_empty() {
                let rows = kind.params.iter().map(param_row).collect::<Vec<_>>();
                print!(
                    "{}",
                    render_table(&["param", "kind", "required", "default"], &rows)
                );
            }
        }
        None => {
            let rows = transform::catalog()
                .iter()
                .map(catalog_row)
                .collect::<Vec<_>>();
            print!(
                "{}",
                render_table(&["transform", "params", "null input", "summary"], &rows)
            );
        }
    }
    Ok(())
}

fn param_row(param: &ParamSpec) -> Vec<String> {
    vec![
        param.name.to_string(),
        param.kind.to_string(),
        if param.required { "yes" } else { "no" }.to_string(),
        param.default.unwrap_or_default().to_string(),
    ]
}

fn catalog_row(kind: &TransformKind) -> Vec<String> {
    let params = kind
        .params
        .iter()
        .map(|param| {
            if param.required {
                param.name.to_string()
            } else {
                format!("[{}]", param.name)
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    vec![
        kind.name.to_string(),
        params,
        kind.null_rule.as_str().to_string(),
        kind.summary.to_string(),
    ]
}
