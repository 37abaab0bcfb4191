use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Clean help-desk ticket tables with declarative field pipelines",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Map, cast and quality-check a ticket table into clean records
    Clean(CleanArgs),
    /// Validate a cleaning configuration without reading any data
    Check(CheckArgs),
    /// List the available transforms and their parameters
    Transforms(TransformsArgs),
}

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Input CSV file (use '-' for stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Cleaning configuration (YAML)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// Output file (overrides the configuration; '-' for stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Output format (overrides the configuration)
    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,
    /// Input delimiter (sniffed from the header when omitted)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Output delimiter for CSV (defaults to ';')
    #[arg(long = "output-delimiter", value_parser = parse_delimiter)]
    pub output_delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for the output file/stdout (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
    /// Write one line per diagnostic to this CSV file
    #[arg(long = "diagnostics")]
    pub diagnostics: Option<PathBuf>,
    /// Worker threads for the mapping pass (0 uses every core)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
    /// Skip the summary tables
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Cleaning configuration (YAML)
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
}

#[derive(Debug, Args)]
pub struct TransformsArgs {
    /// Show the parameters of a single transform
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Csv,
    Jsonl,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => OutputFormat::Csv,
            FormatArg::Jsonl => OutputFormat::Jsonl,
        }
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delimiter_accepts_names_and_symbols() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("semicolon"), Ok(b';'));
        assert_eq!(parse_delimiter("#"), Ok(b'#'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("ñ").is_err());
    }

    #[test]
    fn clean_args_parse_overrides() {
        let cli = Cli::try_parse_from([
            "ticket-cleaner",
            "clean",
            "-i",
            "in.csv",
            "-c",
            "cfg.yaml",
            "--format",
            "jsonl",
            "--workers",
            "2",
        ])
        .expect("parse");
        let Commands::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert_eq!(args.format, Some(FormatArg::Jsonl));
        assert_eq!(args.workers, 2);
        assert!(args.output.is_none());
    }
}
