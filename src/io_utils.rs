//! Reading ticket tables into raw rows and writing clean records back out.
//!
//! - **Input**: a CSV path or `-` for stdin, decoded to UTF-8 through
//!   `encoding_rs_io`. The delimiter comes from the caller, the `.tsv`
//!   extension, or a sniff of the header line.
//! - **Output**: CSV (`;` by default) or JSON Lines, transcoded when a
//!   non-UTF-8 output encoding is requested.
//! - **Diagnostics**: an optional CSV with one line per diagnostic.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;
use log::debug;
use serde::{Serialize, Serializer, ser::SerializeMap};

use crate::{
    data::{RawRow, RawValue},
    record::CleanRecord,
    report::{Diagnostic, DiagnosticKind},
};

pub const DEFAULT_INPUT_DELIMITER: u8 = b',';
pub const DEFAULT_OUTPUT_DELIMITER: u8 = b';';
const SNIFF_CANDIDATES: [u8; 4] = [b',', b';', b'\t', b'|'];

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Picks the candidate that occurs most often in `header_line`, outside
/// quotes. Ties go to the earlier candidate; no candidate at all means `,`.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let mut counts = [0usize; SNIFF_CANDIDATES.len()];
    let mut quoted = false;
    for byte in header_line.bytes() {
        if byte == b'"' {
            quoted = !quoted;
        } else if !quoted && let Some(idx) = SNIFF_CANDIDATES.iter().position(|c| *c == byte) {
            counts[idx] += 1;
        }
    }
    let (best, count) = counts
        .iter()
        .enumerate()
        .fold((0, 0), |best, (idx, &count)| {
            if count > best.1 { (idx, count) } else { best }
        });
    if count == 0 {
        DEFAULT_INPUT_DELIMITER
    } else {
        SNIFF_CANDIDATES[best]
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>, header_line: &str) -> u8 {
    if let Some(delimiter) = provided {
        return delimiter;
    }
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => sniff_delimiter(header_line),
    }
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    if is_dash(path) {
        Ok(Box::new(io::stdin().lock()))
    } else {
        let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Reads the whole table. Header names become column names, blank cells
/// become [`RawValue::Blank`] and short rows leave their trailing columns out.
pub fn read_rows(
    path: &Path,
    delimiter: Option<u8>,
    encoding: &'static Encoding,
) -> Result<Vec<RawRow>> {
    let mut decoder = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(open_input(path)?);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .with_context(|| format!("Decoding {path:?} as {}", encoding.name()))?;
    let header_line = text.lines().next().unwrap_or_default();
    let delimiter = resolve_input_delimiter(path, delimiter, header_line);
    debug!("Reading {path:?} with delimiter '{}'", printable_delimiter(delimiter));
    parse_rows(&text, delimiter).with_context(|| format!("Reading CSV rows from {path:?}"))
}

pub fn parse_rows(text: &str, delimiter: u8) -> Result<Vec<RawRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.trim().to_string())
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Parsing data row {}", idx + 1))?;
        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.clone(), cell_value(cell)))
            .collect::<BTreeMap<_, _>>();
        rows.push(RawRow::new(cells));
    }
    Ok(rows)
}

fn cell_value(cell: &str) -> RawValue {
    if cell.trim().is_empty() {
        RawValue::Blank
    } else {
        RawValue::Text(cell.to_string())
    }
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "tab".to_string(),
        other => (other as char).to_string(),
    }
}

/// Opens `path` for writing, or stdout for `None` and `-`.
pub fn open_output(path: Option<&Path>, encoding: &'static Encoding) -> Result<Box<dyn Write>> {
    let base: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout()),
    };
    if encoding == UTF_8 {
        Ok(base)
    } else {
        Ok(Box::new(TranscodingWriter::new(base, encoding)))
    }
}

fn csv_writer<W: Write>(writer: W, delimiter: u8) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .from_writer(writer)
}

/// One column per schema field. Null and omitted values are empty cells.
pub fn write_csv<W: Write>(
    writer: W,
    delimiter: u8,
    fields: &[String],
    records: &[CleanRecord],
) -> Result<()> {
    let mut writer = csv_writer(writer, delimiter);
    writer.write_record(fields)?;
    for record in records {
        writer.write_record(fields.iter().map(|field| {
            record
                .get(field)
                .map(|value| value.as_display())
                .unwrap_or_default()
        }))?;
    }
    writer.flush().context("Flushing CSV output")?;
    Ok(())
}

/// Serializes a record as a JSON object in field order.
struct JsonRecord<'a>(&'a CleanRecord);

impl Serialize for JsonRecord<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.fields.len()))?;
        for (name, value) in &self.0.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One JSON object per record. Omitted fields are absent, nulls are `null`.
pub fn write_jsonl<W: Write>(mut writer: W, records: &[CleanRecord]) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut writer, &JsonRecord(record))?;
        writer.write_all(b"\n")?;
    }
    writer.flush().context("Flushing JSONL output")?;
    Ok(())
}

pub fn write_diagnostics<W: Write>(
    writer: W,
    delimiter: u8,
    diagnostics: &[Diagnostic],
) -> Result<()> {
    let mut writer = csv_writer(writer, delimiter);
    writer.write_record(["row", "field", "kind", "value", "superseded_by", "message"])?;
    for diagnostic in diagnostics {
        let superseded_by = match diagnostic.kind {
            DiagnosticKind::Superseded { by } => by.to_string(),
            _ => String::new(),
        };
        writer.write_record([
            diagnostic.origin.to_string().as_str(),
            diagnostic.field.as_deref().unwrap_or_default(),
            diagnostic.kind.as_str(),
            diagnostic.value.as_deref().unwrap_or_default(),
            superseded_by.as_str(),
            diagnostic.message.as_str(),
        ])?;
    }
    writer.flush().context("Flushing diagnostics output")?;
    Ok(())
}

/// Re-encodes UTF-8 bytes into `encoding`, holding back an incomplete
/// trailing sequence until the next write.
struct TranscodingWriter<W: Write> {
    inner: W,
    encoding: &'static Encoding,
    pending: Vec<u8>,
}

impl<W: Write> TranscodingWriter<W> {
    fn new(inner: W, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            pending: Vec::new(),
        }
    }

    fn drain_valid(&mut self) -> io::Result<()> {
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(err) if err.error_len().is_some() => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid UTF-8 sequence in output stream",
                ));
            }
            Err(err) => err.valid_up_to(),
        };
        if valid_up_to == 0 {
            return Ok(());
        }
        let rest = self.pending.split_off(valid_up_to);
        let text = String::from_utf8_lossy(&self.pending);
        let (encoded, _, had_errors) = self.encoding.encode(&text);
        if had_errors {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to encode text using {}", self.encoding.name()),
            ));
        }
        self.inner.write_all(&encoded)?;
        self.pending = rest;
        Ok(())
    }
}

impl<W: Write> Write for TranscodingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain_valid()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drain_valid()?;
        if !self.pending.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Incomplete UTF-8 sequence at end of output stream",
            ));
        }
        self.inner.flush()
    }
}
