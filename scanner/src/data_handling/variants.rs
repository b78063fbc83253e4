//! Variant table input and chunking.
//!
//! The input is a header-less, tab-separated table of
//! `chromosome, position, id, reference, alternate`. Rows are grouped into
//! fixed-size chunks lazily, so the whole table never has to be held in
//! memory. Parsing happens inside the worker that owns a chunk; a row that
//! does not parse is reported against that chunk rather than failing the read.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bio_seq::prelude::{Dna, Seq};
use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};

use crate::errors::{ScanError, ScanResult};
use crate::models::Variant;

/// One unparsed input row and its 0-based row index.
#[derive(Debug, Clone)]
pub struct RawVariantRow {
    pub index: usize,
    pub record: Result<StringRecord, String>,
}

impl RawVariantRow {
    /// Best available identifier for reporting a row that failed to parse.
    pub fn report_id(&self) -> String {
        self.record
            .as_ref()
            .ok()
            .and_then(|r| r.get(2))
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("row_{}", self.index))
    }

    pub fn parse(&self) -> ScanResult<Variant> {
        let record = self
            .record
            .as_ref()
            .map_err(|e| ScanError::MalformedVariant(e.clone()))?;
        parse_variant(record)
    }
}

/// Contiguous slice of the input, the unit of parallel work.
#[derive(Debug, Clone)]
pub struct VariantChunk {
    pub start_index: usize,
    /// Inclusive.
    pub end_index: usize,
    pub rows: Vec<RawVariantRow>,
}

pub fn parse_variant(record: &StringRecord) -> ScanResult<Variant> {
    if record.len() < 5 {
        return Err(ScanError::MalformedVariant(format!(
            "expected 5 fields, found {}",
            record.len()
        )));
    }
    let field = |i: usize| record.get(i).unwrap_or_default().trim();

    let chrom = field(0);
    if chrom.is_empty() {
        return Err(ScanError::MalformedVariant("empty chromosome".into()));
    }
    let pos: u64 = field(1)
        .parse()
        .map_err(|_| ScanError::MalformedVariant(format!("bad position '{}'", field(1))))?;
    if pos == 0 {
        return Err(ScanError::MalformedVariant("position must be 1-based".into()));
    }

    Ok(Variant {
        chrom: chrom.to_string(),
        pos,
        id: field(2).to_string(),
        reference: normalize_allele(field(3))?,
        alternate: normalize_allele(field(4))?,
    })
}

/// Upper-cases an allele and checks it is a plain DNA string.
pub fn normalize_allele(allele: &str) -> ScanResult<String> {
    let upper = allele.to_ascii_uppercase();
    if upper.is_empty() {
        return Err(ScanError::MalformedVariant("empty allele".into()));
    }
    Seq::<Dna>::try_from(upper.as_str())
        .map_err(|_| ScanError::MalformedVariant(format!("allele '{}' is not DNA", allele)))?;
    Ok(upper)
}

/// Lazily yields [`VariantChunk`]s from a variant table.
pub struct VariantChunks<R: Read> {
    records: StringRecordsIntoIter<R>,
    chunksize: usize,
    next_index: usize,
    end_row: Option<usize>,
}

impl VariantChunks<File> {
    /// Opens `path`, skipping rows before `start_row` and stopping before `end_row`.
    pub fn from_path(
        path: &Path,
        chunksize: usize,
        start_row: Option<usize>,
        end_row: Option<usize>,
    ) -> ScanResult<Self> {
        let file = File::open(path)?;
        Ok(Self::new(file, chunksize, start_row, end_row))
    }
}

impl<R: Read> VariantChunks<R> {
    pub fn new(reader: R, chunksize: usize, start_row: Option<usize>, end_row: Option<usize>) -> Self {
        let mut records = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(reader)
            .into_records();

        let start = start_row.unwrap_or(0);
        for _ in 0..start {
            if records.next().is_none() {
                break;
            }
        }

        VariantChunks {
            records,
            chunksize: chunksize.max(1),
            next_index: start,
            end_row,
        }
    }
}

impl<R: Read> Iterator for VariantChunks<R> {
    type Item = VariantChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let start_index = self.next_index;
        let mut rows = Vec::with_capacity(self.chunksize);

        while rows.len() < self.chunksize {
            if self.end_row.is_some_and(|end| self.next_index >= end) {
                break;
            }
            let Some(record) = self.records.next() else {
                break;
            };
            rows.push(RawVariantRow {
                index: self.next_index,
                record: record.map_err(|e| e.to_string()),
            });
            self.next_index += 1;
        }

        if rows.is_empty() {
            return None;
        }
        Some(VariantChunk {
            start_index,
            end_index: start_index + rows.len() - 1,
            rows,
        })
    }
}
