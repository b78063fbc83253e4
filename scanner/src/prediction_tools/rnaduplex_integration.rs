//! Batch folding of transcript windows against microRNAs with RNAduplex.
//!
//! One chunk becomes one batch file holding every (window, microRNA, state)
//! job, so the folding binary starts once per chunk instead of once per job.
//! The raw predictions are captured into a temporary file and reshaped into
//! the 10-column structured table the feature builder reads back.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use polars::prelude::*;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::data_handling::reference_tables::MirnaCatalog;
use crate::errors::{ScanError, ScanResult};
use crate::helper_functions::{f64_values, i64_values, read_csv_with_schema, str_values};
use crate::models::{DuplexJob, DuplexResult, MutationState, SequenceWindow, Variant};
use crate::schema::DUPLEX_COLUMNS;

const RNADUPLEX_BINARY: &str = "RNAduplex";

#[derive(Debug, Clone)]
pub struct RnaduplexOptions {
    pub binary: PathBuf,
}

impl RnaduplexOptions {
    /// Uses `explicit` when given, otherwise looks the binary up on `PATH`.
    ///
    /// A binary that cannot be found is not an error here: every chunk will
    /// report the failed invocation in its manifest entry instead.
    pub fn resolve(explicit: Option<&Path>) -> Self {
        let binary = match explicit {
            Some(path) => path.to_path_buf(),
            None => match which::which(RNADUPLEX_BINARY) {
                Ok(path) => path,
                Err(e) => {
                    warn!("{} not found on PATH ({}); folding will fail", RNADUPLEX_BINARY, e);
                    PathBuf::from(RNADUPLEX_BINARY)
                }
            },
        };
        info!("Using folding binary {}", binary.display());
        RnaduplexOptions { binary }
    }
}

/// All wild-type jobs, then all mutant jobs: `2 × candidates × catalog`.
pub fn compile_jobs<'a>(
    candidates: &'a [(Variant, SequenceWindow)],
    catalog: &'a MirnaCatalog,
) -> impl Iterator<Item = DuplexJob<'a>> + 'a {
    MutationState::BOTH.into_iter().flat_map(move |state| {
        candidates.iter().flat_map(move |(_, window)| {
            catalog.entries().iter().map(move |mirna| DuplexJob {
                long_sequence: window.sequence(state),
                short_sequence: &mirna.sequence,
                long_id: &window.variant_id,
                short_id: &mirna.accession,
                state,
            })
        })
    })
}

/// Writes jobs as blank-line separated two-sequence FASTA records.
pub fn write_batch<'a, W: Write>(jobs: impl Iterator<Item = DuplexJob<'a>>, writer: W) -> ScanResult<usize> {
    let mut writer = BufWriter::new(writer);
    let mut count = 0;
    for job in jobs {
        write!(
            writer,
            ">{}\n{}\n{}\n\n",
            job.header(),
            job.long_sequence,
            job.short_sequence
        )?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

/// Runs the folding binary with `batch` on stdin; stdout lands in a temporary
/// file inside `scratch_dir` that is removed when the handle drops.
pub fn run_rnaduplex(options: &RnaduplexOptions, batch: &Path, scratch_dir: &Path) -> ScanResult<NamedTempFile> {
    let tool_error = |reason: String| ScanError::DuplexTool {
        input: batch.to_path_buf(),
        reason,
    };

    let input = File::open(batch)?;
    let raw = NamedTempFile::new_in(scratch_dir)?;

    debug!("Executing {} < {}", options.binary.display(), batch.display());
    let output = Command::new(&options.binary)
        .stdin(Stdio::from(input))
        .stdout(Stdio::from(raw.as_file().try_clone()?))
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => tool_error(format!("{} not found", options.binary.display())),
            _ => tool_error(e.to_string()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("RNAduplex STDERR: {}", stderr);
        return Err(tool_error(format!("exited with status {}", output.status)));
    }
    Ok(raw)
}

/// Parsed `structure  l_start,l_end  :  s_start,s_end  (energy)` line.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplexStructure {
    pub mrna_dot_bracket: String,
    pub mirna_dot_bracket: String,
    pub mrna_start: usize,
    pub mrna_end: usize,
    pub mirna_start: usize,
    pub mirna_end: usize,
    pub energy: f64,
}

fn parse_span(token: &str, line: &str) -> ScanResult<(usize, usize)> {
    let bad = || ScanError::DuplexParse(line.to_string());
    let (start, end) = token.split_once(',').ok_or_else(bad)?;
    let start: usize = start.parse().map_err(|_| bad())?;
    let end: usize = end.parse().map_err(|_| bad())?;
    // 1-based inclusive on the wire, 0-based half-open from here on
    Ok((start.saturating_sub(1), end))
}

pub fn parse_structure_line(line: &str) -> ScanResult<DuplexStructure> {
    let bad = || ScanError::DuplexParse(line.to_string());
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 5 {
        return Err(bad());
    }

    let (mrna_db, mirna_db) = tokens[0].split_once('&').ok_or_else(bad)?;
    let (mrna_start, mrna_end) = parse_span(tokens[1], line)?;
    let (mirna_start, mirna_end) = parse_span(tokens[3], line)?;

    // positive energies are printed as "( 1.23)", which splits into two tokens
    let energy_text = tokens[4..].concat();
    let energy: f64 = energy_text
        .trim_matches(|c| c == '(' || c == ')')
        .trim()
        .parse()
        .map_err(|_| bad())?;

    Ok(DuplexStructure {
        mrna_dot_bracket: mrna_db.to_string(),
        mirna_dot_bracket: mirna_db.to_string(),
        mrna_start,
        mrna_end,
        mirna_start,
        mirna_end,
        energy,
    })
}

/// Splits a `{variant}-{accession}-{state}` batch header.
pub fn parse_header(header: &str) -> ScanResult<(String, String, MutationState)> {
    let mut parts = header.trim().rsplitn(3, '-');
    let (Some(state), Some(accession), Some(mutation_id)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ScanError::DuplexParse(header.to_string()));
    };
    Ok((mutation_id.to_string(), accession.to_string(), state.parse()?))
}

fn to_result(header: &str, structure: Option<&str>) -> ScanResult<DuplexResult> {
    let (mutation_id, accession, state) = parse_header(header)?;
    let parsed = match structure.map(parse_structure_line) {
        Some(Ok(parsed)) => parsed,
        Some(Err(e)) => {
            warn!("{}; using an empty duplex for {}", e, header);
            return Ok(DuplexResult::placeholder(&mutation_id, &accession, state));
        }
        None => return Ok(DuplexResult::placeholder(&mutation_id, &accession, state)),
    };

    Ok(DuplexResult {
        mutation_id,
        mirna_accession: accession,
        mrna_dot_bracket: parsed.mrna_dot_bracket,
        mirna_dot_bracket: parsed.mirna_dot_bracket,
        mrna_start: parsed.mrna_start,
        mrna_end: parsed.mrna_end,
        mirna_start: parsed.mirna_start,
        mirna_end: parsed.mirna_end,
        pred_energy: parsed.energy,
        state,
    })
}

/// Streams raw folding output into one structured CSV row per record.
///
/// A header without a structure line still yields a (placeholder) row, so
/// every submitted job has exactly one row.
pub fn transform_output<R: BufRead, W: Write>(raw: R, writer: W) -> ScanResult<usize> {
    let mut out = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
    let mut pending: Option<String> = None;
    let mut rows = 0;

    for line in raw.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(header) = trimmed.strip_prefix('>') {
            if let Some(previous) = pending.replace(header.to_string()) {
                out.serialize(to_result(&previous, None)?)?;
                rows += 1;
            }
            continue;
        }
        match pending.take() {
            Some(header) => {
                out.serialize(to_result(&header, Some(trimmed))?)?;
                rows += 1;
            }
            None => warn!("Ignoring RNAduplex line without a record header: {}", trimmed),
        }
    }
    if let Some(header) = pending {
        out.serialize(to_result(&header, None)?)?;
        rows += 1;
    }
    out.flush()?;
    Ok(rows)
}

fn duplex_schema() -> Schema {
    let dtypes = [
        DataType::String,
        DataType::String,
        DataType::String,
        DataType::String,
        DataType::Int64,
        DataType::Int64,
        DataType::Int64,
        DataType::Int64,
        DataType::Float64,
        DataType::String,
    ];
    Schema::from_iter(
        DUPLEX_COLUMNS
            .iter()
            .zip(dtypes)
            .map(|(name, dtype)| Field::new((*name).into(), dtype)),
    )
}

/// Reads the structured table written by [`transform_output`].
pub fn load_duplex_results(path: &Path) -> ScanResult<Vec<DuplexResult>> {
    let df = read_csv_with_schema(path, duplex_schema())?;
    let [mutation_id, mirna_accession, mrna_db, mirna_db, mrna_start, mrna_end, mirna_start, mirna_end, energy, state] =
        DUPLEX_COLUMNS;

    let ids = str_values(&df, mutation_id)?;
    let accessions = str_values(&df, mirna_accession)?;
    let mrna_dbs = str_values(&df, mrna_db)?;
    let mirna_dbs = str_values(&df, mirna_db)?;
    let mrna_starts = i64_values(&df, mrna_start)?;
    let mrna_ends = i64_values(&df, mrna_end)?;
    let mirna_starts = i64_values(&df, mirna_start)?;
    let mirna_ends = i64_values(&df, mirna_end)?;
    let energies = f64_values(&df, energy)?;
    let states = str_values(&df, state)?;

    let coord = |v: Option<i64>| v.unwrap_or(0).max(0) as usize;
    (0..df.height())
        .map(|i| {
            Ok(DuplexResult {
                mutation_id: ids[i].clone(),
                mirna_accession: accessions[i].clone(),
                mrna_dot_bracket: mrna_dbs[i].clone(),
                mirna_dot_bracket: mirna_dbs[i].clone(),
                mrna_start: coord(mrna_starts[i]),
                mrna_end: coord(mrna_ends[i]),
                mirna_start: coord(mirna_starts[i]),
                mirna_end: coord(mirna_ends[i]),
                pred_energy: energies[i].unwrap_or(0.0),
                state: states[i].parse()?,
            })
        })
        .collect()
}

/// Folds one chunk's batch file and returns its structured rows.
pub fn fold_batch(
    options: &RnaduplexOptions,
    batch: &Path,
    scratch_dir: &Path,
    structured: &Path,
) -> ScanResult<Vec<DuplexResult>> {
    let raw = run_rnaduplex(options, batch, scratch_dir)?;

    debug!("Reshaping RNAduplex output for {}", batch.display());
    let rows = transform_output(BufReader::new(File::open(raw.path())?), File::create(structured)?)?;
    if rows == 0 {
        return Ok(Vec::new());
    }
    load_duplex_results(structured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MicroRna;

    fn catalog() -> MirnaCatalog {
        MirnaCatalog::new(
            ["MIMAT1", "MIMAT2", "MIMAT3"]
                .iter()
                .map(|a| MicroRna {
                    accession: a.to_string(),
                    sequence: "UGAGGUAGUAGGUUGUAUAGUU".into(),
                    conservation: None,
                })
                .collect(),
        )
    }

    fn candidates(k: usize) -> Vec<(Variant, SequenceWindow)> {
        (0..k)
            .map(|i| {
                let id = format!("rs{}_1_{}_A_G", i, 100 + i);
                (
                    Variant {
                        chrom: "1".into(),
                        pos: 100 + i as u64,
                        id: id.clone(),
                        reference: "A".into(),
                        alternate: "G".into(),
                    },
                    SequenceWindow {
                        variant_id: id,
                        upstream: "CAT".into(),
                        downstream: "GCA".into(),
                        wild_type: "CATAGCA".into(),
                        mutant: "CATGGCA".into(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn job_count_is_two_k_m() {
        let catalog = catalog();
        for k in [0, 1, 4] {
            let cands = candidates(k);
            assert_eq!(compile_jobs(&cands, &catalog).count(), 2 * k * catalog.len());
        }
    }

    #[test]
    fn wild_type_batch_precedes_mutant_batch() {
        let catalog = catalog();
        let cands = candidates(2);
        let states: Vec<_> = compile_jobs(&cands, &catalog).map(|j| j.state).collect();
        let half = states.len() / 2;
        assert!(states[..half].iter().all(|s| *s == MutationState::WildType));
        assert!(states[half..].iter().all(|s| *s == MutationState::Mutant));
    }

    #[test]
    fn batch_records_are_blank_line_separated() {
        let catalog = catalog();
        let cands = candidates(1);
        let mut buf = Vec::new();
        let n = write_batch(compile_jobs(&cands, &catalog).take(1), &mut buf).unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            ">rs0_1_100_A_G-MIMAT1-wt\nCATAGCA\nUGAGGUAGUAGGUUGUAUAGUU\n\n"
        );
    }

    #[test]
    fn negative_energy_keeps_its_sign() {
        let s = parse_structure_line("((((...))))&....   1,11  :   3,6   (-5.20)").unwrap();
        assert_eq!(s.mrna_dot_bracket, "((((...))))");
        assert_eq!(s.mirna_dot_bracket, "....");
        assert_eq!((s.mrna_start, s.mrna_end), (0, 11));
        assert_eq!((s.mirna_start, s.mirna_end), (2, 6));
        assert_eq!(s.energy, -5.20);
    }

    #[test]
    fn near_zero_positive_energy_is_retokenized() {
        let s = parse_structure_line(".((.&.)).   4,7  :   2,5   ( 0.0163)").unwrap();
        assert_eq!(s.energy, 0.0163);
        assert_eq!((s.mrna_start, s.mrna_end), (3, 7));
    }

    #[test]
    fn header_split_keeps_underscored_variant_id() {
        let (id, acc, state) = parse_header("rs1_chr1_100_A_G-MIMAT0000062-mt").unwrap();
        assert_eq!(id, "rs1_chr1_100_A_G");
        assert_eq!(acc, "MIMAT0000062");
        assert_eq!(state, MutationState::Mutant);
        assert!(parse_header("garbage").is_err());
    }

    #[test]
    fn transform_emits_one_row_per_record() {
        let raw = ">rs1_1_100_A_G-MIMAT1-wt\n\
                   ((((&))))   1,4  :   2,5   (-3.10)\n\
                   >rs1_1_100_A_G-MIMAT1-mut\n\
                   >rs1_1_100_A_G-MIMAT2-mut\n\
                   not a structure line\n";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rnad.csv");

        let rows = transform_output(raw.as_bytes(), File::create(&path).unwrap()).unwrap();
        assert_eq!(rows, 3);

        let results = load_duplex_results(&path).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].pred_energy, -3.10);
        assert_eq!(results[0].mirna_start, 1);
        assert_eq!(results[0].state, MutationState::WildType);
        assert_eq!(
            results[1],
            DuplexResult::placeholder("rs1_1_100_A_G", "MIMAT1", MutationState::Mutant)
        );
        assert_eq!(results[2].mirna_accession, "MIMAT2");
        assert_eq!(results[2].pred_energy, 0.0);
    }

    #[test]
    fn missing_binary_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let batch = dir.path().join("batch.fa");
        std::fs::write(&batch, ">a-b-wt\nACGU\nACGU\n\n").unwrap();
        let options = RnaduplexOptions {
            binary: dir.path().join("no_such_binary"),
        };
        let result = run_rnaduplex(&options, &batch, dir.path());
        assert!(matches!(result, Err(ScanError::DuplexTool { .. })));
    }
}
