use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::data_handling::variants::VariantChunks;
use crate::errors::ScanResult;
use crate::pipeline::{process_chunk, ChunkOutcome, ChunkStatus, ScanContext};

pub const MANIFEST_FILE: &str = "chunk_manifest.csv";

#[derive(Debug)]
pub struct RunSummary {
    pub outcomes: Vec<ChunkOutcome>,
    pub manifest: PathBuf,
    pub invalid_rows: PathBuf,
}

impl RunSummary {
    pub fn failed_chunks(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ChunkStatus::Failed { .. }))
            .count()
    }
}

#[derive(Serialize)]
struct ManifestRow<'a> {
    start_index: usize,
    end_index: usize,
    status: &'static str,
    variants: usize,
    invalid: usize,
    case_2: usize,
    result_rows: usize,
    elapsed_ms: u64,
    cause: &'a str,
}

/// Runs every chunk of the input on a pool of `config.workers` threads.
///
/// Chunks finish in any order; the returned outcomes and the manifest are
/// sorted by start index. A failing chunk is recorded, never fatal.
pub fn run_scan(ctx: &ScanContext) -> ScanResult<RunSummary> {
    let config = &ctx.config;
    let chunks = VariantChunks::from_path(&config.variants, config.chunksize, config.start_row, config.end_row)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()?;

    info!(
        "Scanning {} with {} workers, {} variants per chunk",
        config.variants.display(),
        config.workers,
        config.chunksize
    );
    let started = Instant::now();

    let mut outcomes: Vec<ChunkOutcome> = pool.install(|| {
        chunks
            .par_bridge()
            .map(|chunk| process_chunk(ctx, chunk))
            .collect()
    });
    outcomes.sort_by_key(|o| o.start_index);

    let manifest = write_manifest(&ctx.run_dir.join(MANIFEST_FILE), &outcomes)?;
    let invalid_rows = write_invalid_rows(
        &ctx.run_dir.join(format!("invalid_rows_{}.csv", ctx.vcf_id)),
        &outcomes,
    )?;

    let summary = RunSummary {
        outcomes,
        manifest,
        invalid_rows,
    };
    let significant: usize = summary.outcomes.iter().map(|o| o.status.result_rows()).sum();
    info!(
        "Processed {} chunks in {:.2?}: {} significant pairs",
        summary.outcomes.len(),
        started.elapsed(),
        significant
    );
    if summary.failed_chunks() > 0 {
        warn!(
            "{} chunks failed; see {}",
            summary.failed_chunks(),
            summary.manifest.display()
        );
    }
    Ok(summary)
}

fn write_manifest(path: &Path, outcomes: &[ChunkOutcome]) -> ScanResult<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    for o in outcomes {
        wtr.serialize(ManifestRow {
            start_index: o.start_index,
            end_index: o.end_index,
            status: o.status.label(),
            variants: o.variants,
            invalid: o.invalid.len(),
            case_2: o.case_2,
            result_rows: o.status.result_rows(),
            elapsed_ms: o.elapsed.as_millis() as u64,
            cause: o.status.cause().unwrap_or_default(),
        })?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}

fn write_invalid_rows(path: &Path, outcomes: &[ChunkOutcome]) -> ScanResult<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["id", "reason"])?;
    let mut total = 0;
    for invalid in outcomes.iter().flat_map(|o| &o.invalid) {
        wtr.write_record([invalid.id.as_str(), invalid.reason.as_str()])?;
        total += 1;
    }
    wtr.flush()?;
    if total > 0 {
        info!("{} invalid rows written to {}", total, path.display());
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper_functions::{i64_values, read_csv, str_values};
    use crate::pipeline::tests::context;
    use std::fs;

    #[test]
    fn manifest_lists_every_chunk_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), dir.path().join("missing"));
        fs::write(
            &ctx.config.variants,
            "1\t100\trs1\tA\tG\n\
             1\t101\trs2\tC\tT\n\
             7\t100\trs3\tA\tG\n\
             1\t160\trs4\tT\tC\n\
             1\tx\trs5\tA\tG\n",
        )
        .unwrap();
        ctx.config.chunksize = 2;
        ctx.config.workers = 3;
        ctx.config.skip_folding = true;

        let summary = run_scan(&ctx).unwrap();
        let starts: Vec<_> = summary.outcomes.iter().map(|o| o.start_index).collect();
        assert_eq!(starts, vec![0, 2, 4]);
        assert_eq!(summary.failed_chunks(), 1);

        let manifest = read_csv(&summary.manifest).unwrap();
        assert_eq!(
            str_values(&manifest, "status").unwrap(),
            vec!["skipped", "failed", "skipped"]
        );
        assert_eq!(
            i64_values(&manifest, "case_2").unwrap(),
            vec![Some(0), Some(0), Some(0)]
        );

        let invalid = read_csv(&summary.invalid_rows).unwrap();
        assert_eq!(
            str_values(&invalid, "id").unwrap(),
            vec!["rs2_1_101_C_T", "rs5"]
        );
    }
}
