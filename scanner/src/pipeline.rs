//! Sequential analysis of one variant chunk, windows through scores.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::analysis::features::{build_features, feature_frame};
use crate::analysis::prefilter::{classify_variants, InMirnaVariant};
use crate::analysis::scoring::{differential_scores, log_summary, results_frame};
use crate::analysis::windows::{build_windows, InvalidVariant};
use crate::config::ScanConfig;
use crate::data_handling::genome::GenomeAccessor;
use crate::data_handling::reference_tables::{
    Dataset, MirnaCatalog, MirnaCatalogSource, MirnaLoci, MirnaLociSource, TaSpsSource, TaSpsTable,
};
use crate::data_handling::variants::VariantChunk;
use crate::errors::ScanResult;
use crate::helper_functions::dataframe_to_csv;
use crate::models::SequenceWindow;
use crate::prediction_tools::rnaduplex_integration::{compile_jobs, fold_batch, write_batch, RnaduplexOptions};
use crate::prediction_tools::xgboost_model::ScoringModel;

/// Read-only state every chunk worker shares.
pub struct ScanContext {
    pub config: ScanConfig,
    pub run_dir: PathBuf,
    pub vcf_id: String,
    pub genome: GenomeAccessor,
    pub catalog: MirnaCatalog,
    pub ta_sps: TaSpsTable,
    pub loci: MirnaLoci,
    pub model: Box<dyn ScoringModel>,
    pub rnaduplex: RnaduplexOptions,
}

impl ScanContext {
    /// Loads the reference tables named by `config`. The model is loaded by
    /// the caller so that its failure can be reported on its own.
    pub fn load(config: ScanConfig, model: Box<dyn ScoringModel>) -> ScanResult<Self> {
        let refs = &config.references;
        let catalog = MirnaCatalogSource {
            path: refs.mirna_catalog.clone(),
        }
        .load()?;
        let ta_sps = TaSpsSource {
            path: refs.ta_sps.clone(),
        }
        .load()?;
        let loci = MirnaLociSource {
            path: refs.mirna_coords.clone(),
        }
        .load()?;
        let genome = GenomeAccessor::new(&refs.genome_dir, &refs.species, &refs.assembly);
        let rnaduplex = RnaduplexOptions::resolve(refs.rnaduplex.as_deref());

        Ok(ScanContext {
            run_dir: config.run_dir(),
            vcf_id: config.vcf_id(),
            config,
            genome,
            catalog,
            ta_sps,
            loci,
            model,
            rnaduplex,
        })
    }

    pub fn case_2_path(&self, start: usize, end: usize) -> PathBuf {
        self.run_dir
            .join(format!("{}_{}_{}_case_2.csv", self.vcf_id, start, end))
    }

    pub fn result_path(&self, start: usize, end: usize) -> PathBuf {
        self.run_dir.join(format!("result_{}_{}.csv", start, end))
    }

    pub fn features_path(&self, start: usize, end: usize) -> PathBuf {
        self.run_dir.join(format!("features_{}_{}.csv", start, end))
    }
}

/// How a chunk ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus {
    /// A result table with `rows` significant pairs was written.
    Scored { rows: usize },
    /// Folding is disabled for this run.
    Skipped,
    /// The folding step failed; the chunk has no duplex results.
    NoDuplexSignal { cause: String },
    Failed { cause: String },
}

impl ChunkStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ChunkStatus::Scored { .. } => "scored",
            ChunkStatus::Skipped => "skipped",
            ChunkStatus::NoDuplexSignal { .. } => "no_duplex_signal",
            ChunkStatus::Failed { .. } => "failed",
        }
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            ChunkStatus::NoDuplexSignal { cause } | ChunkStatus::Failed { cause } => Some(cause),
            _ => None,
        }
    }

    pub fn result_rows(&self) -> usize {
        match self {
            ChunkStatus::Scored { rows } => *rows,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    pub start_index: usize,
    pub end_index: usize,
    pub variants: usize,
    pub case_2: usize,
    pub invalid: Vec<InvalidVariant>,
    pub status: ChunkStatus,
    pub elapsed: Duration,
}

/// Runs every stage for `chunk`; never panics or propagates, the outcome
/// carries any failure.
pub fn process_chunk(ctx: &ScanContext, chunk: VariantChunk) -> ChunkOutcome {
    let started = Instant::now();
    let (start, end) = (chunk.start_index, chunk.end_index);
    info!("Processing chunk {}-{} ({} rows)", start, end, chunk.rows.len());

    let mut outcome = ChunkOutcome {
        start_index: start,
        end_index: end,
        variants: chunk.rows.len(),
        case_2: 0,
        invalid: Vec::new(),
        status: ChunkStatus::Skipped,
        elapsed: Duration::ZERO,
    };

    outcome.status = match analyse_chunk(ctx, &chunk, &mut outcome) {
        Ok(status) => status,
        Err(e) => {
            error!("Chunk {}-{} failed: {}", start, end, e);
            ChunkStatus::Failed { cause: e.to_string() }
        }
    };
    outcome.elapsed = started.elapsed();

    info!(
        "Finished chunk {}-{}: {} in {:.2?}",
        start,
        end,
        outcome.status.label(),
        outcome.elapsed
    );
    outcome
}

fn analyse_chunk(ctx: &ScanContext, chunk: &VariantChunk, outcome: &mut ChunkOutcome) -> ScanResult<ChunkStatus> {
    let (start, end) = (chunk.start_index, chunk.end_index);

    let mut variants = Vec::with_capacity(chunk.rows.len());
    for row in &chunk.rows {
        match row.parse() {
            Ok(variant) => variants.push(variant.with_augmented_id()),
            Err(e) => outcome.invalid.push(InvalidVariant {
                id: row.report_id(),
                reason: e.to_string(),
            }),
        }
    }

    let batch = build_windows(&ctx.genome, variants, ctx.config.flank)?;
    outcome.invalid.extend(batch.invalid);
    if !outcome.invalid.is_empty() {
        warn!("Chunk {}-{}: {} invalid rows", start, end, outcome.invalid.len());
    }

    let split = classify_variants(batch.windows, &ctx.loci);
    outcome.case_2 = split.in_mirna.len();
    if !split.in_mirna.is_empty() {
        write_case_2(&ctx.case_2_path(start, end), &split.in_mirna)?;
    }

    if ctx.config.skip_folding {
        return Ok(ChunkStatus::Skipped);
    }

    // removed on drop, whichever way this function returns
    let scratch = tempfile::Builder::new()
        .prefix(&format!("chunk_{}_{}_", start, end))
        .tempdir_in(&ctx.run_dir)?;

    let batch_path = scratch.path().join(format!("batch_{}_{}.fa", start, end));
    let jobs = write_batch(
        compile_jobs(&split.candidates, &ctx.catalog),
        File::create(&batch_path)?,
    )?;
    debug!("Chunk {}-{}: {} duplex jobs", start, end, jobs);

    let results = if jobs == 0 {
        Vec::new()
    } else {
        let structured = scratch
            .path()
            .join(format!("rnad_{}_{}_{}.csv", ctx.vcf_id, start, end));
        match fold_batch(&ctx.rnaduplex, &batch_path, scratch.path(), &structured) {
            Ok(results) => results,
            Err(e) => {
                error!("Folding failed for {}: {}", batch_path.display(), e);
                return Ok(ChunkStatus::NoDuplexSignal { cause: e.to_string() });
            }
        }
    };

    let windows: HashMap<&str, &SequenceWindow> = split
        .candidates
        .iter()
        .map(|(_, w)| (w.variant_id.as_str(), w))
        .collect();
    let rows = build_features(&results, &windows, &ctx.catalog, &ctx.ta_sps);
    let mut features = feature_frame(&rows)?;
    if ctx.config.keep_features {
        dataframe_to_csv(&mut features, &ctx.features_path(start, end))?;
    }

    let pairs = differential_scores(
        &features,
        ctx.model.as_ref(),
        ctx.config.threshold,
        ctx.config.mre_filter,
    )?;
    log_summary(&pairs);

    let mut table = results_frame(&pairs)?;
    dataframe_to_csv(&mut table, &ctx.result_path(start, end))?;
    Ok(ChunkStatus::Scored { rows: pairs.len() })
}

fn write_case_2(path: &Path, variants: &[InMirnaVariant]) -> ScanResult<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["id", "wt_seq", "mut_seq", "mirna_accession"])?;
    for v in variants {
        wtr.write_record([
            v.window.variant_id.as_str(),
            v.window.wild_type.as_str(),
            v.window.mutant.as_str(),
            v.mirna_accession.as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
